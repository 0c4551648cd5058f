//! # Queryable 句柄
//!
//! ## 核心意图（Why）
//! - 向路由层登记“我能回答这片键空间”，并把匹配到的查询交付给绑定的消费策略；
//! - 句柄析构即撤销，但显式的 [`Queryable::undeclare`] 才是确定性的释放点。
//!
//! ## 契约（What）
//! - `undeclare` / `close` 幂等：撤销路由、关闭策略（`on_close` 恰好一次）、把句柄标记为不可用；
//! - 撤销开始后仍可能短暂收到已在途的查询，属于可接受的竞态；
//! - 对同一个 Queryable，查询按路由层匹配的先后顺序交付。

use core::fmt;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, trace};

use crate::handler::{CloseReason, Sink};
use crate::ids::QueryableId;
use crate::key_expr::KeyExpr;
use crate::query::Query;
use crate::routing::QueryRouter;
use crate::session::SessionInner;

/// 会话注册表与交付任务共享的 Queryable 状态。
pub(crate) struct QueryableState {
    id: QueryableId,
    key_expr: KeyExpr,
    sink: Sink<Query>,
    closed: Arc<AtomicBool>,
}

impl QueryableState {
    pub(crate) fn new(id: QueryableId, key_expr: KeyExpr, sink: Sink<Query>) -> Self {
        Self {
            id,
            key_expr,
            sink,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub(crate) fn id(&self) -> QueryableId {
        self.id
    }

    pub(crate) fn key_expr(&self) -> &KeyExpr {
        &self.key_expr
    }

    pub(crate) fn closed_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.closed)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// 关闭 Queryable，返回是否为首次关闭。
    ///
    /// - **执行 (How)**：先置关闭标志，使在途应答立即失败；再撤销路由，断开收件箱的生产端；
    ///   最后关闭消费策略，`on_close` 在此处触发且不持有任何锁。
    pub(crate) fn shutdown(&self, router: Option<&dyn QueryRouter>, reason: CloseReason) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        if let Some(router) = router {
            router.deregister(self.id);
        }
        self.sink.finish(reason);
        debug!(queryable = %self.id, key_expr = %self.key_expr, %reason, "queryable closed");
        true
    }
}

/// 交付任务：按到达顺序把收件箱中的查询交给消费策略。
///
/// 所有生产端（路由表中的句柄）释放后任务自然结束。
pub(crate) async fn deliver_queries(
    mut inbox: UnboundedReceiver<Query>,
    state: Arc<QueryableState>,
) {
    while let Some(query) = inbox.recv().await {
        trace!(queryable = %state.id, query = %query.id(), "delivering query");
        // 已关闭时 `emit` 返回 false，查询在此析构，等同于该 Queryable 结束应答。
        state.sink.emit(query);
    }
    trace!(queryable = %state.id, "query inbox drained");
}

/// 已声明的 Queryable。
///
/// `R` 为消费策略交还的接收端：回调为 `()`，通道为
/// [`ChannelReceiver<Query>`](crate::ChannelReceiver)，处理器对象为其 `Receiver`。
/// 句柄解引用到 `R`，可直接在其上调用 `recv` 等方法。
pub struct Queryable<R> {
    state: Arc<QueryableState>,
    session: Weak<SessionInner>,
    receiver: R,
}

impl<R> Queryable<R> {
    pub(crate) fn new(state: Arc<QueryableState>, session: Weak<SessionInner>, receiver: R) -> Self {
        Self {
            state,
            session,
            receiver,
        }
    }

    pub fn id(&self) -> QueryableId {
        self.state.id
    }

    pub fn key_expr(&self) -> &KeyExpr {
        &self.state.key_expr
    }

    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    pub fn receiver(&self) -> &R {
        &self.receiver
    }

    pub fn receiver_mut(&mut self) -> &mut R {
        &mut self.receiver
    }

    /// 撤销 Queryable；重复调用无副作用。
    pub fn undeclare(&self) {
        match self.session.upgrade() {
            Some(session) => session.undeclare_queryable(&self.state),
            // 会话已析构时，其关闭流程已经撤销过全部 Queryable。
            None => {
                self.state.shutdown(None, CloseReason::SessionClosed);
            }
        }
    }

    /// 同 [`undeclare`](Self::undeclare)。
    pub fn close(&self) {
        self.undeclare();
    }
}

impl<R> Deref for Queryable<R> {
    type Target = R;

    fn deref(&self) -> &R {
        &self.receiver
    }
}

impl<R> DerefMut for Queryable<R> {
    fn deref_mut(&mut self) -> &mut R {
        &mut self.receiver
    }
}

impl<R> Drop for Queryable<R> {
    fn drop(&mut self) {
        self.undeclare();
    }
}

impl<R> fmt::Debug for Queryable<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queryable")
            .field("id", &self.state.id)
            .field("key_expr", &self.state.key_expr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{Callback, IntoDelivery};
    use crate::ids::IdAllocator;
    use crate::routing::{LocalRouter, QueryableRoute};
    use parking_lot::Mutex;

    #[test]
    fn shutdown_deregisters_and_closes_once() {
        let ids = IdAllocator::new();
        let reasons = Arc::new(Mutex::new(Vec::new()));
        let (delivery, ()) = {
            let reasons = Arc::clone(&reasons);
            Callback::new(|_: Query| {}).on_close(move |reason| reasons.lock().push(reason))
        }
        .into_delivery();
        let state = QueryableState::new(
            ids.next_queryable(),
            KeyExpr::new("demo/a").unwrap(),
            Sink::new(delivery),
        );

        let router = LocalRouter::new();
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        router.register(QueryableRoute::new(
            state.id(),
            state.key_expr().clone(),
            tx,
            state.closed_flag(),
        ));

        assert!(state.shutdown(Some(&router as &dyn QueryRouter), CloseReason::Undeclared));
        assert!(!state.shutdown(Some(&router as &dyn QueryRouter), CloseReason::SessionClosed));
        assert!(router.is_empty());
        assert!(state.is_closed());
        assert_eq!(*reasons.lock(), vec![CloseReason::Undeclared]);
    }
}
