//! # 会话（Session）
//!
//! ## 核心意图（Why）
//! - 会话是查询子系统唯一的生命周期边界：`open` 之后才能声明 Queryable、发起查询，
//!   `close` 负责级联释放全部 Queryable 并取消在途查询；
//! - 状态全部挂在会话实例上，没有进程级单例，多个会话可以在同一进程（同一测试）中共存。
//!
//! ## 并发模型（How）
//! - 会话自带一个多线程 tokio 运行时作为交付线程池：Queryable 的查询收件箱与 `get` 的超时计时器都运行其上；
//! - 回调与处理器在交付线程上同步执行；会话内部的任何锁都不会跨越对消费策略的调用，
//!   因此回调内再次调用 `get` / `declare_queryable` 不会死锁；
//! - `lifecycle` 读写锁只保护“检查关闭标志 + 登记”这一小段：`declare_queryable` 与 `get` 持读锁，
//!   `close` 持写锁翻转关闭标志并取快照，随后在锁外逐个关闭。

mod correlation;

use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::config::SessionConfig;
use crate::error::{QueryError, Result};
use crate::handler::{CloseReason, IntoDelivery, Sink};
use crate::ids::{IdAllocator, QueryId, QueryableId};
use crate::key_expr::KeyExpr;
use crate::qos::Encoding;
use crate::query::{Query, ReplySlot};
use crate::queryable::{Queryable, QueryableState, deliver_queries};
use crate::reply::Reply;
use crate::routing::{LocalRouter, QueryRouter, QueryableRoute};
use crate::sample::{Clock, SystemClock, Timestamp};
use crate::selector::Selector;

use self::correlation::{CorrelationTable, PendingQuery};

/// `get` 的可选参数。
///
/// 未设置超时时使用 [`SessionConfig::query_timeout_ms`]。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GetOptions {
    timeout: Option<Duration>,
    payload: Option<Bytes>,
    encoding: Option<Encoding>,
    attachment: Option<Bytes>,
}

impl GetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = Some(encoding);
        self
    }

    pub fn with_attachment(mut self, attachment: impl Into<Bytes>) -> Self {
        self.attachment = Some(attachment.into());
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

/// 查询子系统的会话句柄。
///
/// 克隆共享同一个会话；最后一个克隆析构时会话自动关闭，
/// 但显式的 [`Session::close`] 才是确定性的释放点。
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

pub(crate) struct SessionInner {
    config: SessionConfig,
    router: Arc<dyn QueryRouter>,
    clock: Arc<dyn Clock>,
    ids: IdAllocator,
    queryables: DashMap<QueryableId, Arc<QueryableState>>,
    pending: CorrelationTable,
    lifecycle: RwLock<()>,
    closed: AtomicBool,
    runtime: Mutex<Option<Runtime>>,
    handle: Handle,
}

impl Session {
    /// 以进程内路由表与系统时钟打开会话。
    pub fn open(config: SessionConfig) -> Result<Self> {
        Self::open_with(config, Arc::new(LocalRouter::new()), Arc::new(SystemClock))
    }

    /// 以外部提供的路由协作者与时钟打开会话。
    ///
    /// # 教案式说明
    /// - **意图 (Why)**：多个会话共享同一个 [`LocalRouter`] 即可互相查询；测试可注入固定时钟；
    /// - **契约 (What)**：配置非法返回 [`QueryError::Config`]，交付运行时无法启动返回
    ///   [`QueryError::Runtime`]；两者都是不可恢复错误，只在这里报告。
    pub fn open_with(
        config: SessionConfig,
        router: Arc<dyn QueryRouter>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let runtime = Builder::new_multi_thread()
            .worker_threads(config.delivery_threads)
            .thread_name(config.thread_name.clone())
            .enable_time()
            .build()
            .map_err(|err| QueryError::Runtime {
                detail: err.to_string(),
            })?;
        let handle = runtime.handle().clone();
        debug!(
            threads = config.delivery_threads,
            query_timeout_ms = config.query_timeout_ms,
            "session opened"
        );
        Ok(Self {
            inner: Arc::new(SessionInner {
                config,
                router,
                clock,
                ids: IdAllocator::new(),
                queryables: DashMap::new(),
                pending: CorrelationTable::new(),
                lifecycle: RwLock::new(()),
                closed: AtomicBool::new(false),
                runtime: Mutex::new(Some(runtime)),
                handle,
            }),
        })
    }

    /// 声明 Queryable，匹配到的查询交付给 `strategy`。
    ///
    /// # 教案式说明
    /// - **契约 (What)**：
    ///   - 键表达式非法返回 [`QueryError::InvalidKeyExpr`]；会话已关闭返回 [`QueryError::SessionClosed`]；
    ///   - 成功后 Queryable 进入会话的在线集合，`close` 时被级联撤销；
    ///   - 返回的句柄携带策略的接收端（回调为 `()`）。
    /// - **执行 (How)**：为 Queryable 建立无界收件箱并登记到路由层，
    ///   再在交付运行时上启动按序投递的任务。
    pub fn declare_queryable<K, D>(
        &self,
        key_expr: K,
        strategy: D,
    ) -> Result<Queryable<D::Receiver>>
    where
        K: TryInto<KeyExpr>,
        QueryError: From<K::Error>,
        D: IntoDelivery<Query>,
    {
        let key_expr = key_expr.try_into()?;
        let (delivery, receiver) = strategy.into_delivery();
        let inner = &self.inner;

        let state = {
            let _guard = inner.lifecycle.read();
            if inner.closed.load(Ordering::Acquire) {
                None
            } else {
                let id = inner.ids.next_queryable();
                let state = Arc::new(QueryableState::new(
                    id,
                    key_expr.clone(),
                    Sink::new(delivery),
                ));
                let (inbox, queries) = mpsc::unbounded_channel();
                inner.queryables.insert(id, Arc::clone(&state));
                inner
                    .router
                    .register(QueryableRoute::new(id, key_expr.clone(), inbox, state.closed_flag()));
                inner.handle.spawn(deliver_queries(queries, Arc::clone(&state)));
                Some(state)
            }
        };
        let state = state.ok_or(QueryError::SessionClosed)?;
        debug!(queryable = %state.id(), %key_expr, "queryable declared");
        Ok(Queryable::new(state, Arc::downgrade(inner), receiver))
    }

    /// 发起查询，应答交付给 `strategy`，返回其接收端。
    ///
    /// # 教案式说明
    /// - **契约 (What)**：
    ///   - 选择器解析失败或会话已关闭时返回错误，且没有任何副作用；
    ///   - 超时不是错误：调用立即返回，超时只截断后续应答的交付，
    ///     策略以 [`CloseReason::Timeout`] 关闭；
    ///   - 所有匹配的 Queryable 都释放了各自的 `Query` 后，策略以 [`CloseReason::Completed`] 关闭；
    ///     没有任何匹配时立即完成。
    /// - **执行 (How)**：
    ///   1. 读锁内分配查询 ID、向路由层匹配 Queryable、登记关联条目并启动超时计时器；
    ///   2. 锁外为每个匹配的 Queryable 构造携带应答通道的 `Query` 并投递。
    pub fn get<S, D>(&self, selector: S, strategy: D, options: GetOptions) -> Result<D::Receiver>
    where
        S: TryInto<Selector>,
        QueryError: From<S::Error>,
        D: IntoDelivery<Reply>,
    {
        let selector = selector.try_into()?;
        let (delivery, receiver) = strategy.into_delivery();
        let sink = Arc::new(Sink::new(delivery));
        let inner = &self.inner;
        let timeout = options
            .timeout
            .unwrap_or_else(|| inner.config.query_timeout());

        let dispatch = {
            let _guard = inner.lifecycle.read();
            if inner.closed.load(Ordering::Acquire) {
                None
            } else {
                let id = inner.ids.next_query();
                let routes = inner.router.match_queryables(selector.key_expr());
                if !routes.is_empty() {
                    inner.pending.insert(
                        id,
                        PendingQuery::new(
                            selector.key_expr().clone(),
                            Arc::clone(&sink),
                            routes.len(),
                            timeout,
                        ),
                    );
                    let session = Arc::downgrade(inner);
                    inner.handle.spawn(async move {
                        tokio::time::sleep(timeout).await;
                        if let Some(session) = session.upgrade() {
                            session.expire(id);
                        }
                    });
                }
                Some((id, routes))
            }
        };
        let (id, routes) = dispatch.ok_or(QueryError::SessionClosed)?;
        debug!(
            query = %id,
            %selector,
            matched = routes.len(),
            timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            "query dispatched"
        );

        if routes.is_empty() {
            sink.finish(CloseReason::Completed);
            return Ok(receiver);
        }

        let GetOptions {
            payload,
            encoding,
            attachment,
            ..
        } = options;
        for route in routes {
            let slot = ReplySlot::new(id, route.id(), route.closed_flag(), Arc::downgrade(inner));
            let query = Query::new(
                selector.clone(),
                payload.clone(),
                encoding.clone(),
                attachment.clone(),
                slot,
            );
            if !route.route_query(query) {
                trace!(query = %id, queryable = %route.id(), "queryable inbox closed, query dropped");
            }
        }
        Ok(receiver)
    }

    /// 关闭会话；重复调用是无副作用的空操作。
    ///
    /// 依次撤销全部在线 Queryable（原因 [`CloseReason::SessionClosed`]）、
    /// 以同一原因关闭全部在途查询的消费策略，最后停止交付运行时。
    pub fn close(&self) {
        self.inner.shutdown();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// 在线 Queryable 数量。
    pub fn queryable_count(&self) -> usize {
        self.inner.queryables.len()
    }

    /// 尚未完成、超时或取消的 `get` 数量。
    pub fn pending_queries(&self) -> usize {
        self.inner.pending.len()
    }

    /// 由时钟协作者生成时间戳。
    pub fn new_timestamp(&self) -> Timestamp {
        self.inner.clock.now()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("closed", &self.is_closed())
            .field("queryables", &self.queryable_count())
            .field("pending_queries", &self.pending_queries())
            .finish()
    }
}

impl SessionInner {
    /// 某个匹配的 Queryable 释放了它的 `Query`。
    pub(crate) fn on_final(&self, id: QueryId) {
        if let Some(pending) = self.pending.release(id) {
            debug!(query = %id, key_expr = %pending.key_expr(), "query completed");
            pending.finish(CloseReason::Completed);
        }
    }

    fn expire(&self, id: QueryId) {
        if let Some(pending) = self.pending.remove(id) {
            debug!(query = %id, key_expr = %pending.key_expr(), "query timed out");
            pending.finish(CloseReason::Timeout);
        }
    }

    /// 把应答交给发起查询的消费策略。
    ///
    /// 条目已不存在（超时、完成或会话关闭）时返回本地错误，应答被丢弃。
    pub(crate) fn route_reply(&self, id: QueryId, reply: Reply) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(QueryError::SessionClosed);
        }
        let sink = self
            .pending
            .sink(id)
            .ok_or(QueryError::Timeout { query: id })?;
        if sink.emit(reply) {
            trace!(query = %id, "reply delivered");
            Ok(())
        } else {
            Err(QueryError::Timeout { query: id })
        }
    }

    pub(crate) fn undeclare_queryable(&self, state: &Arc<QueryableState>) {
        self.queryables.remove(&state.id());
        state.shutdown(Some(self.router.as_ref()), CloseReason::Undeclared);
    }

    fn shutdown(&self) -> bool {
        let (queryables, pending) = {
            let _guard = self.lifecycle.write();
            if self.closed.swap(true, Ordering::AcqRel) {
                return false;
            }
            let queryables: Vec<Arc<QueryableState>> = self
                .queryables
                .iter()
                .map(|entry| Arc::clone(entry.value()))
                .collect();
            self.queryables.clear();
            (queryables, self.pending.drain())
        };

        let cascaded = queryables.len();
        let cancelled = pending.len();
        for state in queryables {
            state.shutdown(Some(self.router.as_ref()), CloseReason::SessionClosed);
        }
        for (id, entry) in pending {
            trace!(query = %id, deadline = ?entry.deadline(), "query cancelled by session close");
            entry.finish(CloseReason::SessionClosed);
        }

        let runtime = self.runtime.lock().take();
        if let Some(runtime) = runtime {
            runtime.shutdown_background();
        }
        debug!(queryables = cascaded, queries = cancelled, "session closed");
        true
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        self.shutdown();
    }
}
