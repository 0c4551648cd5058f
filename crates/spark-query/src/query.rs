//! # 查询（Query）与应答发送
//!
//! ## 核心意图（Why）
//! - `Query` 是路由层匹配成功后交给 Queryable 的一次请求，应答方通过它的 `reply_*`
//!   方法把 [`Reply`] 送回发起 `get` 的会话；
//! - `Query` 只携带查询 ID 与指向会话的弱引用，不形成所有权环。
//!
//! ## 状态机（What）
//! - `Open`：交付给 Queryable 的消费策略；
//! - `Replied`（可重入）：每次成功的 `reply_*` 调用恰好产生一条交付给查询方的应答；
//! - `Closed`：所属 Queryable 撤销，或查询方的截止时间已过；此后的应答返回本地错误，不会 panic。
//!
//! ## 结束信号
//! 同一个 `Query` 的全部克隆被释放时，视为该 Queryable 已结束应答；
//! 会话在所有匹配的 Queryable 都结束后以 [`CloseReason::Completed`](crate::CloseReason::Completed)
//! 关闭查询方的消费策略。需要异步应答时，持有 `Query`（或其克隆）直到应答发出即可。

use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use tracing::warn;

use crate::error::{QueryError, Result};
use crate::ids::{QueryId, QueryableId};
use crate::key_expr::KeyExpr;
use crate::qos::{Encoding, QoS};
use crate::reply::Reply;
use crate::sample::{Sample, SampleKind, Timestamp};
use crate::selector::{ParameterMap, Selector};
use crate::session::SessionInner;

/// 应答的可选属性。
///
/// 默认值：默认编码、默认 QoS、无时间戳、无附件。`encoding` 与 `attachment`
/// 只作用于成功应答。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReplyOptions {
    encoding: Option<Encoding>,
    timestamp: Option<Timestamp>,
    qos: QoS,
    attachment: Option<Bytes>,
}

impl ReplyOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = Some(encoding);
        self
    }

    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    pub fn with_attachment(mut self, attachment: impl Into<Bytes>) -> Self {
        self.attachment = Some(attachment.into());
        self
    }
}

/// 交付给 Queryable 的单次查询。
///
/// 克隆开销为一次引用计数递增，所有克隆共享同一个应答通道。
#[derive(Clone)]
pub struct Query {
    inner: Arc<QueryInner>,
}

struct QueryInner {
    selector: Selector,
    payload: Option<Bytes>,
    encoding: Option<Encoding>,
    attachment: Option<Bytes>,
    slot: ReplySlot,
}

/// 从查询回到发起会话的单写者通道。
///
/// 析构即结束信号：通知发起会话该 Queryable 不再应答。
pub(crate) struct ReplySlot {
    query: QueryId,
    queryable: QueryableId,
    queryable_closed: Arc<AtomicBool>,
    session: Weak<SessionInner>,
}

impl ReplySlot {
    pub(crate) fn new(
        query: QueryId,
        queryable: QueryableId,
        queryable_closed: Arc<AtomicBool>,
        session: Weak<SessionInner>,
    ) -> Self {
        Self {
            query,
            queryable,
            queryable_closed,
            session,
        }
    }
}

impl Drop for ReplySlot {
    fn drop(&mut self) {
        if let Some(session) = self.session.upgrade() {
            session.on_final(self.query);
        }
    }
}

impl Query {
    pub(crate) fn new(
        selector: Selector,
        payload: Option<Bytes>,
        encoding: Option<Encoding>,
        attachment: Option<Bytes>,
        slot: ReplySlot,
    ) -> Self {
        Self {
            inner: Arc::new(QueryInner {
                selector,
                payload,
                encoding,
                attachment,
                slot,
            }),
        }
    }

    /// 查询在发起会话内的关联 ID。
    pub fn id(&self) -> QueryId {
        self.inner.slot.query
    }

    /// 接收该查询的 Queryable。
    pub fn queryable(&self) -> QueryableId {
        self.inner.slot.queryable
    }

    pub fn selector(&self) -> &Selector {
        &self.inner.selector
    }

    pub fn key_expr(&self) -> &KeyExpr {
        self.inner.selector.key_expr()
    }

    /// 原始参数串，未解码。
    pub fn parameters(&self) -> Option<&str> {
        self.inner.selector.parameters()
    }

    /// 解析参数串，语义同 [`Selector::parameters_string_map`]。
    pub fn parameters_string_map(&self) -> Result<Option<ParameterMap>> {
        self.inner.selector.parameters_string_map()
    }

    pub fn payload(&self) -> Option<&Bytes> {
        self.inner.payload.as_ref()
    }

    pub fn encoding(&self) -> Option<&Encoding> {
        self.inner.encoding.as_ref()
    }

    pub fn attachment(&self) -> Option<&Bytes> {
        self.inner.attachment.as_ref()
    }

    /// 所属 Queryable 是否已关闭；关闭后所有 `reply_*` 都会失败。
    pub fn is_closed(&self) -> bool {
        self.inner.slot.queryable_closed.load(Ordering::Acquire)
    }

    /// 发送成功应答。
    ///
    /// # 教案式说明
    /// - **契约 (What)**：
    ///   - `key_expr` 必须与查询的键表达式相交，否则返回 [`QueryError::KeyExprMismatch`]；
    ///   - Queryable 已关闭返回 [`QueryError::QueryableClosed`]；
    ///   - 查询方已超时或已完成返回 [`QueryError::Timeout`]；
    ///   - 以上失败只回报给应答方，查询方不会感知。
    pub fn reply_success(
        &self,
        key_expr: KeyExpr,
        payload: impl Into<Bytes>,
        options: ReplyOptions,
    ) -> Result<()> {
        self.ensure_open()?;
        self.ensure_intersects(&key_expr)?;
        let ReplyOptions {
            encoding,
            timestamp,
            qos,
            attachment,
        } = options;
        let sample = Sample::new(key_expr, payload)
            .with_encoding(encoding.unwrap_or_default())
            .with_kind(SampleKind::Put)
            .with_timestamp(timestamp)
            .with_qos(qos)
            .with_attachment(attachment);
        self.send(Reply::Success(sample))
    }

    /// 发送错误应答，编码缺省为默认编码。
    pub fn reply_error(&self, payload: impl Into<Bytes>, encoding: Option<Encoding>) -> Result<()> {
        self.ensure_open()?;
        self.send(Reply::Error {
            payload: payload.into(),
            encoding: encoding.unwrap_or_default(),
        })
    }

    /// 发送删除应答；`options` 中只有时间戳与 QoS 生效。
    pub fn reply_delete(&self, key_expr: KeyExpr, options: ReplyOptions) -> Result<()> {
        self.ensure_open()?;
        self.ensure_intersects(&key_expr)?;
        self.send(Reply::Delete {
            key_expr,
            timestamp: options.timestamp,
            qos: options.qos,
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            let queryable = self.inner.slot.queryable;
            warn!(query = %self.id(), %queryable, "reply after queryable closed, dropped");
            return Err(QueryError::QueryableClosed { queryable });
        }
        Ok(())
    }

    fn ensure_intersects(&self, key_expr: &KeyExpr) -> Result<()> {
        if key_expr.intersects(self.key_expr()) {
            Ok(())
        } else {
            Err(QueryError::KeyExprMismatch {
                reply: key_expr.to_string(),
                query: self.key_expr().to_string(),
            })
        }
    }

    fn send(&self, reply: Reply) -> Result<()> {
        let session = self
            .inner
            .slot
            .session
            .upgrade()
            .ok_or(QueryError::SessionClosed)?;
        session.route_reply(self.id(), reply)
    }
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("id", &self.id())
            .field("queryable", &self.queryable())
            .field("selector", &self.inner.selector)
            .field("payload", &self.inner.payload)
            .field("encoding", &self.inner.encoding)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner.selector, f)
    }
}
