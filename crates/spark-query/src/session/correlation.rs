//! 在途查询的关联表：查询 ID → 消费策略 + 截止时间 + 未结束的 Queryable 计数。

use core::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::handler::{CloseReason, Sink};
use crate::ids::QueryId;
use crate::key_expr::KeyExpr;
use crate::reply::Reply;

/// 单次 `get` 的关联条目。
pub(crate) struct PendingQuery {
    key_expr: KeyExpr,
    sink: Arc<Sink<Reply>>,
    outstanding: AtomicUsize,
    deadline: Option<Instant>,
}

impl PendingQuery {
    pub(crate) fn new(
        key_expr: KeyExpr,
        sink: Arc<Sink<Reply>>,
        outstanding: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            key_expr,
            sink,
            outstanding: AtomicUsize::new(outstanding),
            deadline: Instant::now().checked_add(timeout),
        }
    }

    pub(crate) fn key_expr(&self) -> &KeyExpr {
        &self.key_expr
    }

    /// 超时过大而无法表示时为 `None`，等同于永不超时。
    pub(crate) fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// 关闭查询方的消费策略。
    pub(crate) fn finish(&self, reason: CloseReason) -> bool {
        self.sink.finish(reason)
    }
}

/// # 教案式说明
/// - **意图 (Why)**：应答线程、超时任务与 `close` 会并发访问同一条目，
///   分片锁的 `DashMap` 让不同查询互不阻塞；
/// - **契约 (What)**：
///   - 所有方法在返回前释放分片锁，调用方拿到的 `Sink` 或条目可以在锁外调用消费策略；
///   - 条目只会被 `release`（计数归零）、`remove`（超时）或 `drain`（会话关闭）之一取走一次，
///     因此消费策略恰好被关闭一次。
#[derive(Default)]
pub(crate) struct CorrelationTable {
    entries: DashMap<QueryId, PendingQuery>,
}

impl CorrelationTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, id: QueryId, pending: PendingQuery) {
        self.entries.insert(id, pending);
    }

    /// 克隆出消费策略，随后即释放分片锁。
    pub(crate) fn sink(&self, id: QueryId) -> Option<Arc<Sink<Reply>>> {
        self.entries.get(&id).map(|entry| Arc::clone(&entry.sink))
    }

    /// 某个 Queryable 结束应答；最后一个结束时取走条目。
    pub(crate) fn release(&self, id: QueryId) -> Option<PendingQuery> {
        let last = self
            .entries
            .get(&id)
            .is_some_and(|entry| entry.outstanding.fetch_sub(1, Ordering::AcqRel) == 1);
        if last {
            self.entries.remove(&id).map(|(_, pending)| pending)
        } else {
            None
        }
    }

    pub(crate) fn remove(&self, id: QueryId) -> Option<PendingQuery> {
        self.entries.remove(&id).map(|(_, pending)| pending)
    }

    pub(crate) fn drain(&self) -> Vec<(QueryId, PendingQuery)> {
        let ids: Vec<QueryId> = self.entries.iter().map(|entry| *entry.key()).collect();
        ids.into_iter()
            .filter_map(|id| self.entries.remove(&id))
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
