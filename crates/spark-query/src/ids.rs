//! 会话内部的标识符类型。
//!
//! # 设计动机（Why）
//! - 查询关联表与 Queryable 注册表都以整数 ID 为键，使用新类型避免两类 ID 混用；
//! - `Query` 只携带 [`QueryId`]，而不持有指回会话的强引用，避免所有权环。

use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

/// 单次 `get` 调用的关联标识，在所属会话内唯一。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryId(u64);

impl QueryId {
    /// 读取底层整数值。
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "q#{}", self.0)
    }
}

/// Queryable 注册标识，在所属会话内唯一。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryableId(u64);

impl QueryableId {
    /// 读取底层整数值。
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for QueryableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "qbl#{}", self.0)
    }
}

/// 单调递增的 ID 分配器。
///
/// - **契约 (What)**：从 1 开始分配，`0` 保留不用；`Relaxed` 序足以保证唯一性。
#[derive(Debug)]
pub(crate) struct IdAllocator {
    next: AtomicU64,
}

impl IdAllocator {
    pub(crate) fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub(crate) fn next_query(&self) -> QueryId {
        QueryId(self.next.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn next_queryable(&self) -> QueryableId {
        QueryableId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}
