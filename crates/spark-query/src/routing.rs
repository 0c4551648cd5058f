//! # 路由协作者
//!
//! ## 核心意图（Why）
//! - 会话本身不关心查询如何抵达 Queryable，只依赖 [`QueryRouter`] 提供的
//!   “注册 / 撤销 / 按键表达式匹配”三项能力；
//! - 默认实现 [`LocalRouter`] 在进程内完成匹配，多个会话共享同一个 `LocalRouter`
//!   即可互相查询，这也是集成测试的主要驱动方式。
//!
//! ## 契约（What）
//! - `match_queryables` 返回的路由句柄是快照：撤销与匹配并发时，刚撤销的 Queryable
//!   仍可能收到一条查询，属于可接受的传播延迟；
//! - [`QueryableRoute::route_query`] 不阻塞，投递失败时查询在本地被丢弃，
//!   其析构会向发起方报告“该 Queryable 已结束”。

use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::mpsc::UnboundedSender;
use tracing::trace;

use crate::ids::QueryableId;
use crate::key_expr::KeyExpr;
use crate::query::Query;

/// 某个 Queryable 在路由层的投递句柄。
#[derive(Clone)]
pub struct QueryableRoute {
    id: QueryableId,
    key_expr: KeyExpr,
    inbox: UnboundedSender<Query>,
    closed: Arc<AtomicBool>,
}

impl QueryableRoute {
    pub(crate) fn new(
        id: QueryableId,
        key_expr: KeyExpr,
        inbox: UnboundedSender<Query>,
        closed: Arc<AtomicBool>,
    ) -> Self {
        Self {
            id,
            key_expr,
            inbox,
            closed,
        }
    }

    pub fn id(&self) -> QueryableId {
        self.id
    }

    pub fn key_expr(&self) -> &KeyExpr {
        &self.key_expr
    }

    /// Queryable 是否已撤销；已撤销的路由不应再被匹配。
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// 将查询放入该 Queryable 的收件箱，按调用顺序交付。
    ///
    /// 收件箱已关闭时返回 `false`，查询随之析构。
    pub fn route_query(&self, query: Query) -> bool {
        self.inbox.send(query).is_ok()
    }

    pub(crate) fn closed_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.closed)
    }
}

impl fmt::Debug for QueryableRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryableRoute")
            .field("id", &self.id)
            .field("key_expr", &self.key_expr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// 查询路由协作者。
///
/// # 教案式说明
/// - **意图 (Why)**：把“谁能回答这个键表达式”的决策从会话中剥离，便于替换为跨进程实现；
/// - **契约 (What)**：
///   - `register` 之后的 `match_queryables` 必须能看到该路由；
///   - `deregister` 返回是否真的移除了条目，重复撤销返回 `false`；
///   - 所有方法都可能被多个线程并发调用，且不得回调会话。
pub trait QueryRouter: Send + Sync + 'static {
    fn register(&self, route: QueryableRoute);

    fn deregister(&self, id: QueryableId) -> bool;

    /// 返回键空间与 `key_expr` 相交的全部在线 Queryable。
    fn match_queryables(&self, key_expr: &KeyExpr) -> Vec<QueryableRoute>;
}

/// 进程内路由表。
///
/// # 行为概览（How）
/// 1. 路由表以 [`ArcSwap`] 持有不可变的 `Vec<QueryableRoute>`；
/// 2. 注册/撤销通过 `rcu` 拷贝后整表替换，并发写入不会丢失更新；
/// 3. 匹配只 `load` 快照并顺序遍历，读路径不加锁。
pub struct LocalRouter {
    table: ArcSwap<Vec<QueryableRoute>>,
}

impl LocalRouter {
    pub fn new() -> Self {
        Self {
            table: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// 当前注册的路由数量。
    pub fn len(&self) -> usize {
        self.table.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.load().is_empty()
    }
}

impl Default for LocalRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LocalRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalRouter")
            .field("routes", &self.len())
            .finish()
    }
}

impl QueryRouter for LocalRouter {
    fn register(&self, route: QueryableRoute) {
        trace!(queryable = %route.id, key_expr = %route.key_expr, "route registered");
        self.table.rcu(|routes| {
            let mut next = Vec::with_capacity(routes.len() + 1);
            next.extend(routes.iter().filter(|existing| existing.id != route.id).cloned());
            next.push(route.clone());
            next
        });
    }

    fn deregister(&self, id: QueryableId) -> bool {
        let previous = self.table.rcu(|routes| {
            routes
                .iter()
                .filter(|route| route.id != id)
                .cloned()
                .collect::<Vec<_>>()
        });
        let removed = previous.iter().any(|route| route.id == id);
        if removed {
            trace!(queryable = %id, "route deregistered");
        }
        removed
    }

    fn match_queryables(&self, key_expr: &KeyExpr) -> Vec<QueryableRoute> {
        self.table
            .load()
            .iter()
            .filter(|route| !route.is_closed() && route.key_expr.intersects(key_expr))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::IdAllocator;
    use tokio::sync::mpsc;

    fn route(ids: &IdAllocator, key_expr: &str) -> (QueryableRoute, mpsc::UnboundedReceiver<Query>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let route = QueryableRoute::new(
            ids.next_queryable(),
            KeyExpr::new(key_expr).unwrap(),
            tx,
            Arc::new(AtomicBool::new(false)),
        );
        (route, rx)
    }

    #[test]
    fn matches_by_key_space_intersection() {
        let ids = IdAllocator::new();
        let router = LocalRouter::new();
        let (wild, _wild_rx) = route(&ids, "demo/**");
        let (exact, _exact_rx) = route(&ids, "demo/a");
        let (other, _other_rx) = route(&ids, "other/a");
        router.register(wild.clone());
        router.register(exact.clone());
        router.register(other);

        let hits: Vec<_> = router
            .match_queryables(&KeyExpr::new("demo/a").unwrap())
            .into_iter()
            .map(|route| route.id())
            .collect();
        assert_eq!(hits, vec![wild.id(), exact.id()]);

        let hits = router.match_queryables(&KeyExpr::new("demo/*").unwrap());
        assert_eq!(hits.len(), 2, "查询侧通配符同样参与相交判断");
    }

    #[test]
    fn deregister_is_reported_once() {
        let ids = IdAllocator::new();
        let router = LocalRouter::new();
        let (entry, _rx) = route(&ids, "demo/a");
        let id = entry.id();
        router.register(entry);
        assert_eq!(router.len(), 1);

        assert!(router.deregister(id));
        assert!(!router.deregister(id), "重复撤销应报告未命中");
        assert!(router.is_empty());
        assert!(router.match_queryables(&KeyExpr::new("demo/a").unwrap()).is_empty());
    }

    #[test]
    fn closed_routes_are_not_matched() {
        let ids = IdAllocator::new();
        let router = LocalRouter::new();
        let (entry, _rx) = route(&ids, "demo/a");
        let flag = entry.closed_flag();
        router.register(entry);

        flag.store(true, Ordering::Release);
        assert!(router.match_queryables(&KeyExpr::new("demo/a").unwrap()).is_empty());
    }
}
