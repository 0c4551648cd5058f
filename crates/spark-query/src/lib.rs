#![deny(unsafe_code)]

//! # spark-query
//!
//! ## 定位与职责（Why）
//! - 在键表达式寻址的发布/订阅之上提供分布式查询/应答能力：调用方以 [`Selector`] 发起 `get`，
//!   所有键空间相交的 [`Queryable`] 收到 [`Query`] 并以 `Success` / `Error` / `Delete` 三种 [`Reply`] 作答；
//! - 查询与应答都通过统一的消费抽象交付：回调、处理器对象或 FIFO 通道，三选一。
//!
//! ## 架构嵌入（Where）
//! - `key_expr` / `selector`：键表达式语法与选择器参数解析，纯值类型，不依赖会话；
//! - `qos` / `sample` / `reply`：随应答携带的不可变数据；
//! - `handler`：消费抽象，Queryable 与会话只面向其内部的 `emit` / `finish` 入口编写；
//! - `query` / `queryable` / `session`：查询状态机、Queryable 生命周期与会话级的关联表、超时和级联关闭；
//! - `routing`：路由协作者接缝，默认提供进程内的 [`LocalRouter`]；
//! - `config` / `error` / `logging`：配置、错误域与日志安装入口。
//!
//! ## 生命周期（What）
//! - [`Session::open`] 与 [`Session::close`] 是唯一的进出口；`close` 幂等，第二次调用为空操作；
//! - Queryable 的撤销与 `get` 的超时都是尽力而为：在途消息可能在截止后被静默丢弃。

pub mod config;
pub mod error;
pub mod handler;
mod ids;
pub mod key_expr;
pub mod logging;
pub mod qos;
pub mod query;
pub mod queryable;
pub mod reply;
pub mod routing;
pub mod sample;
pub mod selector;
pub mod session;

pub use config::SessionConfig;
pub use error::{ConfigError, QueryError, Result};
pub use handler::{
    Callback, Channel, ChannelReceiver, CloseReason, Delivery, Handler, IntoDelivery, Stateful,
};
pub use ids::{QueryId, QueryableId};
pub use key_expr::KeyExpr;
pub use qos::{CongestionControl, Encoding, Priority, QoS};
pub use query::{Query, ReplyOptions};
pub use queryable::Queryable;
pub use reply::Reply;
pub use routing::{LocalRouter, QueryRouter, QueryableRoute};
pub use sample::{Clock, Sample, SampleKind, SystemClock, Timestamp};
pub use selector::{ParameterMap, Selector};
pub use session::{GetOptions, Session};
