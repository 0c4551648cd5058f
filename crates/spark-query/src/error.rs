//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 为查询/应答子系统对外暴露的错误语义提供集中定义；
//! - 区分“解析类错误”（直接返回给调用方）与“生命周期类错误”（会话/Queryable 已关闭、查询超时），
//!   便于调用方决定是否重试。
//!
//! ## 设计要求（What）
//! - 所有错误类型派生 `thiserror::Error`，并保持 `Clone + Eq`，方便测试断言与跨线程传播；
//! - 解析错误不得跨越交付线程边界抛出：它们只出现在 `Selector`/`KeyExpr` 的构造与解析调用点；
//! - 应答晚于关闭属于“本地失败”，只回报给应答方，不会传递给原始查询方。

use thiserror::Error;

use crate::ids::{QueryId, QueryableId};

/// 查询子系统统一的 `Result` 别名。
pub type Result<T, E = QueryError> = core::result::Result<T, E>;

/// 查询/应答核心错误域。
///
/// # 教案式说明
/// - **契约 (What)**：
///   - 所有变体均为 `Send + Sync + 'static`，可安全跨线程传播；
///   - `DuplicateParameter`/`ParameterDecode` 只会在参数解析时出现，且解析失败不产生任何副作用；
///   - `QueryableClosed`/`Timeout`/`SessionClosed` 作为应答方的本地失败信号返回，调用方可以忽略。
/// - **设计权衡 (Trade-offs)**：上下文字段使用 `String` 保存，牺牲少量堆分配换取可读诊断。
#[derive(Error, Clone, Debug, Eq, PartialEq)]
pub enum QueryError {
    /// 键表达式不符合语法。
    #[error("invalid key expression `{key_expr}`: {reason}")]
    InvalidKeyExpr { key_expr: String, reason: String },

    /// 选择器参数中同名参数出现多次，整个解析被中止。
    #[error("duplicated parameter `{key}` detected")]
    DuplicateParameter { key: String },

    /// 参数值的百分号解码失败（非法转义或非 UTF-8 字节序列）。
    #[error("failed to decode parameter `{parameter}`: {reason}")]
    ParameterDecode { parameter: String, reason: String },

    /// 会话已经关闭，无法再声明 Queryable、发起查询或投递应答。
    #[error("session is closed")]
    SessionClosed,

    /// 所属 Queryable 已撤销，应答被丢弃。
    #[error("queryable {queryable} is closed")]
    QueryableClosed { queryable: QueryableId },

    /// 查询方的截止时间已过，关联条目不复存在，应答被丢弃。
    #[error("query {query} is no longer awaiting replies")]
    Timeout { query: QueryId },

    /// 应答的键表达式与查询的键空间不相交。
    #[error("reply key expression `{reply}` does not intersect query key expression `{query}`")]
    KeyExprMismatch { reply: String, query: String },

    /// 会话配置非法。
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// 交付运行时无法启动，属于不可恢复错误，只在 `open` 调用点报告。
    #[error("delivery runtime failure: {detail}")]
    Runtime { detail: String },
}

impl QueryError {
    pub(crate) fn invalid_key_expr(key_expr: &str, reason: impl Into<String>) -> Self {
        QueryError::InvalidKeyExpr {
            key_expr: key_expr.to_owned(),
            reason: reason.into(),
        }
    }

    /// 错误是否源自解析阶段（键表达式或选择器参数）。
    pub fn is_parse_error(&self) -> bool {
        matches!(
            self,
            QueryError::InvalidKeyExpr { .. }
                | QueryError::DuplicateParameter { .. }
                | QueryError::ParameterDecode { .. }
        )
    }
}

impl From<core::convert::Infallible> for QueryError {
    fn from(value: core::convert::Infallible) -> Self {
        match value {}
    }
}

/// 配置加载阶段的错误。
#[derive(Error, Clone, Debug, Eq, PartialEq)]
pub enum ConfigError {
    /// TOML 文本无法反序列化为 [`SessionConfig`](crate::config::SessionConfig)。
    #[error("failed to parse session config: {detail}")]
    Parse { detail: String },

    /// 字段取值越界。
    #[error("invalid value for `{field}`: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl From<toml::de::Error> for ConfigError {
    fn from(value: toml::de::Error) -> Self {
        ConfigError::Parse {
            detail: value.message().to_owned(),
        }
    }
}
