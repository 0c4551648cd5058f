//! 应答的三种形态。
//!
//! `Reply` 构造后不可变，由 [`Query`](crate::query::Query) 的 `reply_*` 方法生成，
//! 经会话的关联表路由回发起 `get` 的消费策略。

use bytes::Bytes;

use crate::key_expr::KeyExpr;
use crate::qos::{Encoding, QoS};
use crate::sample::{Sample, Timestamp};

/// 查询方收到的单条应答。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply {
    /// 成功应答，携带完整样本。
    Success(Sample),
    /// 错误应答，负载由应答方自定义。
    Error { payload: Bytes, encoding: Encoding },
    /// 删除通知。
    Delete {
        key_expr: KeyExpr,
        timestamp: Option<Timestamp>,
        qos: QoS,
    },
}

impl Reply {
    pub fn is_success(&self) -> bool {
        matches!(self, Reply::Success(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error { .. })
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, Reply::Delete { .. })
    }

    /// 成功应答的样本。
    pub fn sample(&self) -> Option<&Sample> {
        match self {
            Reply::Success(sample) => Some(sample),
            _ => None,
        }
    }

    /// 应答关联的键表达式；错误应答没有键表达式。
    pub fn key_expr(&self) -> Option<&KeyExpr> {
        match self {
            Reply::Success(sample) => Some(sample.key_expr()),
            Reply::Delete { key_expr, .. } => Some(key_expr),
            Reply::Error { .. } => None,
        }
    }
}
