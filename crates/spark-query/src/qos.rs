//! # 交付质量（QoS）与编码描述
//!
//! 小型值类型，附着在 [`Sample`](crate::sample::Sample) 与 [`Reply`](crate::reply::Reply) 上，
//! 描述调用方对交付优先级、拥塞处理与负载编码的意图。本模块不解释这些意图，
//! 只负责原样携带到查询方。

use core::fmt;

use serde::{Deserialize, Serialize};

/// 七级交付优先级，数值越小越优先。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Priority {
    RealTime = 1,
    InteractiveHigh = 2,
    InteractiveLow = 3,
    DataHigh = 4,
    #[default]
    Data = 5,
    DataLow = 6,
    Background = 7,
}

impl Priority {
    /// 全部优先级，按从高到低排列。
    pub const ALL: [Priority; 7] = [
        Priority::RealTime,
        Priority::InteractiveHigh,
        Priority::InteractiveLow,
        Priority::DataHigh,
        Priority::Data,
        Priority::DataLow,
        Priority::Background,
    ];

    /// 由线上数值还原优先级，越界返回 `None`。
    pub fn from_u8(value: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|priority| *priority as u8 == value)
    }
}

/// 拥塞控制策略：队列满时丢弃还是阻塞等待。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CongestionControl {
    #[default]
    Drop,
    Block,
}

/// 交付质量属性。
///
/// 默认值：`Priority::Data`、非 express、`CongestionControl::Drop`。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QoS {
    pub priority: Priority,
    pub express: bool,
    pub congestion_control: CongestionControl,
}

impl QoS {
    pub fn new(priority: Priority, express: bool, congestion_control: CongestionControl) -> Self {
        Self {
            priority,
            express,
            congestion_control,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_express(mut self, express: bool) -> Self {
        self.express = express;
        self
    }

    pub fn with_congestion_control(mut self, congestion_control: CongestionControl) -> Self {
        self.congestion_control = congestion_control;
        self
    }
}

/// 负载编码：已知编码 ID 加可选 schema。
///
/// # 教案式说明
/// - **契约 (What)**：`id` 取自下方常量表；未知 ID 原样携带，不做校验；
/// - **相等性**：ID 与 schema 同时相等才视为同一编码。
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Encoding {
    id: u16,
    schema: Option<String>,
}

impl Encoding {
    /// 原始字节，默认编码。
    pub const ZENOH_BYTES: Encoding = Encoding::from_id(0);
    /// UTF-8 字符串。
    pub const ZENOH_STRING: Encoding = Encoding::from_id(2);
    pub const APPLICATION_OCTET_STREAM: Encoding = Encoding::from_id(3);
    pub const TEXT_PLAIN: Encoding = Encoding::from_id(4);
    pub const APPLICATION_JSON: Encoding = Encoding::from_id(5);

    const NAMES: [(u16, &'static str); 5] = [
        (0, "zenoh/bytes"),
        (2, "zenoh/string"),
        (3, "application/octet-stream"),
        (4, "text/plain"),
        (5, "application/json"),
    ];

    pub const fn from_id(id: u16) -> Self {
        Self { id, schema: None }
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match Self::NAMES.iter().find(|(id, _)| *id == self.id) {
            Some((_, name)) => f.write_str(name)?,
            None => write!(f, "unknown({})", self.id)?,
        }
        if let Some(schema) = &self.schema {
            write!(f, ";{schema}")?;
        }
        Ok(())
    }
}
