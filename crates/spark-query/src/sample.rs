//! # 样本（Sample）与时间戳
//!
//! `Sample` 是按键表达式寻址的负载单元，既用于发布/订阅，也作为成功应答的内容。
//! 时间戳的生成属于外部协作者，本模块只定义其值类型与 [`Clock`] 接缝。

use core::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::key_expr::KeyExpr;
use crate::qos::{Encoding, QoS};

const FRACTION_BITS: u32 = 32;
const NANOS_PER_SEC: u64 = 1_000_000_000;

/// NTP64 格式的时间戳：高 32 位为 UNIX 纪元以来的秒，低 32 位为秒的小数部分。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const fn from_ntp64(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_ntp64(self) -> u64 {
        self.0
    }

    /// 由 UNIX 纪元以来的时长构造；秒数超出 32 位时按模截断。
    pub fn from_duration(since_epoch: Duration) -> Self {
        let secs = since_epoch.as_secs() & u64::from(u32::MAX);
        let fraction = (u64::from(since_epoch.subsec_nanos()) << FRACTION_BITS) / NANOS_PER_SEC;
        Self((secs << FRACTION_BITS) | fraction)
    }

    /// 早于纪元的系统时间被钳制为纪元本身。
    pub fn from_system_time(time: SystemTime) -> Self {
        Self::from_duration(time.duration_since(UNIX_EPOCH).unwrap_or_default())
    }

    pub fn to_duration(self) -> Duration {
        let secs = self.0 >> FRACTION_BITS;
        let fraction = self.0 & u64::from(u32::MAX);
        let nanos = (fraction * NANOS_PER_SEC) >> FRACTION_BITS;
        Duration::new(secs, nanos as u32)
    }

    pub fn to_system_time(self) -> SystemTime {
        UNIX_EPOCH + self.to_duration()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let duration = self.to_duration();
        write!(f, "{}.{:09}", duration.as_secs(), duration.subsec_nanos())
    }
}

/// 时间戳来源，对应外部协作者 `now()`。
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Timestamp;
}

/// 基于系统墙钟的默认实现。
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_system_time(SystemTime::now())
    }
}

/// 样本类型。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleKind {
    #[default]
    Put,
    Delete,
}

/// 按键表达式寻址的负载。
///
/// # 教案式说明
/// - **契约 (What)**：构造后字段只读；`payload` 使用 [`Bytes`] 共享，克隆零拷贝；
/// - **默认值**：编码为 [`Encoding::default`]，类型为 `Put`，无时间戳，QoS 为默认值。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sample {
    key_expr: KeyExpr,
    payload: Bytes,
    encoding: Encoding,
    kind: SampleKind,
    timestamp: Option<Timestamp>,
    qos: QoS,
    attachment: Option<Bytes>,
}

impl Sample {
    pub fn new(key_expr: KeyExpr, payload: impl Into<Bytes>) -> Self {
        Self {
            key_expr,
            payload: payload.into(),
            encoding: Encoding::default(),
            kind: SampleKind::Put,
            timestamp: None,
            qos: QoS::default(),
            attachment: None,
        }
    }

    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn with_kind(mut self, kind: SampleKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_timestamp(mut self, timestamp: Option<Timestamp>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    pub fn with_attachment(mut self, attachment: Option<Bytes>) -> Self {
        self.attachment = attachment;
        self
    }

    pub fn key_expr(&self) -> &KeyExpr {
        &self.key_expr
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn encoding(&self) -> &Encoding {
        &self.encoding
    }

    pub fn kind(&self) -> SampleKind {
        self.kind
    }

    pub fn timestamp(&self) -> Option<Timestamp> {
        self.timestamp
    }

    pub fn qos(&self) -> QoS {
        self.qos
    }

    pub fn attachment(&self) -> Option<&Bytes> {
        self.attachment.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_keeps_nanosecond_precision_within_rounding() {
        let since_epoch = Duration::new(1_700_000_000, 123_456_789);
        let restored = Timestamp::from_duration(since_epoch).to_duration();
        assert_eq!(restored.as_secs(), since_epoch.as_secs());
        let drift = since_epoch.subsec_nanos().abs_diff(restored.subsec_nanos());
        assert!(drift <= 1, "NTP64 小数位的舍入误差应不超过 1ns，实际 {drift}");
    }

    #[test]
    fn timestamps_order_by_time() {
        let earlier = Timestamp::from_duration(Duration::from_millis(10));
        let later = Timestamp::from_duration(Duration::from_millis(11));
        assert!(earlier < later);
        assert_eq!(earlier.to_string(), "0.009999999");
    }

    #[test]
    fn sample_defaults() {
        let sample = Sample::new(KeyExpr::new("a/b").unwrap(), "hi");
        assert_eq!(sample.kind(), SampleKind::Put);
        assert_eq!(sample.encoding(), &Encoding::default());
        assert_eq!(sample.timestamp(), None);
        assert_eq!(sample.qos(), QoS::default());
        assert_eq!(sample.payload().as_ref(), b"hi");
    }
}
