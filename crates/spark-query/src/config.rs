//! # 会话配置
//!
//! 核心逻辑只读取与查询子系统相关的少量字段，其余配置由外部传输层自行解释。
//! 所有字段都有默认值，空 TOML 文本即可得到可用配置。

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const DEFAULT_QUERY_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_DELIVERY_THREADS: usize = 2;
const DEFAULT_THREAD_NAME: &str = "spark-query";

/// [`Session::open`](crate::Session::open) 的输入。
///
/// # 教案式说明
/// - **契约 (What)**：
///   - `query_timeout_ms`：`get` 未显式指定超时时使用的默认值；
///   - `delivery_threads`：会话自有交付运行时的工作线程数，必须大于 0；
///   - `thread_name`：交付线程名前缀，便于在日志与线程转储中辨认。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    pub query_timeout_ms: u64,
    pub delivery_threads: usize,
    pub thread_name: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            query_timeout_ms: DEFAULT_QUERY_TIMEOUT_MS,
            delivery_threads: DEFAULT_DELIVERY_THREADS,
            thread_name: DEFAULT_THREAD_NAME.to_owned(),
        }
    }
}

impl SessionConfig {
    /// 解析 TOML 文本并校验取值。
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: SessionConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.delivery_threads == 0 {
            return Err(ConfigError::InvalidValue {
                field: "delivery_threads",
                reason: "must be greater than zero".into(),
            });
        }
        if self.thread_name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "thread_name",
                reason: "must not be blank".into(),
            });
        }
        Ok(())
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_delivery_threads(mut self, threads: usize) -> Self {
        self.delivery_threads = threads;
        self
    }
}
