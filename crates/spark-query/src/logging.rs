//! # 日志安装入口
//!
//! 库代码只通过 `tracing` 门面打点；是否以及如何输出由宿主进程决定。
//! 没有自有日志基础设施的宿主可以调用 [`install`] 获得一个开箱即用的
//! `fmt + EnvFilter` 订阅者，过滤级别默认 `info`，可通过 `RUST_LOG` 覆盖。

use std::sync::OnceLock;

use thiserror::Error;
use tracing::dispatcher;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt};

/// 安装状态的全局标记，确保 `install` 仅生效一次。
static INSTALLED: OnceLock<()> = OnceLock::new();

/// 日志安装失败的原因。
#[derive(Error, Debug)]
pub enum LoggingError {
    /// `install` 被重复调用。
    #[error("spark-query logging is already installed")]
    AlreadyInstalled,
    /// 外部已设置全局 `tracing` 订阅者，无法覆盖。
    #[error("a global tracing subscriber is already set")]
    SubscriberAlreadySet,
    /// 设置全局订阅者时发生竞态失败。
    #[error("failed to set global subscriber: {0}")]
    SetGlobalSubscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// 安装全局日志订阅者。
///
/// # 教案式说明
/// - **执行 (How)**：
///   1. 检查本模块是否已安装、外部是否已设置订阅者；
///   2. 组装 `registry + EnvFilter + fmt` 层并设为全局默认；
///   3. 写入安装标记。
/// - **契约 (What)**：重复调用返回 [`LoggingError::AlreadyInstalled`]；
///   外部已配置订阅者时返回 [`LoggingError::SubscriberAlreadySet`]。
pub fn install() -> Result<(), LoggingError> {
    if INSTALLED.get().is_some() {
        return Err(LoggingError::AlreadyInstalled);
    }
    if dispatcher::has_been_set() {
        return Err(LoggingError::SubscriberAlreadySet);
    }

    let subscriber = tracing_subscriber::registry()
        .with(build_env_filter())
        .with(tracing_subscriber::fmt::layer().with_thread_names(true));
    tracing::subscriber::set_global_default(subscriber)?;

    INSTALLED
        .set(())
        .map_err(|_| LoggingError::AlreadyInstalled)
}

fn build_env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}
