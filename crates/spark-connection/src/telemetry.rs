//! # telemetry：日志订阅器安装入口
//!
//! ## 意图（Why）
//! - 协调器内部只依赖 `tracing` 门面；宿主进程若没有自己的订阅器，可调用 [`try_init`]
//!   装配 `fmt + EnvFilter` 输出，看到 `connection.dispose` span 与故障转发告警。
//!
//! ## 契约（What）
//! - `RUST_LOG` 存在且合法时优先生效，否则使用 `default_directive`（如 `"info"`、
//!   `"spark_connection=debug"`）；
//! - 全局订阅器已被设置时返回 [`TelemetryError::AlreadyInstalled`]，不会覆盖已有配置。

use thiserror::Error;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// 订阅器安装失败。
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("global tracing subscriber is already installed")]
    AlreadyInstalled(#[from] tracing_subscriber::util::TryInitError),
}

impl TelemetryError {
    pub fn code(&self) -> &'static str {
        match self {
            TelemetryError::AlreadyInstalled(_) => "spark.connection.telemetry.already_installed",
        }
    }
}

/// 安装全局 `tracing` 订阅器。
pub fn try_init(default_directive: &str) -> Result<(), TelemetryError> {
    tracing_subscriber::registry()
        .with(build_env_filter(default_directive))
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;
    Ok(())
}

fn build_env_filter(default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive))
}
