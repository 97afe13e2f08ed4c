//! # spark-connection
//!
//! ## 定位与职责（Why）
//! - 为长连接服务器中的每条逻辑连接协调“传输泵”（在网络边界与管道之间搬运字节）与
//!   “应用泵”（在应用处理器与管道之间搬运字节）的生命周期；
//! - 保证在任意多个并发释放请求下，拆除副作用只执行一次；任一泵的故障都被转发到对侧管道，
//!   所有调用方观察到同一个最终结局。
//!
//! ## 架构嵌入（Where）
//! - `connection`：连接状态与单次释放协调器；
//! - `activity`：由数据路径刷新的活动时钟，供空闲扫描使用；
//! - `fault`：泵故障到对侧管道写半部的映射；
//! - `pump`：外部启动的泵任务句柄；
//! - `pipe`：双工管道契约与内存实现；
//! - `signal`：一次性完成信号；
//! - `manager`：基于 `DashMap` 的连接注册表；
//! - `config`/`error`/`telemetry`：配置、错误码与日志安装入口。
//!
//! ## Feature 策略（Trade-offs）
//! - `telemetry`（默认开启）引入 `tracing-subscriber`，提供 [`telemetry::try_init`]；
//!   关闭后库仍通过 `tracing` 门面输出事件，由宿主自行决定订阅器。

pub mod activity;
pub mod config;

/// 连接状态与释放协调器。
///
/// - **意图说明 (Why)**：把身份、状态、管道、泵句柄与完成信号聚合到单一所有者结构；
/// - **契约定位 (What)**：[`Connection::dispose`] 幂等且并发安全，返回 [`DisposeOutcome`]。
pub mod connection;

/// 错误类型与稳定错误码。
pub mod error;

pub mod fault;
pub mod manager;
pub mod metadata;
pub mod pipe;
pub mod pump;
pub mod signal;
pub mod status;

#[cfg(feature = "telemetry")]
pub mod telemetry;

pub use activity::Activity;
pub use config::ConnectionOptions;
pub use connection::Connection;
pub use error::{
    ConfigError, ConnectionError, DisposeError, DisposeOutcome, PipeError, PumpError, PumpSide,
};
pub use fault::{Propagation, propagate};
pub use manager::ConnectionManager;
pub use metadata::Extensions;
pub use pipe::{DuplexEnd, DuplexPipe, OutputCompletion, PipePair};
pub use pump::{PumpHandle, PumpOutcome};
pub use signal::CompletionSignal;
pub use status::ConnectionStatus;
