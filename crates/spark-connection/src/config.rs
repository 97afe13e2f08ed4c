//! 连接配置。
//!
//! # 教案式说明
//! - **意图 (Why)**：管道容量、空闲超时与 ID 前缀属于部署期参数，应能从配置文件装载而非硬编码；
//! - **契约 (What)**：[`ConnectionOptions`] 所有字段均有默认值，TOML 中缺省的字段回落到默认；
//!   [`ConnectionOptions::from_toml_str`] 在解析后执行 [`validate`](ConnectionOptions::validate)；
//! - **风险 (Trade-offs)**：容量以数据段而非字节计，单段大小由泵决定。

use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

const DEFAULT_PIPE_CAPACITY: usize = 64;
const DEFAULT_ID_PREFIX: &str = "conn";

/// 单个连接及连接管理器的可调参数。
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ConnectionOptions {
    /// 传输 → 应用方向的缓冲段数。
    pub transport_capacity: usize,
    /// 应用 → 传输方向的缓冲段数。
    pub application_capacity: usize,
    /// 空闲超时（毫秒）；`None` 表示管理器扫描时不回收空闲连接。
    pub idle_timeout_ms: Option<u64>,
    /// 管理器生成连接 ID 时使用的前缀。
    pub id_prefix: String,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            transport_capacity: DEFAULT_PIPE_CAPACITY,
            application_capacity: DEFAULT_PIPE_CAPACITY,
            idle_timeout_ms: None,
            id_prefix: DEFAULT_ID_PREFIX.to_owned(),
        }
    }
}

impl ConnectionOptions {
    /// 从 TOML 文本解析并校验配置。
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let options: ConnectionOptions = toml::from_str(input)?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.transport_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "transport_capacity",
                reason: "capacity must be greater than zero".to_owned(),
            });
        }
        if self.application_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "application_capacity",
                reason: "capacity must be greater than zero".to_owned(),
            });
        }
        if self.id_prefix.is_empty() {
            return Err(ConfigError::Invalid {
                field: "id_prefix",
                reason: "prefix must not be empty".to_owned(),
            });
        }
        Ok(())
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_ms.map(Duration::from_millis)
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn with_capacity(mut self, transport: usize, application: usize) -> Self {
        self.transport_capacity = transport;
        self.application_capacity = application;
        self
    }
}
