//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 集中定义连接生命周期协调器对外暴露的全部错误语义：泵故障、释放结局、生命周期误用、
//!   管道读写失败与配置解析失败；
//! - 每个枚举都提供稳定的 `code()`（`spark.connection.*`），便于日志与告警按错误码聚合。
//!
//! ## 设计要求（What）
//! - 所有错误类型派生 `thiserror::Error`，兼容 `std::error::Error`；
//! - [`DisposeError`] 需要在任意多个观察者之间共享，因此实现 `Clone + Eq`，
//!   其中 [`PumpError`] 以 `Arc` 共享底层原因，相等性按“同一故障实例”判定。

use std::{borrow::Cow, error::Error as StdError, fmt, io, sync::Arc};

use thiserror::Error;

use crate::status::ConnectionStatus;

/// 泵的角色标识。
///
/// - **Transport**：在传输边界与管道之间搬运字节的泵（泵 A）；
/// - **Application**：在应用处理器与管道之间搬运字节的泵（泵 B）。
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum PumpSide {
    Transport,
    Application,
}

impl PumpSide {
    /// 返回对侧泵。
    pub fn opposite(self) -> Self {
        match self {
            PumpSide::Transport => PumpSide::Application,
            PumpSide::Application => PumpSide::Transport,
        }
    }

    /// 用于日志字段的稳定标签。
    pub fn as_str(self) -> &'static str {
        match self {
            PumpSide::Transport => "transport",
            PumpSide::Application => "application",
        }
    }
}

impl fmt::Display for PumpSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 泵在运行期间产生的应用层故障。
///
/// # 教案式说明
/// - **意图 (Why)**：同一故障需要同时写入对侧管道的写半部、并作为释放结局返回给所有调用方，
///   因此必须廉价克隆且保留底层原因；
/// - **契约 (What)**：
///   - 克隆共享同一个 `Arc`，`==` 比较的是故障实例身份而非文本，保证“所有观察者看到的是同一个故障”；
///   - [`downcast_ref`](Self::downcast_ref) 暴露底层错误的具体类型，例如 `io::Error`；
/// - **风险 (Trade-offs)**：两个文本完全一致但独立构造的故障互不相等，这是刻意的身份语义。
#[derive(Clone)]
pub struct PumpError {
    inner: Arc<dyn StdError + Send + Sync + 'static>,
}

impl PumpError {
    /// 包装任意底层错误。
    pub fn new(error: impl StdError + Send + Sync + 'static) -> Self {
        Self {
            inner: Arc::new(error),
        }
    }

    /// 以纯文本描述构造故障，适用于没有底层错误类型的场景（如泵 panic）。
    pub fn msg(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(MessageError(message.into()))
    }

    /// 尝试将底层原因还原为具体错误类型。
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: StdError + 'static,
    {
        self.inner.downcast_ref::<E>()
    }

    /// 判断两个句柄是否指向同一故障实例。
    pub fn same_fault(&self, other: &PumpError) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for PumpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PumpError").field(&self.inner).finish()
    }
}

impl fmt::Display for PumpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner, f)
    }
}

/// 底层错误本身即是 `source`，错误链由此延伸到 `io::Error` 等具体类型。
impl StdError for PumpError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(&*self.inner)
    }
}

impl PartialEq for PumpError {
    fn eq(&self, other: &Self) -> bool {
        self.same_fault(other)
    }
}

impl Eq for PumpError {}

impl From<io::Error> for PumpError {
    fn from(value: io::Error) -> Self {
        PumpError::new(value)
    }
}

#[derive(Debug)]
struct MessageError(Cow<'static, str>);

impl fmt::Display for MessageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl StdError for MessageError {}

/// 连接释放的最终结局（失败分支）。
///
/// # 教案式说明
/// - **意图 (Why)**：释放结局被记录进一次性完成信号后，所有并发或后续的 `dispose` 调用都要拿到
///   “同一个”结果，因此该类型必须可克隆、可比较；
/// - **契约 (What)**：
///   - `Cancelled`：两泵的联合等待被取消（调用方 Future 被丢弃），或某个泵被中止且无泵失败；
///   - `PumpFault`：恰有一个泵以故障结束；`side` 指出故障来源；
///   - `BothPumpsFaulted`：两个泵都以故障结束，二者同时保留，不丢弃任何一方；
/// - **风险 (Trade-offs)**：重复调用 `dispose` 不会生成新的“已释放”错误，而是原样返回该结局。
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum DisposeError {
    #[error("connection disposal was cancelled before both pumps completed")]
    Cancelled,
    #[error("{side} pump faulted: {error}")]
    PumpFault { side: PumpSide, error: PumpError },
    #[error("both pumps faulted (transport: {transport}; application: {application})")]
    BothPumpsFaulted {
        transport: PumpError,
        application: PumpError,
    },
}

impl DisposeError {
    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            DisposeError::Cancelled => "spark.connection.dispose_cancelled",
            DisposeError::PumpFault { .. } => "spark.connection.pump_faulted",
            DisposeError::BothPumpsFaulted { .. } => "spark.connection.pumps_faulted",
        }
    }

    /// 读取指定泵的故障（若该泵参与了本次失败）。
    pub fn pump_error(&self, side: PumpSide) -> Option<&PumpError> {
        match (self, side) {
            (DisposeError::PumpFault { side: faulted, error }, side) if *faulted == side => {
                Some(error)
            }
            (DisposeError::BothPumpsFaulted { transport, .. }, PumpSide::Transport) => {
                Some(transport)
            }
            (DisposeError::BothPumpsFaulted { application, .. }, PumpSide::Application) => {
                Some(application)
            }
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, DisposeError::Cancelled)
    }
}

/// 连接释放结局：`Ok(())` 表示两泵均正常结束。
pub type DisposeOutcome = Result<(), DisposeError>;

/// 连接生命周期层面的错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：区分“调用方误用生命周期”（如释放后再挂载泵）与“协调不变量被破坏”
///   两类问题；前者可由调用方处理，后者属于致命缺陷，只会以 ERROR 日志与该错误暴露；
/// - **契约 (What)**：每个变体都携带连接 ID，便于排障；
///   [`with_connection_id`](Self::with_connection_id) 供只持有局部上下文的组件事后补齐。
#[derive(Clone, Debug, Eq, Error, PartialEq)]
#[non_exhaustive]
pub enum ConnectionError {
    #[error("connection `{id}` is already disposed")]
    AlreadyDisposed { id: String },

    #[error("invalid status transition for connection `{id}`: {from:?} -> {to:?} is not permitted")]
    InvalidTransition {
        id: String,
        from: ConnectionStatus,
        to: ConnectionStatus,
    },

    #[error("pumps are already attached to connection `{id}`")]
    PumpsAlreadyAttached { id: String },

    #[error("connection `{id}` is already registered")]
    DuplicateId { id: String },

    #[error("connection `{id}` is not registered")]
    NotFound { id: String },

    /// 协调不变量被破坏，例如完成信号被以不同值重复设置。正常运行中绝不应出现。
    #[error("coordination invariant violated on connection `{id}`: {detail}")]
    InvariantViolation { id: String, detail: String },
}

impl ConnectionError {
    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            ConnectionError::AlreadyDisposed { .. } => "spark.connection.already_disposed",
            ConnectionError::InvalidTransition { .. } => "spark.connection.invalid_transition",
            ConnectionError::PumpsAlreadyAttached { .. } => "spark.connection.pumps_attached",
            ConnectionError::DuplicateId { .. } => "spark.connection.duplicate_id",
            ConnectionError::NotFound { .. } => "spark.connection.not_found",
            ConnectionError::InvariantViolation { .. } => "spark.connection.invariant_violation",
        }
    }

    /// 为错误附加连接 ID 上下文。
    pub fn with_connection_id(self, connection_id: &str) -> Self {
        let id = connection_id.to_owned();
        match self {
            ConnectionError::AlreadyDisposed { .. } => ConnectionError::AlreadyDisposed { id },
            ConnectionError::InvalidTransition { from, to, .. } => {
                ConnectionError::InvalidTransition { id, from, to }
            }
            ConnectionError::PumpsAlreadyAttached { .. } => {
                ConnectionError::PumpsAlreadyAttached { id }
            }
            ConnectionError::DuplicateId { .. } => ConnectionError::DuplicateId { id },
            ConnectionError::NotFound { .. } => ConnectionError::NotFound { id },
            ConnectionError::InvariantViolation { detail, .. } => {
                ConnectionError::InvariantViolation { id, detail }
            }
        }
    }
}

/// 管道读写错误。
///
/// - `ReaderCompleted`：读半部已完成，写入被拒绝；或本端读半部已被本地完成；
/// - `WriterCompleted`：本端写半部已完成，不能继续写入；
/// - `Faulted`：对端写半部携带故障完成，缓冲数据读尽后向读者暴露该故障。
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum PipeError {
    #[error("pipe reader has completed")]
    ReaderCompleted,
    #[error("pipe writer has completed")]
    WriterCompleted,
    #[error("pipe faulted: {0}")]
    Faulted(PumpError),
}

impl PipeError {
    pub fn code(&self) -> &'static str {
        match self {
            PipeError::ReaderCompleted => "spark.connection.pipe.reader_completed",
            PipeError::WriterCompleted => "spark.connection.pipe.writer_completed",
            PipeError::Faulted(_) => "spark.connection.pipe.faulted",
        }
    }
}

/// 连接配置加载错误。
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse connection options: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid connection option `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pump_error_equality_is_identity() {
        let fault = PumpError::from(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
        let shared = fault.clone();
        let lookalike = PumpError::from(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));

        assert_eq!(fault, shared);
        assert_ne!(fault, lookalike, "文本相同但实例不同的故障不应相等");
        assert_eq!(fault.to_string(), "reset");
        assert_eq!(
            fault.downcast_ref::<io::Error>().map(io::Error::kind),
            Some(io::ErrorKind::ConnectionReset)
        );
    }

    #[test]
    fn source_chain_reaches_the_wrapped_error() {
        let fault = PumpError::from(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));

        let source = fault.source().expect("wrapped error is the source");
        assert_eq!(
            source.downcast_ref::<io::Error>().map(io::Error::kind),
            Some(io::ErrorKind::ConnectionReset)
        );
        assert!(source.source().is_none());

        let plain = PumpError::msg("handler crashed");
        assert_eq!(
            plain.source().map(ToString::to_string),
            Some("handler crashed".to_owned())
        );
    }

    #[test]
    fn dispose_error_exposes_pump_faults_by_side() {
        let transport = PumpError::msg("transport broke");
        let application = PumpError::msg("handler broke");

        let single = DisposeError::PumpFault {
            side: PumpSide::Application,
            error: application.clone(),
        };
        assert_eq!(single.pump_error(PumpSide::Application), Some(&application));
        assert_eq!(single.pump_error(PumpSide::Transport), None);
        assert_eq!(single.code(), "spark.connection.pump_faulted");

        let both = DisposeError::BothPumpsFaulted {
            transport: transport.clone(),
            application: application.clone(),
        };
        assert_eq!(both.pump_error(PumpSide::Transport), Some(&transport));
        assert_eq!(both.pump_error(PumpSide::Application), Some(&application));
        assert!(!both.is_cancelled());
    }

    #[test]
    fn connection_error_receives_id_afterwards() {
        let err = ConnectionError::InvariantViolation {
            id: String::new(),
            detail: "signal set twice".to_owned(),
        }
        .with_connection_id("conn-7");

        assert_eq!(
            err.to_string(),
            "coordination invariant violated on connection `conn-7`: signal set twice"
        );
        assert_eq!(err.code(), "spark.connection.invariant_violation");
    }
}
