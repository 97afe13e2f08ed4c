//! # 连接状态（Connection）
//!
//! ## 核心意图（Why）
//! - 为每条逻辑连接维护独立的状态：身份、生命周期、两条双工管道、两个泵句柄与释放结局；
//! - 连接间互不共享锁，任一连接的释放都不会阻塞其他连接。
//!
//! ## 教案式使用指南（How）
//! 1. 调用 [`Connection::new`]（内存管道）或 [`Connection::with_pipes`]（自定义管道）创建连接，
//!    状态为 [`ConnectionStatus::Inactive`]；
//! 2. 外部启动两个泵后，调用 [`attach`](Connection::attach) 记录句柄，并以
//!    [`activate`](Connection::activate) 推进到 `Active`；
//! 3. 任意位置、任意次数、任意并发地调用 [`dispose`](Connection::dispose)，所有调用方得到同一结局。
//!
//! ## 状态机约束（What）
//! - `Inactive → Active → Disposed`，`Inactive` 可直接释放；`Disposed` 为终态；
//! - 状态写入与拆除副作用都在连接锁内完成；读取状态无需拿锁。

mod dispose;

use std::{fmt, sync::Arc, time::Duration};

use tokio::{sync::Mutex as AsyncMutex, time::Instant};
use tracing::{debug, warn};

use crate::{
    activity::Activity,
    config::ConnectionOptions,
    error::{ConnectionError, DisposeOutcome},
    metadata::Extensions,
    pipe::{DuplexEnd, DuplexPipe, PipePair},
    pump::PumpHandle,
    signal::CompletionSignal,
    status::{ConnectionStatus, StatusCell},
};

/// 锁内状态：泵句柄只在锁内读写。
#[derive(Debug, Default)]
struct Lifecycle {
    pumps: Option<Pumps>,
}

#[derive(Debug)]
struct Pumps {
    transport: PumpHandle,
    application: PumpHandle,
}

/// 单条逻辑连接。
///
/// # 教案式说明
/// - **意图 (Why)**：把“谁有权执行拆除”“拆除做了什么”“最终结局是什么”集中在一个拥有所有权的结构里，
///   以显式互斥原语保护，而不是散落在全局状态中；
/// - **契约 (What)**：
///   - `id`：不透明唯一标识，`Arc<str>` 共享；
///   - `transport`/`application`：实现 [`DuplexPipe`] 的两条管道，默认是内存实现 [`DuplexEnd`]；
///   - `lifecycle`：`tokio::sync::Mutex`，锁等待是协作式挂起；
///   - `completion`：一次性完成信号；
///   - `metadata`：协作方数据容器，协调器从不检查；
///   - `activity`：空闲扫描使用的活动时钟，优先沿用管道交出的时钟，由数据路径刷新；
/// - **风险 (Trade-offs)**：连接自身不会在 `Drop` 中触发释放，调用方需显式 `dispose`。
pub struct Connection<P = DuplexEnd> {
    id: Arc<str>,
    status: StatusCell,
    transport: P,
    application: P,
    lifecycle: AsyncMutex<Lifecycle>,
    completion: CompletionSignal,
    metadata: Extensions,
    created_at: Instant,
    activity: Activity,
}

impl Connection<DuplexEnd> {
    /// 以内存管道创建连接，管道容量取自 `options`。
    pub fn new(id: impl Into<Arc<str>>, options: &ConnectionOptions) -> Self {
        let pair = PipePair::new(options);
        Self::with_pipes(id, pair.transport, pair.application)
    }
}

impl<P: DuplexPipe> Connection<P> {
    /// 以调用方提供的两条管道创建连接，初始状态为 `Inactive`。
    pub fn with_pipes(id: impl Into<Arc<str>>, transport: P, application: P) -> Self {
        let activity = transport
            .activity()
            .or_else(|| application.activity())
            .unwrap_or_default();
        Self {
            id: id.into(),
            status: StatusCell::new(ConnectionStatus::Inactive),
            transport,
            application,
            lifecycle: AsyncMutex::new(Lifecycle::default()),
            completion: CompletionSignal::new(),
            metadata: Extensions::new(),
            created_at: Instant::now(),
            activity,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn id_arc(&self) -> &Arc<str> {
        &self.id
    }

    /// 当前状态（无锁读取）。
    pub fn status(&self) -> ConnectionStatus {
        self.status.load()
    }

    /// 应用处理器读写的一端。
    pub fn transport(&self) -> &P {
        &self.transport
    }

    /// 传输泵读写的一端。
    pub fn application(&self) -> &P {
        &self.application
    }

    pub fn metadata(&self) -> &Extensions {
        &self.metadata
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// 手工记录一次活动；内存管道的读写会自动刷新，自定义管道未交出时钟时需调用方续期。
    pub fn mark_seen(&self) {
        self.activity.touch();
    }

    pub fn activity(&self) -> &Activity {
        &self.activity
    }

    pub fn last_seen(&self) -> Instant {
        self.activity.last_seen()
    }

    /// 截至 `now` 的空闲时长。
    pub fn idle_for(&self, now: Instant) -> Duration {
        self.activity.idle_for(now)
    }

    /// 状态推进：`Inactive → Active`。
    ///
    /// - 已是 `Active` 时幂等返回；
    /// - 已释放时返回 [`ConnectionError::InvalidTransition`]。
    pub async fn activate(&self) -> Result<(), ConnectionError> {
        let _lifecycle = self.lifecycle.lock().await;
        let current = self.status.load();
        if !current.can_transition_to(ConnectionStatus::Active) {
            return Err(ConnectionError::InvalidTransition {
                id: self.id.to_string(),
                from: current,
                to: ConnectionStatus::Active,
            });
        }
        self.status.advance(ConnectionStatus::Active);
        if current != ConnectionStatus::Active {
            debug!(connection.id = %self.id, from = %current, to = "active", "connection status advanced");
        }
        Ok(())
    }

    /// 记录外部已启动的两个泵。
    ///
    /// # 教案式注释
    /// - **前置条件**：泵已由外部启动；每个连接至多挂载一次；
    /// - **后置条件**：释放流程将基于这两个句柄探查故障并等待其结束；
    /// - **错误**：
    ///   - 连接已释放：两个句柄被中止（避免泵在已拆除的管道上泄漏），返回
    ///     [`ConnectionError::AlreadyDisposed`]；
    ///   - 重复挂载：返回 [`ConnectionError::PumpsAlreadyAttached`]，新句柄原样不动。
    pub async fn attach(
        &self,
        transport_pump: PumpHandle,
        application_pump: PumpHandle,
    ) -> Result<(), ConnectionError> {
        let mut lifecycle = self.lifecycle.lock().await;
        if self.status.load().is_terminal() {
            drop(lifecycle);
            transport_pump.abort();
            application_pump.abort();
            warn!(connection.id = %self.id, "pumps attached after disposal were aborted");
            return Err(ConnectionError::AlreadyDisposed {
                id: self.id.to_string(),
            });
        }
        if lifecycle.pumps.is_some() {
            return Err(ConnectionError::PumpsAlreadyAttached {
                id: self.id.to_string(),
            });
        }
        lifecycle.pumps = Some(Pumps {
            transport: transport_pump,
            application: application_pump,
        });
        debug!(connection.id = %self.id, "pumps attached");
        Ok(())
    }

    /// 等待释放结局，但不触发释放。
    pub async fn disposed(&self) -> DisposeOutcome {
        self.completion.wait().await
    }

    /// 非阻塞读取释放结局；尚未释放完成时返回 `None`。
    pub fn outcome(&self) -> Option<DisposeOutcome> {
        self.completion.get()
    }
}

impl<P> fmt::Debug for Connection<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("status", &self.status.load())
            .field("outcome", &self.completion.get())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::PumpSide, pump::PumpOutcome};

    fn finished(side: PumpSide) -> PumpHandle {
        PumpHandle::finished(side, PumpOutcome::Succeeded)
    }

    #[tokio::test]
    async fn status_starts_inactive_and_advances() {
        let connection = Connection::new("conn-a", &ConnectionOptions::default());
        assert_eq!(connection.status(), ConnectionStatus::Inactive);

        connection.activate().await.expect("activate");
        connection.activate().await.expect("activate is idempotent");
        assert_eq!(connection.status(), ConnectionStatus::Active);
    }

    #[tokio::test]
    async fn activation_after_disposal_is_rejected() {
        let connection = Connection::new("conn-b", &ConnectionOptions::default());
        connection.dispose().await.expect("dispose");

        let err = connection.activate().await.expect_err("terminal status");
        assert_eq!(
            err,
            ConnectionError::InvalidTransition {
                id: "conn-b".to_owned(),
                from: ConnectionStatus::Disposed,
                to: ConnectionStatus::Active,
            }
        );
    }

    #[tokio::test]
    async fn pumps_attach_only_once() {
        let connection = Connection::new("conn-c", &ConnectionOptions::default());
        connection
            .attach(finished(PumpSide::Transport), finished(PumpSide::Application))
            .await
            .expect("first attach");

        let err = connection
            .attach(finished(PumpSide::Transport), finished(PumpSide::Application))
            .await
            .expect_err("second attach");
        assert_eq!(err.code(), "spark.connection.pumps_attached");
    }

    #[tokio::test]
    async fn attaching_after_disposal_aborts_the_pumps() {
        let connection = Connection::new("conn-d", &ConnectionOptions::default());
        connection.dispose().await.expect("dispose");

        let transport = PumpHandle::spawn(PumpSide::Transport, std::future::pending());
        let application = PumpHandle::spawn(PumpSide::Application, std::future::pending());
        let err = connection
            .attach(transport.clone(), application.clone())
            .await
            .expect_err("disposed connection rejects pumps");

        assert_eq!(err.code(), "spark.connection.already_disposed");
        assert_eq!(transport.wait().await, PumpOutcome::Cancelled);
        assert_eq!(application.wait().await, PumpOutcome::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_time_tracks_last_activity() {
        let connection = Connection::new("conn-e", &ConnectionOptions::default());
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(connection.idle_for(Instant::now()), Duration::from_secs(5));

        connection.mark_seen();
        assert_eq!(connection.idle_for(Instant::now()), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn pipe_traffic_keeps_the_connection_fresh() {
        let connection = Connection::new("conn-g", &ConnectionOptions::default());
        tokio::time::advance(Duration::from_secs(5)).await;

        connection
            .application()
            .write(&b"frame"[..])
            .await
            .expect("transport pump writes");
        assert_eq!(connection.idle_for(Instant::now()), Duration::ZERO);

        tokio::time::advance(Duration::from_secs(2)).await;
        connection.transport().read().await.expect("handler reads");
        assert_eq!(connection.idle_for(Instant::now()), Duration::ZERO);
    }

    #[test]
    fn metadata_is_carried_opaquely() {
        let connection = Connection::new("conn-f", &ConnectionOptions::default());
        connection.metadata().insert(String::from("user-42"));
        assert_eq!(
            connection.metadata().get::<String>().as_deref().map(String::as_str),
            Some("user-42")
        );
    }
}
