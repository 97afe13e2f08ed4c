//! # 释放协调器
//!
//! ## 设计动机（Why）
//! - 多个调用方可能同时请求释放（两个泵各自结束、外部超时），两个泵也可能各自独立失败；
//!   协调器必须保证拆除副作用只执行一次、故障不被吞掉、所有调用方得到同一结局；
//! - 拆除是 single-flight：首个调用方执行，其余调用方等待一次性完成信号。
//!
//! ## 执行流程（How）
//! 1. 获取连接锁（协作式挂起，不影响其他连接）；
//! 2. 若已是 `Disposed`：立即释放锁，等待完成信号并返回其结局；
//! 3. 否则在锁内将状态置为 `Disposed`，这是唯一放行拆除路径的位置；
//! 4. 在锁内执行故障传播（见 [`crate::fault`]），并取走泵句柄；
//! 5. 释放锁，慢泵不会挡住后续调用方进入第 2 步；
//! 6. 以 `tokio::join!` 联合等待两个泵，按“故障 > 取消 > 成功”归并结局；
//! 7. 将结局写入完成信号并返回。
//!
//! ## 取消语义（What）
//! - 联合等待被取消即执行拆除的 Future 被丢弃（例如外部 `tokio::time::timeout`）；
//!   此时 [`SettleOnDrop`] 把 [`DisposeError::Cancelled`] 写入完成信号，当前与之后的观察者都不会悬挂；
//! - 已完成的管道半部不可撤销。

use tracing::{Instrument, debug, error, info, info_span, warn};

use super::{Connection, Pumps};
use crate::{
    error::{DisposeError, DisposeOutcome, PumpSide},
    fault::{self, Propagation},
    pipe::DuplexPipe,
    pump::PumpOutcome,
    signal::CompletionSignal,
    status::ConnectionStatus,
};

impl<P: DuplexPipe> Connection<P> {
    /// 请求释放连接，返回连接的最终结局。
    ///
    /// # 教案式注释
    /// - **契约 (What)**：幂等，可在任意状态、任意并发下调用；所有调用方得到相同的 [`DisposeOutcome`]，
    ///   包括失败或取消的结局，重复调用不会产生新的“已释放”错误；
    /// - **前置条件**：无；未挂载泵时视两泵均已完成，释放在完成管道后立即成功；
    /// - **后置条件**：状态为 `Disposed`，四个管道半部各被完成一次，完成信号已设置
    ///   （除非本调用方的 Future 在等待泵期间被丢弃，此时信号被设置为取消）。
    pub async fn dispose(&self) -> DisposeOutcome {
        let span = info_span!("connection.dispose", connection.id = %self.id);
        self.dispose_inner().instrument(span).await
    }

    async fn dispose_inner(&self) -> DisposeOutcome {
        let pumps = {
            let mut lifecycle = self.lifecycle.lock().await;
            let previous = self.status.load();
            if previous.is_terminal() {
                drop(lifecycle);
                debug!("connection already disposed, awaiting recorded outcome");
                return self.completion.wait().await;
            }

            self.status.advance(ConnectionStatus::Disposed);
            let pumps = lifecycle.pumps.take();
            let propagation = fault::propagate(
                &self.transport,
                &self.application,
                pumps.as_ref().map(|pumps| &pumps.transport),
                pumps.as_ref().map(|pumps| &pumps.application),
            );
            log_teardown(previous, pumps.is_some(), &propagation);
            pumps
        };

        let mut guard = SettleOnDrop::new(&self.completion, &self.id);
        let outcome = join_pumps(pumps).await;
        guard.disarm();
        self.settle(outcome)
    }

    fn settle(&self, outcome: DisposeOutcome) -> DisposeOutcome {
        match self.completion.set(outcome.clone()) {
            Ok(_) => {
                match &outcome {
                    Ok(()) => info!("connection disposed"),
                    Err(err) => warn!(code = err.code(), error = %err, "connection disposed with failure"),
                }
                outcome
            }
            Err(violation) => {
                let violation = violation.with_connection_id(&self.id);
                error!(code = violation.code(), error = %violation, "completion signal conflict");
                self.completion.get().unwrap_or(outcome)
            }
        }
    }
}

fn log_teardown(previous: ConnectionStatus, attached: bool, propagation: &Propagation) {
    info!(from = %previous, pumps_attached = attached, "connection teardown started");
    if let Some(fault) = &propagation.to_application {
        warn!(pump = %PumpSide::Transport, error = %fault, "forwarded pump fault to application pipe writer");
    }
    if let Some(fault) = &propagation.to_transport {
        warn!(pump = %PumpSide::Application, error = %fault, "forwarded pump fault to transport pipe writer");
    }
}

/// 联合等待两个泵；未挂载视为已完成。
async fn join_pumps(pumps: Option<Pumps>) -> DisposeOutcome {
    let Some(pumps) = pumps else {
        return Ok(());
    };
    let (transport, application) = tokio::join!(pumps.transport.wait(), pumps.application.wait());
    resolve(transport, application)
}

/// 归并两个泵的结局：两泵皆故障时保留两者，单一故障优先于取消，取消优先于成功。
fn resolve(transport: PumpOutcome, application: PumpOutcome) -> DisposeOutcome {
    match (transport, application) {
        (PumpOutcome::Failed(transport), PumpOutcome::Failed(application)) => {
            Err(DisposeError::BothPumpsFaulted {
                transport,
                application,
            })
        }
        (PumpOutcome::Failed(error), _) => Err(DisposeError::PumpFault {
            side: PumpSide::Transport,
            error,
        }),
        (_, PumpOutcome::Failed(error)) => Err(DisposeError::PumpFault {
            side: PumpSide::Application,
            error,
        }),
        (PumpOutcome::Cancelled, _) | (_, PumpOutcome::Cancelled) => Err(DisposeError::Cancelled),
        (PumpOutcome::Succeeded, PumpOutcome::Succeeded) => Ok(()),
    }
}

/// 拆除调用方的 Future 在等待泵期间被丢弃时，把取消写入完成信号。
struct SettleOnDrop<'a> {
    signal: &'a CompletionSignal,
    id: &'a str,
    armed: bool,
}

impl<'a> SettleOnDrop<'a> {
    fn new(signal: &'a CompletionSignal, id: &'a str) -> Self {
        Self {
            signal,
            id,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for SettleOnDrop<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match self.signal.set(Err(DisposeError::Cancelled)) {
            Ok(_) => warn!(connection.id = %self.id, "pump wait cancelled, disposal settled as cancelled"),
            Err(violation) => {
                let violation = violation.with_connection_id(self.id);
                error!(code = violation.code(), error = %violation, "completion signal conflict");
            }
        }
    }
}
