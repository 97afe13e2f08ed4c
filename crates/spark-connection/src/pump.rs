//! # 泵句柄
//!
//! ## 意图（Why）
//! - 传输泵与应用泵由外部启动，本 crate 只需要两件事：在释放时**无阻塞地**探查泵是否已经以故障结束，
//!   以及在释放后**协作式地**等待泵结束；
//! - `tokio::task::JoinHandle` 只能被等待一次且不能查看已完成的结果，因此在泵 Future 外包一层
//!   发布器，把结局写入 `watch` 通道，供任意次数的查看与等待。
//!
//! ## 契约（What）
//! - [`PumpHandle::spawn`] 在当前 Tokio 运行时上启动泵，[`PumpHandle::from_join_handle`] 接管已启动的任务；泵返回 `Ok(())` 记为成功，`Err` 记为故障；
//! - 泵被中止（Future 被丢弃）记为 [`PumpOutcome::Cancelled`]；泵 panic 记为带 panic 说明的故障；
//! - 句柄可克隆，所有克隆观察同一结局。
//!
//! ## 风险与考量（Trade-offs）
//! - `spawn` 启动的泵在 Future 返回的同一次轮询内发布结局，`peek` 与泵的真实完成之间不存在调度间隙；
//! - `from_join_handle` 接管的任务由观察任务转发结局，观察任务可能尚未被调度；因此 `JoinHandle`
//!   保存在句柄共享的槽位中，`peek`/`fault` 发现任务已结束时会就地取走结果并发布，
//!   保证释放时的故障探查不依赖观察任务的调度时机；
//! - 调用方若在泵返回前调用 `peek`，自然只能看到 `None`。

use std::{
    future::Future,
    panic::AssertUnwindSafe,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use futures::{FutureExt, future::poll_fn};
use parking_lot::Mutex;
use tokio::{
    sync::watch,
    task::{AbortHandle, JoinError, JoinHandle},
};
use tracing::debug;

use crate::error::{PumpError, PumpSide};

/// 单个泵的结局。
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PumpOutcome {
    Succeeded,
    Failed(PumpError),
    Cancelled,
}

impl PumpOutcome {
    pub fn fault(&self) -> Option<&PumpError> {
        match self {
            PumpOutcome::Failed(error) => Some(error),
            _ => None,
        }
    }
}

impl From<Result<(), PumpError>> for PumpOutcome {
    fn from(value: Result<(), PumpError>) -> Self {
        match value {
            Ok(()) => PumpOutcome::Succeeded,
            Err(error) => PumpOutcome::Failed(error),
        }
    }
}

type PumpJoin = JoinHandle<Result<(), PumpError>>;

/// 外部泵操作的句柄。
#[derive(Clone, Debug)]
pub struct PumpHandle {
    side: PumpSide,
    outcome: watch::Receiver<Option<PumpOutcome>>,
    abort: Option<Arc<AbortHandle>>,
    adopted: Option<Arc<Adopted>>,
}

impl PumpHandle {
    /// 在当前 Tokio 运行时上启动泵并返回句柄。
    ///
    /// # 教案式注释
    /// - **前置条件**：必须在 Tokio 运行时上下文中调用；
    /// - **执行 (How)**：泵 Future 与内部发布器一同移入任务；正常返回时发布成功/故障，
    ///   panic 在任务内被捕获并记为故障；任务被中止时由 `Publisher::drop` 补发取消结局，
    ///   保证等待者不会悬挂。
    pub fn spawn<F>(side: PumpSide, pump: F) -> Self
    where
        F: Future<Output = Result<(), PumpError>> + Send + 'static,
    {
        let (sender, outcome) = watch::channel(None);
        let mut publisher = Publisher {
            side,
            sender: Some(sender),
        };
        let task = tokio::spawn(async move {
            let outcome = match AssertUnwindSafe(pump).catch_unwind().await {
                Ok(result) => PumpOutcome::from(result),
                Err(_) => PumpOutcome::Failed(PumpError::msg(format!("{side} pump panicked"))),
            };
            publisher.publish(outcome);
        });
        Self {
            side,
            outcome,
            abort: Some(Arc::new(task.abort_handle())),
            adopted: None,
        }
    }

    /// 接管一个已由调用方自行启动的泵任务。
    ///
    /// # 教案式注释
    /// - **前置条件**：必须在 Tokio 运行时上下文中调用，内部会额外启动一个观察任务；
    /// - **契约 (What)**：任务 panic 记为故障，任务被中止记为取消；`abort` 作用于原任务；
    /// - **执行 (How)**：`JoinHandle` 放入共享槽位，观察任务与 `peek` 谁先拿到结果谁发布，
    ///   结局只发布一次。
    pub fn from_join_handle(side: PumpSide, join: JoinHandle<Result<(), PumpError>>) -> Self {
        let abort = join.abort_handle();
        let (sender, outcome) = watch::channel(None);
        let adopted = Arc::new(Adopted {
            side,
            join: Mutex::new(Some(join)),
            sender,
        });
        let watcher = Watcher(Arc::clone(&adopted));
        tokio::spawn(async move {
            poll_fn(|cx| watcher.0.poll_join(cx)).await;
        });
        Self {
            side,
            outcome,
            abort: Some(Arc::new(abort)),
            adopted: Some(adopted),
        }
    }

    /// 构造一个已经结束的泵句柄，适用于泵在挂载前就已结束的场景。
    pub fn finished(side: PumpSide, outcome: PumpOutcome) -> Self {
        let (_, receiver) = watch::channel(Some(outcome));
        Self {
            side,
            outcome: receiver,
            abort: None,
            adopted: None,
        }
    }

    pub fn side(&self) -> PumpSide {
        self.side
    }

    /// 无阻塞地查看泵结局；泵仍在运行时返回 `None`。
    pub fn peek(&self) -> Option<PumpOutcome> {
        self.collect_adopted();
        self.outcome.borrow().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.collect_adopted();
        self.outcome.borrow().is_some()
    }

    /// 若泵已以故障结束，返回该故障。
    pub fn fault(&self) -> Option<PumpError> {
        self.collect_adopted();
        self.outcome
            .borrow()
            .as_ref()
            .and_then(PumpOutcome::fault)
            .cloned()
    }

    /// 等待泵结束并返回结局。
    pub async fn wait(&self) -> PumpOutcome {
        let mut receiver = self.outcome.clone();
        let outcome = receiver
            .wait_for(Option::is_some)
            .await
            .map(|slot| (*slot).clone());
        match outcome {
            Ok(Some(outcome)) => outcome,
            // 发布器在未写入结局时被销毁，只可能是任务从未被轮询就随运行时一起关闭。
            _ => PumpOutcome::Cancelled,
        }
    }

    fn collect_adopted(&self) {
        if let Some(adopted) = &self.adopted {
            adopted.try_collect();
        }
    }

    /// 中止底层任务；对已结束的泵无效果。
    pub fn abort(&self) {
        if let Some(handle) = &self.abort {
            handle.abort();
        }
    }
}

fn joined_outcome(
    side: PumpSide,
    joined: Result<Result<(), PumpError>, JoinError>,
) -> PumpOutcome {
    match joined {
        Ok(result) => PumpOutcome::from(result),
        Err(err) if err.is_cancelled() => PumpOutcome::Cancelled,
        Err(_) => PumpOutcome::Failed(PumpError::msg(format!("{side} pump panicked"))),
    }
}

/// 被接管任务的共享状态：`JoinHandle` 槽位与结局发送端。
#[derive(Debug)]
struct Adopted {
    side: PumpSide,
    join: Mutex<Option<PumpJoin>>,
    sender: watch::Sender<Option<PumpOutcome>>,
}

impl Adopted {
    /// 首次发布生效。
    fn publish(&self, outcome: PumpOutcome) {
        let logged = outcome.clone();
        let published = self.sender.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(outcome);
            true
        });
        if published {
            debug!(pump = %self.side, outcome = ?logged, "adopted pump finished");
        }
    }

    /// 任务已结束时就地取走结果并发布。
    fn try_collect(&self) {
        let mut slot = self.join.lock();
        let Some(join) = slot.as_mut() else {
            return;
        };
        if !join.is_finished() {
            return;
        }
        // 已完成的 JoinHandle 直接读出结果，不会覆盖观察任务注册的唤醒器。
        if let Some(joined) = join.now_or_never() {
            slot.take();
            self.publish(joined_outcome(self.side, joined));
        }
    }

    fn poll_join(&self, cx: &mut Context<'_>) -> Poll<()> {
        let mut slot = self.join.lock();
        let Some(join) = slot.as_mut() else {
            return Poll::Ready(());
        };
        match Pin::new(join).poll(cx) {
            Poll::Ready(joined) => {
                slot.take();
                self.publish(joined_outcome(self.side, joined));
                Poll::Ready(())
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// 观察任务持有的守卫：任务未转发结局就被销毁时补发取消。
struct Watcher(Arc<Adopted>);

impl Drop for Watcher {
    fn drop(&mut self) {
        self.0.publish(PumpOutcome::Cancelled);
    }
}

/// 泵任务内部的结局发布器。
struct Publisher {
    side: PumpSide,
    sender: Option<watch::Sender<Option<PumpOutcome>>>,
}

impl Publisher {
    fn publish(&mut self, outcome: PumpOutcome) {
        if let Some(sender) = self.sender.take() {
            debug!(pump = %self.side, outcome = ?outcome, "pump finished");
            sender.send_replace(Some(outcome));
        }
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        self.publish(PumpOutcome::Cancelled);
    }
}

#[cfg(test)]
mod tests {
    use std::{io, time::Duration};

    use super::*;

    #[tokio::test]
    async fn outcome_is_observable_after_completion() {
        let handle = PumpHandle::spawn(PumpSide::Application, async {
            Err(PumpError::from(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "reset",
            )))
        });

        let outcome = handle.wait().await;
        let fault = handle.fault().expect("fault must be visible after wait");
        assert_eq!(outcome, PumpOutcome::Failed(fault.clone()));
        assert_eq!(handle.peek(), Some(PumpOutcome::Failed(fault)));
        assert!(handle.clone().is_finished(), "克隆共享同一结局");
    }

    #[tokio::test]
    async fn aborted_pump_reports_cancelled() {
        let handle = PumpHandle::spawn(PumpSide::Transport, async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        });
        assert_eq!(handle.peek(), None);

        handle.abort();
        assert_eq!(handle.wait().await, PumpOutcome::Cancelled);
    }

    #[tokio::test]
    async fn panicking_pump_reports_fault() {
        fn explode() -> Result<(), PumpError> {
            panic!("pump exploded")
        }
        let handle = PumpHandle::spawn(PumpSide::Transport, async { explode() });

        let outcome = handle.wait().await;
        let fault = outcome.fault().expect("panic is reported as a fault");
        assert_eq!(fault.to_string(), "transport pump panicked");
    }

    #[tokio::test]
    async fn adopted_task_reports_through_the_handle() {
        let join = tokio::spawn(async { Err(PumpError::msg("adopted failure")) });
        let handle = PumpHandle::from_join_handle(PumpSide::Application, join);

        let outcome = handle.wait().await;
        assert_eq!(
            outcome.fault().map(ToString::to_string).as_deref(),
            Some("adopted failure")
        );

        let stuck = tokio::spawn(std::future::pending::<Result<(), PumpError>>());
        let adopted = PumpHandle::from_join_handle(PumpSide::Transport, stuck);
        adopted.abort();
        assert_eq!(adopted.wait().await, PumpOutcome::Cancelled);
    }

    #[tokio::test]
    async fn adopted_task_that_already_failed_is_visible_immediately() {
        let reset = PumpError::from(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
        let join = {
            let reset = reset.clone();
            tokio::spawn(async move { Err(reset) })
        };
        while !join.is_finished() {
            tokio::task::yield_now().await;
        }

        // 当前线程运行时中观察任务尚未被轮询，结局只能由 `peek` 就地取得。
        let handle = PumpHandle::from_join_handle(PumpSide::Application, join);
        assert_eq!(handle.fault(), Some(reset.clone()));
        assert_eq!(handle.peek(), Some(PumpOutcome::Failed(reset.clone())));
        assert_eq!(handle.wait().await, PumpOutcome::Failed(reset));
    }

    #[test]
    fn finished_handle_needs_no_runtime() {
        let handle = PumpHandle::finished(PumpSide::Transport, PumpOutcome::Succeeded);
        assert_eq!(handle.peek(), Some(PumpOutcome::Succeeded));
        assert!(handle.fault().is_none());
        handle.abort();
    }
}
