//! 一次性完成信号：记录连接释放的最终结局。
//!
//! # 教案式导航
//! - **意图 (Why)**：释放流程是典型的 single-flight：首个调用方执行拆除，其余调用方只等待并读取
//!   同一结局。以“只可设置一次的结果单元”表达该语义，而不是维护回调列表；
//! - **实现 (How)**：内部持有 `tokio::sync::watch::Sender<Option<DisposeOutcome>>`。
//!   `set` 通过 `send_if_modified` 原子地完成“仅当为空时写入”，`wait` 为每个等待者派生独立接收端；
//!   发送端随信号本身存活，因此等待者不会因发送端被丢弃而提前返回；
//! - **契约 (What)**：一旦写入，值永不改变；以不同值重复写入会返回
//!   [`ConnectionError::InvariantViolation`]，已记录的值保持原样。

use tokio::sync::watch;

use crate::error::{ConnectionError, DisposeError, DisposeOutcome};

#[derive(Debug)]
pub struct CompletionSignal {
    slot: watch::Sender<Option<DisposeOutcome>>,
}

impl CompletionSignal {
    pub fn new() -> Self {
        let (slot, _) = watch::channel(None);
        Self { slot }
    }

    /// 记录结局。
    ///
    /// - 首次写入返回 `Ok(true)`；
    /// - 以相同结局重复写入返回 `Ok(false)`；
    /// - 以不同结局重复写入返回 [`ConnectionError::InvariantViolation`]（连接 ID 由调用方补齐）。
    pub fn set(&self, outcome: DisposeOutcome) -> Result<bool, ConnectionError> {
        let mut conflict = None;
        let stored = self.slot.send_if_modified(|slot| match slot {
            None => {
                *slot = Some(outcome);
                true
            }
            Some(recorded) => {
                if *recorded != outcome {
                    conflict = Some(format!(
                        "completion already recorded as {recorded:?}, rejected {outcome:?}"
                    ));
                }
                false
            }
        });

        match conflict {
            Some(detail) => Err(ConnectionError::InvariantViolation {
                id: String::new(),
                detail,
            }),
            None => Ok(stored),
        }
    }

    /// 非阻塞读取已记录的结局。
    pub fn get(&self) -> Option<DisposeOutcome> {
        self.slot.borrow().clone()
    }

    pub fn is_set(&self) -> bool {
        self.slot.borrow().is_some()
    }

    /// 等待结局被记录；可被任意多个调用方并发调用。
    pub async fn wait(&self) -> DisposeOutcome {
        let mut receiver = self.slot.subscribe();
        let recorded = receiver
            .wait_for(Option::is_some)
            .await
            .map(|slot| (*slot).clone());
        match recorded {
            Ok(Some(outcome)) => outcome,
            // 发送端与信号同生命周期，此分支仅在信号被销毁时可达。
            _ => Err(DisposeError::Cancelled),
        }
    }
}

impl Default for CompletionSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::error::{PumpError, PumpSide};

    #[tokio::test]
    async fn waiters_observe_the_first_recorded_outcome() {
        let signal = Arc::new(CompletionSignal::new());
        let early = {
            let signal = Arc::clone(&signal);
            tokio::spawn(async move { signal.wait().await })
        };
        tokio::task::yield_now().await;

        assert_eq!(signal.set(Ok(())), Ok(true));
        assert_eq!(signal.set(Ok(())), Ok(false), "相同结局的重复写入是幂等的");

        assert_eq!(early.await.expect("waiter task"), Ok(()));
        assert_eq!(signal.wait().await, Ok(()), "晚到的等待者立即得到结局");
    }

    #[test]
    fn conflicting_outcome_is_an_invariant_violation() {
        let signal = CompletionSignal::new();
        let fault = DisposeError::PumpFault {
            side: PumpSide::Transport,
            error: PumpError::msg("boom"),
        };
        assert_eq!(signal.set(Err(fault.clone())), Ok(true));

        let err = signal.set(Ok(())).expect_err("conflict must be reported");
        assert_eq!(err.code(), "spark.connection.invariant_violation");
        assert_eq!(signal.get(), Some(Err(fault)), "已记录的结局不可被覆盖");
    }
}
