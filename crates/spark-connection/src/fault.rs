//! # 故障传播
//!
//! ## 意图（Why）
//! - 一侧泵的故障绝不能被吞掉：它必须被写入**对侧**管道的写半部，让正在读取该管道的消费者
//!   得知连接终止的原因，而不是看到一次“干净结束”；
//! - 读半部只表达“不再接收输入”，因此无条件地以无错误方式完成。
//!
//! ## 契约（What）
//! - 传输泵已故障 → `application` 管道写半部携带该故障完成，否则干净完成；
//! - 应用泵已故障 → `transport` 管道写半部携带该故障完成，否则干净完成；
//! - 随后完成两个管道的读半部；
//! - 泵结局通过 [`PumpHandle::fault`] 无阻塞探查，缺失的句柄视为未故障。
//!
//! ## 前置条件
//! - 由释放协调器在持有连接锁时调用，且每个连接只调用一次。

use crate::{error::PumpError, pipe::DuplexPipe, pump::PumpHandle};

/// 一次传播的摘要，供日志记录。
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Propagation {
    /// 写入 `application` 管道写半部的传输泵故障。
    pub to_application: Option<PumpError>,
    /// 写入 `transport` 管道写半部的应用泵故障。
    pub to_transport: Option<PumpError>,
}

impl Propagation {
    pub fn is_clean(&self) -> bool {
        self.to_application.is_none() && self.to_transport.is_none()
    }
}

/// 将泵故障映射到对侧管道并完成全部四个半部。
pub fn propagate<P>(
    transport_pipe: &P,
    application_pipe: &P,
    transport_pump: Option<&PumpHandle>,
    application_pump: Option<&PumpHandle>,
) -> Propagation
where
    P: DuplexPipe + ?Sized,
{
    let to_application = transport_pump.and_then(PumpHandle::fault);
    let to_transport = application_pump.and_then(PumpHandle::fault);

    application_pipe.complete_output(to_application.clone());
    transport_pipe.complete_output(to_transport.clone());

    application_pipe.complete_input();
    transport_pipe.complete_input();

    Propagation {
        to_application,
        to_transport,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::PumpSide,
        pipe::{OutputCompletion, PipePair},
        pump::PumpOutcome,
    };

    #[test]
    fn faults_cross_to_the_opposite_pipe() {
        let pair = PipePair::with_capacity(1, 1);
        let reset = PumpError::msg("reset");
        let transport = PumpHandle::finished(PumpSide::Transport, PumpOutcome::Succeeded);
        let application =
            PumpHandle::finished(PumpSide::Application, PumpOutcome::Failed(reset.clone()));

        let summary = propagate(
            &pair.transport,
            &pair.application,
            Some(&transport),
            Some(&application),
        );

        assert_eq!(summary.to_transport, Some(reset.clone()));
        assert_eq!(summary.to_application, None);
        assert_eq!(
            pair.transport.output_completion(),
            Some(OutputCompletion::Faulted(reset))
        );
        assert_eq!(
            pair.application.output_completion(),
            Some(OutputCompletion::Clean)
        );
        assert!(pair.transport.input_completed());
        assert!(pair.application.input_completed());
    }

    #[test]
    fn missing_pumps_complete_everything_cleanly() {
        let pair = PipePair::with_capacity(1, 1);

        let summary = propagate(&pair.transport, &pair.application, None, None);

        assert!(summary.is_clean());
        assert_eq!(
            pair.transport.output_completion(),
            Some(OutputCompletion::Clean)
        );
        assert_eq!(
            pair.application.output_completion(),
            Some(OutputCompletion::Clean)
        );
    }

    #[test]
    fn cancelled_pump_is_not_a_fault() {
        let pair = PipePair::with_capacity(1, 1);
        let transport = PumpHandle::finished(PumpSide::Transport, PumpOutcome::Cancelled);

        let summary = propagate(&pair.transport, &pair.application, Some(&transport), None);

        assert!(summary.is_clean());
    }
}
