//! 集成测试共用的观测型管道。
//!
//! `CountingPipe` 不搬运任何字节，只记录两个半部被完成的次数与写半部携带的故障，
//! 用于断言“拆除副作用恰好执行一次”。读半部完成时唤醒 [`CountingPipe::input_completed`] 的等待者，
//! 多线程测试据此与拆除路径会合，而不依赖墙钟等待。

#![allow(dead_code)]

use std::sync::{
    Mutex,
    atomic::{AtomicUsize, Ordering},
};

use spark_connection::{DuplexPipe, PumpError};
use tokio::sync::Notify;

#[derive(Debug, Default)]
pub struct CountingPipe {
    input_completions: AtomicUsize,
    output_completions: AtomicUsize,
    output_fault: Mutex<Option<PumpError>>,
    input_done: Notify,
}

impl CountingPipe {
    pub fn input_completions(&self) -> usize {
        self.input_completions.load(Ordering::SeqCst)
    }

    pub fn output_completions(&self) -> usize {
        self.output_completions.load(Ordering::SeqCst)
    }

    pub fn output_fault(&self) -> Option<PumpError> {
        self.output_fault
            .lock()
            .expect("fault slot poisoned")
            .clone()
    }

    /// 等待读半部至少被完成一次；拆除路径最后完成读半部，返回时两个半部都已完成。
    pub async fn input_completed(&self) {
        let notified = self.input_done.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.input_completions() > 0 {
            return;
        }
        notified.await;
    }

    /// 两个半部都恰好被完成一次。
    pub fn completed_once(&self) -> bool {
        self.input_completions() == 1 && self.output_completions() == 1
    }
}

impl DuplexPipe for CountingPipe {
    fn complete_input(&self) {
        self.input_completions.fetch_add(1, Ordering::SeqCst);
        self.input_done.notify_waiters();
    }

    fn complete_output(&self, fault: Option<PumpError>) {
        self.output_completions.fetch_add(1, Ordering::SeqCst);
        *self.output_fault.lock().expect("fault slot poisoned") = fault;
    }
}
