//! # 双工管道
//!
//! ## 设计动机（Why）
//! - 协调器只关心管道的“完成”语义：读半部完成表示“不再接收输入”，写半部完成可携带终止故障；
//!   这一切入点由 [`DuplexPipe`] trait 表达，任何实现都可以交给 [`Connection`](crate::Connection) 管理；
//! - 同时提供基于内存的默认实现 [`PipePair`]，供泵在传输边界与应用边界之间交换 [`Bytes`]。
//!
//! ## 拓扑（What）
//! - [`PipePair::new`] 生成两端交叉相连的 [`DuplexEnd`]：
//!   - `transport` 端是“应用眼中的传输”，由应用处理器持有；其写入流向 `application` 端的读取；
//!   - `application` 端是“传输眼中的应用”，由传输泵持有；其写入流向 `transport` 端的读取；
//! - 因此传输泵的故障写入 `application` 端的写半部后，会在应用处理器读取 `transport` 端时暴露出来。
//!
//! ## 实现策略（How）
//! - 每个方向是一个 [`Direction`]：`parking_lot::Mutex` 保护缓冲队列与完成状态，两个
//!   `tokio::sync::Notify` 分别唤醒读者与写者；锁从不跨越 `.await`；
//! - 有界缓冲：写入在队列满时协作式挂起，直到读者取走数据或任一半部完成。
//!
//! ## 风险与考量（Trade-offs）
//! - 读半部完成时丢弃尚未读取的数据，与“读者不再接收输入”的语义一致；
//! - 写半部完成后，读者仍可读尽缓冲数据，随后才观察到干净结束或故障。

use std::{collections::VecDeque, sync::Arc};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::{
    activity::Activity,
    config::ConnectionOptions,
    error::{PipeError, PumpError},
};

/// 协调器消费的双工管道契约。
///
/// # 教案级注释
/// - **契约 (What)**：
///   - `complete_input`：完成读半部，不携带错误；
///   - `complete_output`：完成写半部，可选携带终止故障，由对端读者观察；
/// - **前置条件**：实现需保证两个方法均幂等，重复调用只保留首次完成；
/// - **风险提示**：方法在连接锁内同步调用，禁止阻塞。
pub trait DuplexPipe: Send + Sync + 'static {
    fn complete_input(&self);

    fn complete_output(&self, fault: Option<PumpError>);

    /// 数据路径刷新的活动时钟；返回 `None` 时连接自建时钟，需由调用方续期。
    fn activity(&self) -> Option<Activity> {
        None
    }
}

/// 写半部的终止状态。
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum OutputCompletion {
    Clean,
    Faulted(PumpError),
}

impl OutputCompletion {
    pub fn fault(&self) -> Option<&PumpError> {
        match self {
            OutputCompletion::Faulted(error) => Some(error),
            OutputCompletion::Clean => None,
        }
    }
}

impl From<Option<PumpError>> for OutputCompletion {
    fn from(value: Option<PumpError>) -> Self {
        value.map_or(OutputCompletion::Clean, OutputCompletion::Faulted)
    }
}

#[derive(Debug, Default)]
struct DirectionState {
    chunks: VecDeque<Bytes>,
    writer: Option<OutputCompletion>,
    reader_completed: bool,
}

/// 单向有界字节通道。
#[derive(Debug)]
struct Direction {
    state: Mutex<DirectionState>,
    readable: Notify,
    writable: Notify,
    capacity: usize,
}

impl Direction {
    fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(DirectionState::default()),
            readable: Notify::new(),
            writable: Notify::new(),
            capacity: capacity.max(1),
        }
    }

    async fn write(&self, chunk: Bytes) -> Result<(), PipeError> {
        loop {
            let writable = self.writable.notified();
            {
                let mut state = self.state.lock();
                if state.writer.is_some() {
                    return Err(PipeError::WriterCompleted);
                }
                if state.reader_completed {
                    return Err(PipeError::ReaderCompleted);
                }
                if state.chunks.len() < self.capacity {
                    state.chunks.push_back(chunk);
                    drop(state);
                    self.readable.notify_waiters();
                    return Ok(());
                }
            }
            writable.await;
        }
    }

    async fn read(&self) -> Result<Option<Bytes>, PipeError> {
        loop {
            let readable = self.readable.notified();
            {
                let mut state = self.state.lock();
                if state.reader_completed {
                    return Err(PipeError::ReaderCompleted);
                }
                if let Some(chunk) = state.chunks.pop_front() {
                    drop(state);
                    self.writable.notify_waiters();
                    return Ok(Some(chunk));
                }
                match &state.writer {
                    Some(OutputCompletion::Clean) => return Ok(None),
                    Some(OutputCompletion::Faulted(error)) => {
                        return Err(PipeError::Faulted(error.clone()));
                    }
                    None => {}
                }
            }
            readable.await;
        }
    }

    fn complete_writer(&self, completion: OutputCompletion) -> bool {
        {
            let mut state = self.state.lock();
            if state.writer.is_some() {
                return false;
            }
            state.writer = Some(completion);
        }
        self.wake_all();
        true
    }

    fn complete_reader(&self) -> bool {
        {
            let mut state = self.state.lock();
            if state.reader_completed {
                return false;
            }
            state.reader_completed = true;
            state.chunks.clear();
        }
        self.wake_all();
        true
    }

    fn writer_completion(&self) -> Option<OutputCompletion> {
        self.state.lock().writer.clone()
    }

    fn reader_completed(&self) -> bool {
        self.state.lock().reader_completed
    }

    fn wake_all(&self) {
        self.readable.notify_waiters();
        self.writable.notify_waiters();
    }
}

/// 双工管道的一端：读取 `input`，写入 `output`。
///
/// 克隆共享同一对方向，便于泵在读循环与写循环之间分发。每次成功读写都会刷新两端共享的活动时钟。
#[derive(Clone, Debug)]
pub struct DuplexEnd {
    input: Arc<Direction>,
    output: Arc<Direction>,
    activity: Activity,
}

impl DuplexEnd {
    /// 写入一段数据；队列满时挂起等待。
    pub async fn write(&self, chunk: impl Into<Bytes>) -> Result<(), PipeError> {
        self.output.write(chunk.into()).await?;
        self.activity.touch();
        Ok(())
    }

    /// 读取下一段数据。
    ///
    /// - `Ok(Some(_))`：读到数据；
    /// - `Ok(None)`：对端写半部已干净完成且缓冲读尽；
    /// - `Err(PipeError::Faulted(_))`：对端写半部携带故障完成且缓冲读尽；
    /// - `Err(PipeError::ReaderCompleted)`：本端读半部已完成。
    pub async fn read(&self) -> Result<Option<Bytes>, PipeError> {
        let chunk = self.input.read().await?;
        if chunk.is_some() {
            self.activity.touch();
        }
        Ok(chunk)
    }

    /// 本端写半部的终止状态；尚未完成时为 `None`。
    pub fn output_completion(&self) -> Option<OutputCompletion> {
        self.output.writer_completion()
    }

    pub fn input_completed(&self) -> bool {
        self.input.reader_completed()
    }
}

impl DuplexPipe for DuplexEnd {
    fn complete_input(&self) {
        self.input.complete_reader();
    }

    fn complete_output(&self, fault: Option<PumpError>) {
        self.output.complete_writer(OutputCompletion::from(fault));
    }

    fn activity(&self) -> Option<Activity> {
        Some(self.activity.clone())
    }
}

/// 一对交叉相连的双工管道端。
#[derive(Clone, Debug)]
pub struct PipePair {
    /// 应用处理器持有的一端。
    pub transport: DuplexEnd,
    /// 传输泵持有的一端。
    pub application: DuplexEnd,
}

impl PipePair {
    /// 按方向容量创建管道对；容量以数据段计，最小为 1。
    ///
    /// - `transport_capacity`：传输 → 应用方向；
    /// - `application_capacity`：应用 → 传输方向。
    pub fn with_capacity(transport_capacity: usize, application_capacity: usize) -> Self {
        let inbound = Arc::new(Direction::new(transport_capacity));
        let outbound = Arc::new(Direction::new(application_capacity));
        let activity = Activity::new();
        Self {
            transport: DuplexEnd {
                input: Arc::clone(&inbound),
                output: Arc::clone(&outbound),
                activity: activity.clone(),
            },
            application: DuplexEnd {
                input: outbound,
                output: inbound,
                activity,
            },
        }
    }

    pub fn new(options: &ConnectionOptions) -> Self {
        Self::with_capacity(options.transport_capacity, options.application_capacity)
    }
}
