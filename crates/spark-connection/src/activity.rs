//! 连接活动时钟。
//!
//! # 教案式说明
//! - **意图 (Why)**：管理器的空闲扫描需要知道连接最近一次搬运字节的时刻；该时刻必须由数据路径本身刷新，
//!   而不是依赖协作方记得调用；
//! - **契约 (What)**：[`Activity`] 可克隆，所有克隆共享同一时间戳；内存管道 [`DuplexEnd`](crate::DuplexEnd)
//!   在每次成功读写后调用 [`touch`](Activity::touch)，自定义管道可通过
//!   [`DuplexPipe::activity`](crate::DuplexPipe::activity) 交出自己的时钟，或由调用方经
//!   [`Connection::mark_seen`](crate::Connection::mark_seen) 手工续期；
//! - **实现 (How)**：`tokio::time::Instant`，测试中可随暂停的时钟推进。

use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::time::Instant;

#[derive(Clone, Debug)]
pub struct Activity {
    last_seen: Arc<Mutex<Instant>>,
}

impl Activity {
    pub fn new() -> Self {
        Self {
            last_seen: Arc::new(Mutex::new(Instant::now())),
        }
    }

    /// 记录一次活动。
    pub fn touch(&self) {
        *self.last_seen.lock() = Instant::now();
    }

    pub fn last_seen(&self) -> Instant {
        *self.last_seen.lock()
    }

    /// 截至 `now` 的空闲时长。
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_seen())
    }

    /// 两个时钟是否共享同一时间戳。
    pub fn same_clock(&self, other: &Activity) -> bool {
        Arc::ptr_eq(&self.last_seen, &other.last_seen)
    }
}

impl Default for Activity {
    fn default() -> Self {
        Self::new()
    }
}
