//! # 连接状态机
//!
//! ## 状态机约束（What）
//! - 合法跃迁：`Inactive → Active → Disposed`，`Inactive` 可直接跳转至 `Disposed`；
//! - `Disposed` 为终态，任何回退都会被拒绝；
//! - 同态跃迁视为幂等成功。
//!
//! ## 实现策略（How）
//! - [`ConnectionStatus`] 以 `u8` 表示并保持数值单调，使 [`StatusCell`] 可以用 `fetch_max`
//!   实现“只前进不后退”的原子推进；
//! - 状态写入仅发生在连接锁内，原子单元的作用是让 `status()` 读取无需拿锁。

use std::{
    fmt,
    sync::atomic::{AtomicU8, Ordering},
};

/// 连接生命周期状态。
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[repr(u8)]
pub enum ConnectionStatus {
    /// 已创建，泵尚未启动。
    Inactive = 0,
    /// 泵已启动并在管道上搬运数据。
    Active = 1,
    /// 已进入释放流程，终态。
    Disposed = 2,
}

impl ConnectionStatus {
    /// 判断状态是否允许跃迁至 `target`。
    ///
    /// # 教案式注释
    /// - **意图 (Why)**：在 `activate`/`dispose` 中复用，保持状态图与实现一致；
    /// - **契约 (What)**：目标状态不早于当前状态即为合法，包括同态跃迁；
    /// - **执行 (How)**：依赖枚举判别值的单调顺序。
    pub fn can_transition_to(self, target: ConnectionStatus) -> bool {
        target >= self
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionStatus::Disposed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionStatus::Inactive => "inactive",
            ConnectionStatus::Active => "active",
            ConnectionStatus::Disposed => "disposed",
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ConnectionStatus::Inactive,
            1 => ConnectionStatus::Active,
            _ => ConnectionStatus::Disposed,
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 可无锁读取的单调状态单元。
#[derive(Debug)]
pub(crate) struct StatusCell {
    raw: AtomicU8,
}

impl StatusCell {
    pub(crate) fn new(initial: ConnectionStatus) -> Self {
        Self {
            raw: AtomicU8::new(initial as u8),
        }
    }

    pub(crate) fn load(&self) -> ConnectionStatus {
        ConnectionStatus::from_u8(self.raw.load(Ordering::Acquire))
    }

    /// 将状态推进到 `next`，返回推进前的状态。若 `next` 早于当前状态则保持不变。
    pub(crate) fn advance(&self, next: ConnectionStatus) -> ConnectionStatus {
        ConnectionStatus::from_u8(self.raw.fetch_max(next as u8, Ordering::AcqRel))
    }
}
