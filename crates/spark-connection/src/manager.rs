//! # ConnectionManager：连接仓储
//!
//! ## 核心意图（Why）
//! - 以 `DashMap` 提供并发安全的连接注册表，使宿主可以按 ID 查找、释放或批量回收连接；
//! - 释放与回收统一经由 [`Connection::dispose`]，注册表本身不参与拆除协调。
//!
//! ## 行为契约（What）
//! - `create`：按 `{prefix}-{counter}` 生成 ID 并注册内存管道连接；
//! - `register`：ID 已存在时返回 [`ConnectionError::DuplicateId`]；
//! - `dispose`：先摘除条目再释放，未注册返回 [`ConnectionError::NotFound`]；
//! - `scan`：回收空闲时长超过 `idle_timeout_ms` 的连接；空闲时长取自连接的活动时钟，内存管道的每次
//!   成功读写都会刷新它；未配置超时时不回收；
//! - `dispose_all`：并发释放全部连接并清空注册表。
//!
//! ## 风险提示（Trade-offs）
//! - 跨 `.await` 不持有 `DashMap` guard：批量操作先收集 ID，再逐个摘除；
//! - 摘除与释放之间存在窗口，期间 `get` 已查不到该连接，但连接本身仍可被持有者释放。

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use dashmap::{DashMap, mapref::entry::Entry};
use futures::future::join_all;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::{
    config::ConnectionOptions,
    connection::Connection,
    error::{ConnectionError, DisposeOutcome},
};

/// 以连接 ID 为键的并发注册表。
#[derive(Debug)]
pub struct ConnectionManager {
    connections: DashMap<Arc<str>, Arc<Connection>>,
    options: ConnectionOptions,
    next_id: AtomicU64,
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new(ConnectionOptions::default())
    }
}

impl ConnectionManager {
    pub fn new(options: ConnectionOptions) -> Self {
        Self {
            connections: DashMap::new(),
            options,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    /// 以管理器配置创建并注册一条新连接。
    pub fn create(&self) -> Result<Arc<Connection>, ConnectionError> {
        self.create_with(&self.options)
    }

    /// 以调用方给定的配置创建并注册连接；ID 前缀仍取自管理器配置。
    ///
    /// # 教案式注释
    /// - **契约 (What)**：ID 形如 `conn-1`、`conn-2`，计数器单调递增；
    /// - **风险 (Trade-offs)**：若调用方曾以 `register` 手工占用了同名 ID，返回 `DuplicateId`，计数器不回退。
    pub fn create_with(
        &self,
        options: &ConnectionOptions,
    ) -> Result<Arc<Connection>, ConnectionError> {
        let sequence = self.next_id.fetch_add(1, Ordering::Relaxed);
        let id = format!("{}-{}", self.options.id_prefix, sequence);
        let connection = Arc::new(Connection::new(id, options));
        self.register(Arc::clone(&connection))?;
        Ok(connection)
    }

    /// 注册外部构造的连接。
    pub fn register(&self, connection: Arc<Connection>) -> Result<(), ConnectionError> {
        let id = Arc::clone(connection.id_arc());
        match self.connections.entry(Arc::clone(&id)) {
            Entry::Occupied(_) => Err(ConnectionError::DuplicateId { id: id.to_string() }),
            Entry::Vacant(vacant) => {
                vacant.insert(connection);
                debug!(connection.id = %id, "connection registered");
                Ok(())
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<Connection>> {
        self.connections.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// 摘除条目但不释放连接。
    pub fn remove(&self, id: &str) -> Option<Arc<Connection>> {
        self.connections.remove(id).map(|(_, connection)| connection)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// 摘除并释放指定连接，返回其释放结局。
    pub async fn dispose(&self, id: &str) -> Result<DisposeOutcome, ConnectionError> {
        let connection = self.remove(id).ok_or_else(|| ConnectionError::NotFound {
            id: id.to_owned(),
        })?;
        Ok(connection.dispose().await)
    }

    /// 回收截至 `now` 空闲时长超过阈值的连接，返回被回收的 ID。
    pub async fn scan(&self, now: Instant) -> Vec<Arc<str>> {
        let Some(timeout) = self.options.idle_timeout() else {
            return Vec::new();
        };

        let idle: Vec<Arc<str>> = self
            .connections
            .iter()
            .filter(|entry| entry.value().idle_for(now) > timeout)
            .map(|entry| Arc::clone(entry.key()))
            .collect();

        let evicted: Vec<Arc<Connection>> = idle.iter().filter_map(|id| self.remove(id)).collect();
        let ids: Vec<Arc<str>> = evicted
            .iter()
            .map(|connection| Arc::clone(connection.id_arc()))
            .collect();
        join_all(evicted.iter().map(|connection| connection.dispose())).await;

        if !ids.is_empty() {
            info!(evicted = ids.len(), "idle connections disposed");
        }
        ids
    }

    /// 并发释放全部已注册连接并清空注册表。
    pub async fn dispose_all(&self) -> Vec<(Arc<str>, DisposeOutcome)> {
        let ids: Vec<Arc<str>> = self
            .connections
            .iter()
            .map(|entry| Arc::clone(entry.key()))
            .collect();
        let drained: Vec<Arc<Connection>> = ids.iter().filter_map(|id| self.remove(id)).collect();

        let outcomes = join_all(drained.iter().map(|connection| connection.dispose())).await;
        info!(disposed = drained.len(), "all connections disposed");
        drained
            .iter()
            .map(|connection| Arc::clone(connection.id_arc()))
            .zip(outcomes)
            .collect()
    }
}
