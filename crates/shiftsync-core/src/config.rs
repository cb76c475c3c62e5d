//! SyncConfig - TOML から読み込む設定
//!
//! すべてのキーに既定値がある。値の妥当性（0 のタイムアウト、重複ルートなど）は
//! `EngineBuilder::build` が起動時にまとめて検証する。

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::domain::{RouteError, RouteTable, WriteRouteSpec};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    pub base_url: String,
    pub database_path: PathBuf,
    pub request_timeout_ms: u64,
    pub replay_timeout_ms: u64,
    pub connectivity_debounce_ms: u64,
    /// 0 disables the periodic pass.
    pub periodic_sync_ms: u64,
    pub stale_after_secs: u64,
    /// Empty string disables the header.
    pub idempotency_header: String,
    pub queue_behind_pending: bool,
    pub event_capacity: usize,
    pub command_capacity: usize,
    pub start_online: bool,
    pub read_routes: Vec<String>,
    pub write_routes: Vec<WriteRouteSpec>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            database_path: PathBuf::from("shiftsync.db"),
            request_timeout_ms: 10_000,
            replay_timeout_ms: 15_000,
            connectivity_debounce_ms: 3_000,
            periodic_sync_ms: 30_000,
            stale_after_secs: 86_400,
            idempotency_header: "Idempotency-Key".to_string(),
            queue_behind_pending: false,
            event_capacity: 256,
            command_capacity: 64,
            start_online: true,
            read_routes: Vec::new(),
            write_routes: Vec::new(),
        }
    }
}

impl SyncConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn routes(&self) -> Result<RouteTable, RouteError> {
        RouteTable::from_specs(&self.read_routes, &self.write_routes)
    }

    /// 配線（パス、URL）を除いた実行時の調整値
    pub fn settings(&self) -> SyncSettings {
        SyncSettings {
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            replay_timeout: Duration::from_millis(self.replay_timeout_ms),
            connectivity_debounce: Duration::from_millis(self.connectivity_debounce_ms),
            periodic_sync: (self.periodic_sync_ms > 0)
                .then(|| Duration::from_millis(self.periodic_sync_ms)),
            stale_after: Duration::from_secs(self.stale_after_secs),
            idempotency_header: (!self.idempotency_header.is_empty())
                .then(|| self.idempotency_header.clone()),
            queue_behind_pending: self.queue_behind_pending,
            event_capacity: self.event_capacity,
            command_capacity: self.command_capacity,
            start_online: self.start_online,
        }
    }
}

/// SyncSettings は engine が使う調整値
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    pub request_timeout: Duration,
    pub replay_timeout: Duration,
    pub connectivity_debounce: Duration,
    pub periodic_sync: Option<Duration>,
    pub stale_after: Duration,
    pub idempotency_header: Option<String>,
    pub queue_behind_pending: bool,
    pub event_capacity: usize,
    pub command_capacity: usize,
    pub start_online: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncConfig::default().settings()
    }
}
