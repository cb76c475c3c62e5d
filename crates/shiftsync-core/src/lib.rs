//! shiftsync-core
//!
//! Offline-resilient mutation queue for the time-tracking client.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, operation, state, routes, events, snapshot, errors）
//! - **ports**: 抽象化レイヤー（QueueStore, ReadCache, Transport, EventSink, Clock, IdGenerator）
//! - **impls**: 実装（SQLite, InMemory, reqwest, StatusBridge）
//! - **app**: アプリケーションロジック（interceptor, scheduler, engine, builder）
//! - **config**: TOML 設定

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;

pub use app::{EngineBuilder, EngineError, EngineHandle, EngineTask, Intercepted};
pub use config::{ConfigError, SyncConfig, SyncSettings};
