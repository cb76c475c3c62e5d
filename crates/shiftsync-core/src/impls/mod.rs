//! Impls - ports の実装
//!
//! - SQLite: 本番用の永続キューと読み取りキャッシュ（同じファイルを共有）
//! - InMemory: テスト・一時セッション用
//! - ReqwestTransport: HTTP API
//! - StatusBridge: broadcast によるイベント配信

pub mod bridge;
pub mod http_transport;
pub mod memory;
pub mod scripted_transport;
pub mod sqlite_cache;
pub mod sqlite_db;
pub mod sqlite_store;

pub use self::bridge::{BridgeMessage, StatusBridge, StatusListener, StatusReceiver};
pub use self::http_transport::ReqwestTransport;
pub use self::memory::{InMemoryQueueStore, InMemoryReadCache};
pub use self::scripted_transport::{ScriptedTransport, Step};
pub use self::sqlite_cache::SqliteReadCache;
pub use self::sqlite_db::SqliteDatabase;
pub use self::sqlite_store::SqliteQueueStore;
