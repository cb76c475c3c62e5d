//! App - アプリケーション層
//!
//! ports を組み合わせてキューの振る舞いを実装する。
//!
//! # 主要コンポーネント
//! - **Interceptor**: リクエストの分類、キャッシュ、オフライン時の enqueue
//! - **SyncScheduler / SyncPass**: キューの再送
//! - **Engine**: 上記をバックグラウンドタスクとして動かし、`EngineHandle` を配る
//! - **EngineBuilder**: ワイヤリングと起動時検証

pub mod builder;
pub mod engine;
pub mod interceptor;
pub mod scheduler;

pub use self::builder::{BuildError, EngineBuilder};
pub use self::engine::{Engine, EngineError, EngineHandle, EngineTask};
pub use self::interceptor::{InterceptError, Intercepted, Interceptor, QueuedAck};
pub use self::scheduler::{PassReport, StopReason, SyncPass, SyncScheduler, Trigger};
