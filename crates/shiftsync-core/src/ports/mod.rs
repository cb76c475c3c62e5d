//! Ports - 抽象化レイヤー
//!
//! 外部システム（SQLite, HTTP API, UI への通知）へのインターフェース。
//! app 層はこの trait だけに依存し、実装は impls に置く。

pub mod clock;
pub mod event_sink;
pub mod id_generator;
pub mod queue_store;
pub mod read_cache;
pub mod transport;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::event_sink::EventSink;
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::queue_store::{CancelOutcome, PendingScan, QueueStore, StoreError};
pub use self::read_cache::{CacheEntry, ReadCache};
pub use self::transport::{Transport, TransportError, send_bounded};
