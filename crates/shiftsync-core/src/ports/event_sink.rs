//! EventSink port - ステータスイベントの送信先
//!
//! 本番では `StatusBridge` が実装する。

use crate::domain::StatusEvent;

pub trait EventSink: Send + Sync {
    /// その時点の購読者に `event` を届ける。ブロックしない
    fn publish(&self, event: StatusEvent);
}
