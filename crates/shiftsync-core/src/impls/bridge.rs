//! StatusBridge - UI コンテキストへのイベント配信
//!
//! # 設計原則
//! - `tokio::sync::broadcast` を 1 本だけ持つ。購読者はその時点以降のイベントだけを受け取る
//! - publish はブロックしない。購読者がいなければ捨てる
//! - 追いつけなかった購読者には取りこぼした件数を伝える（snapshot を取り直す合図）

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::task::JoinHandle;

use crate::domain::StatusEvent;
use crate::ports::EventSink;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeMessage {
    Event(StatusEvent),
    /// This many events were dropped before the listener could read them.
    Missed(u64),
}

#[derive(Clone)]
pub struct StatusBridge {
    tx: broadcast::Sender<StatusEvent>,
}

impl StatusBridge {
    /// 新しい StatusBridge を作成（購読者ごとに `capacity` 件までバッファ）
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> StatusReceiver {
        StatusReceiver {
            rx: self.tx.subscribe(),
        }
    }

    /// すべてのイベントを spawn したタスク上で `listener` に転送
    ///
    /// bridge（すべての clone）が drop されるとタスクは終了する。
    pub fn subscribe_with<L: StatusListener>(&self, mut listener: L) -> JoinHandle<()> {
        let mut rx = self.subscribe();
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                match message {
                    BridgeMessage::Event(event) => listener.on_event(&event),
                    BridgeMessage::Missed(n) => listener.on_missed(n),
                }
            }
        })
    }
}

impl EventSink for StatusBridge {
    fn publish(&self, event: StatusEvent) {
        tracing::debug!(?event, "status event");
        // Err only means nobody is subscribed right now.
        let _ = self.tx.send(event);
    }
}

pub struct StatusReceiver {
    rx: broadcast::Receiver<StatusEvent>,
}

impl StatusReceiver {
    /// 次のメッセージ。bridge がなくなったら `None`
    pub async fn recv(&mut self) -> Option<BridgeMessage> {
        match self.rx.recv().await {
            Ok(event) => Some(BridgeMessage::Event(event)),
            Err(RecvError::Lagged(n)) => {
                tracing::warn!(missed = n, "status listener fell behind");
                Some(BridgeMessage::Missed(n))
            }
            Err(RecvError::Closed) => None,
        }
    }

    /// Non-blocking variant: `None` when nothing is buffered.
    pub fn try_recv(&mut self) -> Option<BridgeMessage> {
        match self.rx.try_recv() {
            Ok(event) => Some(BridgeMessage::Event(event)),
            Err(TryRecvError::Lagged(n)) => Some(BridgeMessage::Missed(n)),
            Err(TryRecvError::Empty | TryRecvError::Closed) => None,
        }
    }
}

/// StatusListener はステータスイベントの下流の受け手（UI ブリッジ、プッシュ通知など）
pub trait StatusListener: Send + 'static {
    fn on_event(&mut self, event: &StatusEvent);

    fn on_missed(&mut self, count: u64) {
        let _ = count;
    }
}

impl<F> StatusListener for F
where
    F: FnMut(&StatusEvent) + Send + 'static,
{
    fn on_event(&mut self, event: &StatusEvent) {
        self(event)
    }
}
