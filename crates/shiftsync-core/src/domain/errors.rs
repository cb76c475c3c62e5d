//! Errors - エラー分類
//!
//! 各 seam のエラー型（StoreError, TransportError, ...）は `kind()` で
//! この分類に写像される。スケジューラとインターセプタは分類だけを見て
//! 挙動を決める。

use serde::{Deserialize, Serialize};

/// ErrorKind は失敗の運用上の分類
///
/// - Transport: no response reached us (retry automatically / enqueue).
/// - Application: the server answered 4xx/5xx (never retried automatically).
/// - Storage: the durable store failed (abort, keep last known state).
/// - Timeout: bounded wait expired (handled exactly like Transport).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transport,
    Application,
    Storage,
    Timeout,
}

impl ErrorKind {
    /// 呼び出し側に返さず、後回しにして再試行する失敗
    pub fn is_network_class(self) -> bool {
        matches!(self, ErrorKind::Transport | ErrorKind::Timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_is_network_class() {
        assert!(ErrorKind::Timeout.is_network_class());
        assert!(ErrorKind::Transport.is_network_class());
        assert!(!ErrorKind::Application.is_network_class());
        assert!(!ErrorKind::Storage.is_network_class());
    }
}
