//! Transport port - API への送信
//!
//! サーバから応答が返ってきた場合は status に関わらず `Ok(ApiResponse)`。
//! `Err(TransportError)` は「応答が届かなかった」ことだけを意味する。

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{ApiRequest, ApiResponse, ErrorKind};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("network error: {0}")]
    Network(String),
}

impl TransportError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransportError::Timeout(_) => ErrorKind::Timeout,
            TransportError::Connect(_) | TransportError::Network(_) => ErrorKind::Transport,
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError>;
}

/// `timeout` で打ち切る `send`。期限切れは `TransportError::Timeout` になる
pub async fn send_bounded(
    transport: &dyn Transport,
    request: &ApiRequest,
    timeout: Duration,
) -> Result<ApiResponse, TransportError> {
    match tokio::time::timeout(timeout, transport.send(request)).await {
        Ok(result) => result,
        Err(_elapsed) => Err(TransportError::Timeout(timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Hanging;

    #[async_trait]
    impl Transport for Hanging {
        async fn send(&self, _request: &ApiRequest) -> Result<ApiResponse, TransportError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_send_times_out() {
        let err = send_bounded(&Hanging, &ApiRequest::get("/api/me"), Duration::from_secs(2))
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::Timeout(Duration::from_secs(2)));
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(err.kind().is_network_class());
    }
}
