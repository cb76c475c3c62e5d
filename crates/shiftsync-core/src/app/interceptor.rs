//! Interceptor - アプリケーションとネットワークの間に立つ層
//!
//! # フロー
//! 1. RouteTable でリクエストを分類（pass-through / cacheable-read / queueable-write）
//! 2. まずネットワークを試す（`request_timeout` で打ち切り）
//! 3. 応答が届いたらそのまま返す（4xx/5xx も含む）
//! 4. 届かなかった場合
//!    - read: キャッシュがあれば `stale` として返す。なければ ServiceUnavailable
//!    - write: QueueStore に積んで `202 {"queued":true}` 相当の ack を返す
//!    - pass-through: TransportError をそのまま返す

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::domain::{
    ApiRequest, ApiResponse, ErrorKind, NewOperation, OperationId, OperationKind, RequestClass,
    RequestSignature, RouteTable, StatusEvent,
};
use crate::ports::{
    CacheEntry, Clock, EventSink, QueueStore, ReadCache, StoreError, Transport, TransportError,
    send_bounded,
};

#[derive(Debug, thiserror::Error)]
pub enum InterceptError {
    #[error("{endpoint} is unreachable and no cached response exists")]
    ServiceUnavailable { endpoint: String },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl InterceptError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            InterceptError::ServiceUnavailable { .. } => ErrorKind::Transport,
            InterceptError::Transport(e) => e.kind(),
            InterceptError::Store(e) => e.kind(),
        }
    }
}

/// QueuedAck はキューに積んだ write に対してサーバ応答の代わりに返す ack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuedAck {
    pub operation_id: OperationId,
    pub kind: OperationKind,
}

impl QueuedAck {
    /// Synthetic `202 Accepted` carrying `{"queued":true,"operationId":N}`.
    pub fn to_response(&self) -> ApiResponse {
        ApiResponse::json(
            202,
            &serde_json::json!({
                "queued": true,
                "operationId": self.operation_id,
            }),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intercepted {
    /// The server answered (any status).
    Response(ApiResponse),

    /// Network unreachable; last known good response. Always stale.
    Cached {
        response: ApiResponse,
        stored_at: DateTime<Utc>,
    },

    /// Network unreachable; the write was persisted for replay.
    Queued(QueuedAck),
}

impl Intercepted {
    pub fn is_stale(&self) -> bool {
        matches!(self, Intercepted::Cached { .. })
    }

    /// 呼び出し側から見た「応答」に変換
    pub fn into_response(self) -> ApiResponse {
        match self {
            Intercepted::Response(response) | Intercepted::Cached { response, .. } => response,
            Intercepted::Queued(ack) => ack.to_response(),
        }
    }
}

pub struct Interceptor {
    routes: RouteTable,
    transport: Arc<dyn Transport>,
    store: Arc<dyn QueueStore>,
    cache: Arc<dyn ReadCache>,
    events: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    request_timeout: Duration,
    queue_behind_pending: bool,
}

impl Interceptor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        routes: RouteTable,
        transport: Arc<dyn Transport>,
        store: Arc<dyn QueueStore>,
        cache: Arc<dyn ReadCache>,
        events: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
        request_timeout: Duration,
        queue_behind_pending: bool,
    ) -> Self {
        Self {
            routes,
            transport,
            store,
            cache,
            events,
            clock,
            request_timeout,
            queue_behind_pending,
        }
    }

    pub async fn handle(&self, request: ApiRequest) -> Result<Intercepted, InterceptError> {
        match self.routes.classify(&request) {
            RequestClass::PassThrough => {
                let response = self.send(&request).await?;
                Ok(Intercepted::Response(response))
            }
            RequestClass::CacheableRead => self.read(request).await,
            RequestClass::QueueableWrite(kind) => self.write(kind, request).await,
        }
    }

    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        send_bounded(self.transport.as_ref(), request, self.request_timeout).await
    }

    async fn read(&self, request: ApiRequest) -> Result<Intercepted, InterceptError> {
        let key = RequestSignature::of(&request);
        let err = match self.send(&request).await {
            Ok(response) => {
                if response.is_success() {
                    let entry = CacheEntry {
                        response: response.clone(),
                        stored_at: self.clock.now(),
                    };
                    if let Err(e) = self.cache.put(&key, entry).await {
                        tracing::warn!(signature = %key, error = %e, "read cache write failed");
                    }
                }
                return Ok(Intercepted::Response(response));
            }
            Err(err) => err,
        };

        match self.cache.get(&key).await {
            Ok(Some(entry)) => {
                tracing::debug!(signature = %key, error = %err, "serving cached response");
                Ok(Intercepted::Cached {
                    response: entry.response,
                    stored_at: entry.stored_at,
                })
            }
            Ok(None) => Err(InterceptError::ServiceUnavailable {
                endpoint: request.path,
            }),
            Err(e) => {
                tracing::warn!(signature = %key, error = %e, "read cache lookup failed");
                Err(InterceptError::ServiceUnavailable {
                    endpoint: request.path,
                })
            }
        }
    }

    async fn write(
        &self,
        kind: OperationKind,
        request: ApiRequest,
    ) -> Result<Intercepted, InterceptError> {
        if self.queue_behind_pending && self.store.counts().await?.depth() > 0 {
            tracing::debug!(%kind, "queue not empty, queueing behind pending writes");
            return self.enqueue(kind, &request).await;
        }

        match self.send(&request).await {
            Ok(response) => Ok(Intercepted::Response(response)),
            Err(err) => {
                tracing::info!(%kind, path = %request.path, error = %err, "write deferred");
                self.enqueue(kind, &request).await
            }
        }
    }

    async fn enqueue(
        &self,
        kind: OperationKind,
        request: &ApiRequest,
    ) -> Result<Intercepted, InterceptError> {
        let op = NewOperation::capture(kind, request, self.clock.now());
        let operation_id = self.store.enqueue(op).await.inspect_err(|e| {
            tracing::error!(%kind, error = %e, "failed to persist deferred write");
        })?;
        // Persisted from here on; the caller must get the ack even if counting fails.
        match self.store.counts().await {
            Ok(counts) => {
                let depth = counts.depth();
                tracing::info!(%operation_id, %kind, depth, "operation queued");
                self.events.publish(StatusEvent::QueueChanged { depth });
            }
            Err(e) => {
                tracing::warn!(%operation_id, %kind, error = %e, "operation queued, depth unknown");
            }
        }
        Ok(Intercepted::Queued(QueuedAck { operation_id, kind }))
    }
}
