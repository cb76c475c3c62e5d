//! ReadCache port - last-known-good responses for allow-listed reads.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{ApiResponse, RequestSignature};

use super::StoreError;

/// Latest successful response for one request signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub response: ApiResponse,
    pub stored_at: DateTime<Utc>,
}

/// ReadCache は最新値だけを持つキャッシュ
///
/// 期限切れはない。古さは呼び出し側に伝える。
#[async_trait]
pub trait ReadCache: Send + Sync {
    async fn get(&self, key: &RequestSignature) -> Result<Option<CacheEntry>, StoreError>;

    /// Overwrite whatever is stored under `key`.
    async fn put(&self, key: &RequestSignature, entry: CacheEntry) -> Result<(), StoreError>;
}
