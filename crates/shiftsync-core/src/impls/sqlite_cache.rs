//! SqliteReadCache - `read_cache` table in the queue database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};

use crate::domain::{ApiResponse, RequestSignature};
use crate::ports::{CacheEntry, ReadCache, StoreError};

use super::sqlite_db::SqliteDatabase;

pub struct SqliteReadCache {
    db: SqliteDatabase,
}

impl SqliteReadCache {
    pub fn new(db: SqliteDatabase) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ReadCache for SqliteReadCache {
    async fn get(&self, key: &RequestSignature) -> Result<Option<CacheEntry>, StoreError> {
        let key = key.clone();
        self.db
            .run(move |conn| {
                let row = conn
                    .query_row(
                        "SELECT status, content_type, body, stored_at_ms
                         FROM read_cache WHERE signature = ?1",
                        params![key.as_str()],
                        |row| {
                            Ok((
                                row.get::<_, i64>(0)?,
                                row.get::<_, Option<String>>(1)?,
                                row.get::<_, Vec<u8>>(2)?,
                                row.get::<_, i64>(3)?,
                            ))
                        },
                    )
                    .optional()?;
                let Some((status, content_type, body, stored_at_ms)) = row else {
                    return Ok(None);
                };

                let status = u16::try_from(status).map_err(|_| {
                    StoreError::CorruptMeta(format!("cached status {status} for {key}"))
                })?;
                let stored_at = DateTime::<Utc>::from_timestamp_millis(stored_at_ms)
                    .ok_or_else(|| StoreError::CorruptMeta(format!("cached timestamp for {key}")))?;
                Ok(Some(CacheEntry {
                    response: ApiResponse {
                        status,
                        content_type,
                        body,
                    },
                    stored_at,
                }))
            })
            .await
    }

    async fn put(&self, key: &RequestSignature, entry: CacheEntry) -> Result<(), StoreError> {
        let key = key.clone();
        self.db
            .run(move |conn| {
                conn.execute(
                    "INSERT INTO read_cache (signature, status, content_type, body, stored_at_ms)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT(signature) DO UPDATE SET
                         status = excluded.status,
                         content_type = excluded.content_type,
                         body = excluded.body,
                         stored_at_ms = excluded.stored_at_ms",
                    params![
                        key.as_str(),
                        entry.response.status,
                        entry.response.content_type,
                        entry.response.body,
                        entry.stored_at.timestamp_millis(),
                    ],
                )?;
                Ok(())
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(body: &str, at: DateTime<Utc>) -> CacheEntry {
        CacheEntry {
            response: ApiResponse::json(200, &serde_json::json!({ "body": body })),
            stored_at: at,
        }
    }

    #[tokio::test]
    async fn latest_write_wins_and_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.db");
        let key = RequestSignature::from_path("/api/shifts?week=3&team=a");
        let t1 = Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();

        {
            let cache = SqliteReadCache::new(SqliteDatabase::open(&path).unwrap());
            cache.put(&key, entry("old", t1)).await.unwrap();
            cache.put(&key, entry("new", t2)).await.unwrap();
        }

        let cache = SqliteReadCache::new(SqliteDatabase::open(&path).unwrap());
        let lookup = RequestSignature::from_path("/api/shifts?team=a&week=3");
        let got = cache.get(&lookup).await.unwrap().unwrap();
        assert_eq!(got, entry("new", t2));
    }

    #[tokio::test]
    async fn miss_returns_none() {
        let cache = SqliteReadCache::new(SqliteDatabase::open_in_memory().unwrap());
        let got = cache.get(&RequestSignature::from_path("/api/me")).await.unwrap();
        assert!(got.is_none());
    }
}
