//! SqliteQueueStore - 本番用の永続キュー
//!
//! # フロー
//! - enqueue: BEGIN IMMEDIATE → enqueued_at のクランプ → INSERT → COMMIT
//! - update: BEGIN IMMEDIATE → 現在行の読み出し → 遷移検証 → UPDATE → COMMIT
//!
//! 検証に失敗した場合はトランザクションを commit せずに drop するので、行は
//! 以前の状態のまま残る。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};

use crate::domain::{
    HttpMethod, InstallationId, NewOperation, OperationId, OperationKind, OperationStatus,
    QueueCounts, QueuedOperation, UnreadableOperation,
};
use crate::ports::queue_store::check_update;
use crate::ports::{CancelOutcome, IdGenerator, PendingScan, QueueStore, StoreError};

use super::sqlite_db::{SqliteDatabase, read_meta, write_meta};

const COLUMNS: &str = "id, kind, endpoint, method, content_type, payload, enqueued_at_ms, \
                       retry_count, status, last_error";

const META_INSTALLATION_ID: &str = "installation_id";
const META_LAST_ENQUEUED_AT: &str = "last_enqueued_at_ms";

pub struct SqliteQueueStore {
    db: SqliteDatabase,
    installation: InstallationId,
}

impl SqliteQueueStore {
    /// `db` のキューを開く。初回は installation id を作成
    pub fn open(db: SqliteDatabase, id_gen: &dyn IdGenerator) -> Result<Self, StoreError> {
        let installation = db.run_blocking(|conn| {
            if let Some(raw) = read_meta(conn, META_INSTALLATION_ID)? {
                return raw
                    .parse::<InstallationId>()
                    .map_err(|e| StoreError::CorruptMeta(format!("installation_id: {e}")));
            }
            let id = id_gen.generate_installation_id();
            write_meta(conn, META_INSTALLATION_ID, &id.to_string())?;
            tracing::info!(installation_id = %id, "created installation id");
            Ok(id)
        })?;
        Ok(Self { db, installation })
    }

    pub fn database(&self) -> &SqliteDatabase {
        &self.db
    }
}

/// Row as stored, before validation.
struct RawOperation {
    id: i64,
    kind: String,
    endpoint: String,
    method: String,
    content_type: Option<String>,
    payload: Vec<u8>,
    enqueued_at_ms: i64,
    retry_count: i64,
    status: String,
    last_error: Option<String>,
}

impl RawOperation {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            kind: row.get(1)?,
            endpoint: row.get(2)?,
            method: row.get(3)?,
            content_type: row.get(4)?,
            payload: row.get(5)?,
            enqueued_at_ms: row.get(6)?,
            retry_count: row.get(7)?,
            status: row.get(8)?,
            last_error: row.get(9)?,
        })
    }

    fn decode(self) -> Result<QueuedOperation, StoreError> {
        let id = OperationId::new(self.id);
        let corrupt = |detail: String| StoreError::Corrupt { id, detail };

        let kind = self
            .kind
            .parse::<OperationKind>()
            .map_err(|e| corrupt(e.to_string()))?;
        let method = self
            .method
            .parse::<HttpMethod>()
            .map_err(|e| corrupt(e.to_string()))?;
        let status = self
            .status
            .parse::<OperationStatus>()
            .map_err(|e| corrupt(e.to_string()))?;
        let enqueued_at = DateTime::<Utc>::from_timestamp_millis(self.enqueued_at_ms)
            .ok_or_else(|| {
                corrupt(format!("enqueued_at_ms out of range: {}", self.enqueued_at_ms))
            })?;
        let retry_count = u32::try_from(self.retry_count)
            .map_err(|_| corrupt(format!("retry_count out of range: {}", self.retry_count)))?;

        Ok(QueuedOperation {
            id,
            kind,
            endpoint: self.endpoint,
            method,
            content_type: self.content_type,
            payload: self.payload,
            enqueued_at,
            retry_count,
            status,
            last_error: self.last_error,
        })
    }
}

fn load(conn: &Connection, id: OperationId) -> Result<Option<QueuedOperation>, StoreError> {
    let raw = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM queued_operations WHERE id = ?1"),
            params![id.get()],
            RawOperation::from_row,
        )
        .optional()?;
    raw.map(RawOperation::decode).transpose()
}

fn load_status(conn: &Connection, id: OperationId) -> Result<Option<OperationStatus>, StoreError> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT status FROM queued_operations WHERE id = ?1",
            params![id.get()],
            |row| row.get(0),
        )
        .optional()?;
    raw.map(|s| {
        s.parse::<OperationStatus>().map_err(|e| StoreError::Corrupt {
            id,
            detail: e.to_string(),
        })
    })
    .transpose()
}

/// 読み戻せない行を `Failed` にして counts と discard から見えるようにする
fn quarantine(conn: &Connection, id: OperationId, detail: &str) -> Result<(), StoreError> {
    let changed = conn.execute(
        "UPDATE queued_operations SET status = ?2, last_error = ?3
         WHERE id = ?1 AND status != ?2",
        params![
            id.get(),
            OperationStatus::Failed.as_str(),
            format!("unreadable row: {detail}"),
        ],
    )?;
    if changed > 0 {
        tracing::warn!(operation_id = %id, %detail, "unreadable row moved to failed");
    }
    Ok(())
}

#[async_trait]
impl QueueStore for SqliteQueueStore {
    fn installation_id(&self) -> InstallationId {
        self.installation
    }

    async fn enqueue(&self, op: NewOperation) -> Result<OperationId, StoreError> {
        self.db
            .run(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

                let mut at_ms = op.enqueued_at.timestamp_millis();
                if let Some(raw) = read_meta(&tx, META_LAST_ENQUEUED_AT)?
                    && let Ok(last) = raw.parse::<i64>()
                    && at_ms < last
                {
                    at_ms = last;
                }

                tx.execute(
                    "INSERT INTO queued_operations
                         (kind, endpoint, method, content_type, payload, enqueued_at_ms,
                          retry_count, status, last_error)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, NULL)",
                    params![
                        op.kind.as_str(),
                        op.endpoint,
                        op.method.as_str(),
                        op.content_type,
                        op.payload,
                        at_ms,
                        OperationStatus::Queued.as_str(),
                    ],
                )?;
                let id = OperationId::new(tx.last_insert_rowid());
                write_meta(&tx, META_LAST_ENQUEUED_AT, &at_ms.to_string())?;

                tx.commit()?;
                Ok(id)
            })
            .await
    }

    async fn get(&self, id: OperationId) -> Result<Option<QueuedOperation>, StoreError> {
        self.db.run(move |conn| load(conn, id)).await
    }

    async fn list_pending(&self) -> Result<PendingScan, StoreError> {
        self.db
            .run(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {COLUMNS} FROM queued_operations WHERE status != ?1 ORDER BY id ASC"
                ))?;
                let rows = stmt
                    .query_map(params![OperationStatus::Synced.as_str()], |row| {
                        Ok((row.get::<_, i64>(0)?, RawOperation::from_row(row)))
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                drop(stmt);

                let mut scan = PendingScan::default();
                for (id, raw) in rows {
                    let id = OperationId::new(id);
                    let decoded = raw
                        .map_err(|e| StoreError::Corrupt {
                            id,
                            detail: e.to_string(),
                        })
                        .and_then(RawOperation::decode);
                    match decoded {
                        Ok(op) => scan.operations.push(op),
                        Err(StoreError::Corrupt { id, detail }) => {
                            quarantine(conn, id, &detail)?;
                            scan.unreadable.push(UnreadableOperation { id, detail });
                        }
                        Err(e) => return Err(e),
                    }
                }
                Ok(scan)
            })
            .await
    }

    async fn claim(&self, id: OperationId) -> Result<Option<QueuedOperation>, StoreError> {
        self.db
            .run(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let changed = tx.execute(
                    "UPDATE queued_operations SET status = ?2 WHERE id = ?1 AND status = ?3",
                    params![
                        id.get(),
                        OperationStatus::Syncing.as_str(),
                        OperationStatus::Queued.as_str(),
                    ],
                )?;
                if changed == 0 {
                    return Ok(None);
                }
                let op = load(&tx, id)?;
                tx.commit()?;
                Ok(op)
            })
            .await
    }

    async fn update(
        &self,
        id: OperationId,
        status: OperationStatus,
        retry_count: u32,
        last_error: Option<String>,
    ) -> Result<(), StoreError> {
        self.db
            .run(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let current = load(&tx, id)?.ok_or(StoreError::NotFound(id))?;
                check_update(&current, status, retry_count)?;
                tx.execute(
                    "UPDATE queued_operations
                     SET status = ?2, retry_count = ?3, last_error = ?4
                     WHERE id = ?1",
                    params![id.get(), status.as_str(), retry_count, last_error],
                )?;
                tx.commit()?;
                Ok(())
            })
            .await
    }

    async fn recover_in_flight(&self) -> Result<usize, StoreError> {
        self.db
            .run(|conn| {
                Ok(conn.execute(
                    "UPDATE queued_operations SET status = ?1 WHERE status = ?2",
                    params![
                        OperationStatus::Queued.as_str(),
                        OperationStatus::Syncing.as_str(),
                    ],
                )?)
            })
            .await
    }

    async fn cancel(&self, id: OperationId) -> Result<CancelOutcome, StoreError> {
        self.db
            .run(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let Some(status) = load_status(&tx, id)? else {
                    return Ok(CancelOutcome::NotFound);
                };
                if status != OperationStatus::Queued {
                    return Ok(CancelOutcome::NotCancellable(status));
                }
                tx.execute(
                    "DELETE FROM queued_operations WHERE id = ?1",
                    params![id.get()],
                )?;
                tx.commit()?;
                Ok(CancelOutcome::Removed)
            })
            .await
    }

    async fn reset_failed(&self, id: OperationId) -> Result<bool, StoreError> {
        self.db
            .run(move |conn| {
                let changed = conn.execute(
                    "UPDATE queued_operations
                     SET status = ?2, retry_count = 0, last_error = NULL
                     WHERE id = ?1 AND status = ?3",
                    params![
                        id.get(),
                        OperationStatus::Queued.as_str(),
                        OperationStatus::Failed.as_str(),
                    ],
                )?;
                Ok(changed > 0)
            })
            .await
    }

    async fn discard_failed(&self, id: OperationId) -> Result<bool, StoreError> {
        self.db
            .run(move |conn| {
                let changed = conn.execute(
                    "DELETE FROM queued_operations WHERE id = ?1 AND status = ?2",
                    params![id.get(), OperationStatus::Failed.as_str()],
                )?;
                Ok(changed > 0)
            })
            .await
    }

    async fn delete_synced(&self) -> Result<usize, StoreError> {
        self.db
            .run(|conn| {
                Ok(conn.execute(
                    "DELETE FROM queued_operations WHERE status = ?1",
                    params![OperationStatus::Synced.as_str()],
                )?)
            })
            .await
    }

    async fn counts(&self) -> Result<QueueCounts, StoreError> {
        self.db
            .run(|conn| {
                let mut stmt = conn
                    .prepare("SELECT status, COUNT(*) FROM queued_operations GROUP BY status")?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;

                let mut counts = QueueCounts::default();
                for (raw, n) in rows {
                    let n = usize::try_from(n).unwrap_or(0);
                    // Unknown values are quarantined as failed by the next listing.
                    let status = raw.parse::<OperationStatus>().unwrap_or_else(|e| {
                        tracing::warn!(error = %e, rows = n, "unreadable status counted as failed");
                        OperationStatus::Failed
                    });
                    match status {
                        OperationStatus::Queued => counts.queued += n,
                        OperationStatus::Syncing => counts.syncing += n,
                        OperationStatus::Synced => counts.synced += n,
                        OperationStatus::Failed => counts.failed += n,
                    }
                }
                Ok(counts)
            })
            .await
    }
}
