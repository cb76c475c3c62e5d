//! SqliteDatabase - キューとキャッシュが共有する SQLite ファイル
//!
//! # 設計原則
//! - 接続は 1 本だけ。`Arc<Mutex<Connection>>` で共有する
//! - 同期 API の rusqlite は `spawn_blocking` の中で呼ぶ
//! - WAL + `synchronous=FULL`: commit が返った時点でディスクに載っている

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::{Connection, OptionalExtension, params};

use crate::ports::StoreError;

pub(crate) const SCHEMA_VERSION: i64 = 1;

const SCHEMA_V1: &str = "
CREATE TABLE IF NOT EXISTS queued_operations (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    kind           TEXT    NOT NULL,
    endpoint       TEXT    NOT NULL,
    method         TEXT    NOT NULL,
    content_type   TEXT,
    payload        BLOB    NOT NULL,
    enqueued_at_ms INTEGER NOT NULL,
    retry_count    INTEGER NOT NULL DEFAULT 0 CHECK (retry_count >= 0),
    status         TEXT    NOT NULL,
    last_error     TEXT
);
CREATE INDEX IF NOT EXISTS idx_queued_operations_status
    ON queued_operations (status, id);

CREATE TABLE IF NOT EXISTS read_cache (
    signature    TEXT    PRIMARY KEY,
    status       INTEGER NOT NULL,
    content_type TEXT,
    body         BLOB    NOT NULL,
    stored_at_ms INTEGER NOT NULL
);
";

/// SqliteDatabase はディスク上のデータベースへのハンドル（clone は 1 本の接続を共有）
#[derive(Clone)]
pub struct SqliteDatabase {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteDatabase {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Private in-memory database (lost on drop).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        // journal_mode returns the resulting mode as a row.
        let _mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "FULL")?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS store_meta (
                 key   TEXT PRIMARY KEY,
                 value TEXT NOT NULL
             );",
        )?;
        let found = match read_meta(&conn, "schema_version")? {
            Some(raw) => raw
                .parse::<i64>()
                .map_err(|_| StoreError::CorruptMeta(format!("schema_version = {raw:?}")))?,
            None => 0,
        };
        if found > SCHEMA_VERSION {
            return Err(StoreError::SchemaVersion {
                found,
                supported: SCHEMA_VERSION,
            });
        }
        if found < 1 {
            conn.execute_batch(SCHEMA_V1)?;
            write_meta(&conn, "schema_version", &SCHEMA_VERSION.to_string())?;
            tracing::debug!(version = SCHEMA_VERSION, "initialized sqlite schema");
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// blocking pool 上で接続に対して `f` を実行
    pub(crate) async fn run<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| StoreError::Unavailable("sqlite connection lock poisoned".into()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("blocking task failed: {e}")))?
    }

    /// `run` の同期版（まだ async でない起動処理用）
    pub(crate) fn run_blocking<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut guard = self
            .conn
            .lock()
            .map_err(|_| StoreError::Unavailable("sqlite connection lock poisoned".into()))?;
        f(&mut guard)
    }
}

pub(crate) fn read_meta(conn: &Connection, key: &str) -> Result<Option<String>, StoreError> {
    Ok(conn
        .query_row(
            "SELECT value FROM store_meta WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?)
}

pub(crate) fn write_meta(conn: &Connection, key: &str, value: &str) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO store_meta (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}
