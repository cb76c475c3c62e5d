//! QueueStore port - キューの正本（source of truth）
//!
//! # 設計原則
//! - すべての変更はトランザクション内で完結する（途中状態を残さない）
//! - 状態遷移の妥当性と retry_count の単調性はストアが検証する
//! - プロセス再起動後も `list_pending()` をストアだけから再構築できる

use async_trait::async_trait;

use crate::domain::{
    ErrorKind, InstallationId, NewOperation, OperationId, OperationStatus, QueueCounts,
    QueuedOperation, UnreadableOperation,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt row for {id}: {detail}")]
    Corrupt { id: OperationId, detail: String },

    #[error("corrupt store metadata: {0}")]
    CorruptMeta(String),

    #[error("operation {0} not found")]
    NotFound(OperationId),

    #[error("invalid transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: OperationId,
        from: OperationStatus,
        to: OperationStatus,
    },

    #[error("retry_count for {id} would decrease: {current} -> {requested}")]
    RetryCountRegression {
        id: OperationId,
        current: u32,
        requested: u32,
    },

    #[error("unsupported schema version {found} (expected <= {supported})")]
    SchemaVersion { found: i64, supported: i64 },
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Storage
    }
}

/// CancelOutcome はユーザ操作による cancel の結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The entry was `Queued` and is gone.
    Removed,
    /// The entry already moved past `Queued`; nothing changed.
    NotCancellable(OperationStatus),
    NotFound,
}

/// `list_pending` の結果
///
/// 読み戻せない行は `unreadable` に分けて返し、残りの行の処理は止めない。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingScan {
    /// Decoded non-`Synced` entries, ascending by id.
    pub operations: Vec<QueuedOperation>,
    pub unreadable: Vec<UnreadableOperation>,
}

/// QueueStore はキュー済み操作の永続・トランザクショナルなストア
///
/// 書き込むのは interceptor（enqueue）と sync scheduler（遷移、compaction）
/// だけ。
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// idempotency key の名前空間。ストアが存在する限り変わらない
    fn installation_id(&self) -> InstallationId;

    /// 新しい `Queued` の操作を永続化して id を返す
    ///
    /// `enqueued_at` は保存済みの最新値にクランプされ、id 順と時刻順が
    /// 食い違うことはない。
    async fn enqueue(&self, op: NewOperation) -> Result<OperationId, StoreError>;

    async fn get(&self, id: OperationId) -> Result<Option<QueuedOperation>, StoreError>;

    /// Every non-`Synced` operation, ascending by id.
    ///
    /// A row that cannot be decoded is marked `Failed` and reported in
    /// `unreadable` instead of failing the whole listing.
    async fn list_pending(&self) -> Result<PendingScan, StoreError>;

    /// `Queued -> Syncing` をアトミックに行う
    ///
    /// entry が消えているか `Queued` でなければ `None`。
    async fn claim(&self, id: OperationId) -> Result<Option<QueuedOperation>, StoreError>;

    /// scheduler の遷移を適用
    ///
    /// Fails with `InvalidTransition` / `RetryCountRegression` without
    /// touching the row.
    async fn update(
        &self,
        id: OperationId,
        status: OperationStatus,
        retry_count: u32,
        last_error: Option<String>,
    ) -> Result<(), StoreError>;

    /// すべての `Syncing` 行を `Queued` に戻す（retry_count は据え置き）
    /// 戻した行数を返す。
    async fn recover_in_flight(&self) -> Result<usize, StoreError>;

    /// Remove a `Queued` entry. No-op for any other status.
    async fn cancel(&self, id: OperationId) -> Result<CancelOutcome, StoreError>;

    /// 手動リトライ: `Failed -> Queued`、`retry_count = 0`
    /// `Failed` でなければ false。
    async fn reset_failed(&self, id: OperationId) -> Result<bool, StoreError>;

    /// Manual discard of a `Failed` entry. Returns false when not `Failed`.
    async fn discard_failed(&self, id: OperationId) -> Result<bool, StoreError>;

    /// compaction: `Synced` の行だけを削除し、削除数を返す
    async fn delete_synced(&self) -> Result<usize, StoreError>;

    async fn counts(&self) -> Result<QueueCounts, StoreError>;
}

/// 全ストア実装で共有する遷移チェック
pub(crate) fn check_update(
    current: &QueuedOperation,
    status: OperationStatus,
    retry_count: u32,
) -> Result<(), StoreError> {
    if !current.status.can_transition_to(status) || current.status == OperationStatus::Failed {
        // Failed -> Queued goes through reset_failed only.
        return Err(StoreError::InvalidTransition {
            id: current.id,
            from: current.status,
            to: status,
        });
    }
    if retry_count < current.retry_count {
        return Err(StoreError::RetryCountRegression {
            id: current.id,
            current: current.retry_count,
            requested: retry_count,
        });
    }
    Ok(())
}
