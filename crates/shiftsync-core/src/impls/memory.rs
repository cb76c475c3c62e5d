//! In-memory queue store and read cache.
//!
//! Same semantics as the SQLite implementations; nothing survives the
//! process. Used by tests and by sessions that opt out of persistence.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{
    InstallationId, NewOperation, OperationId, OperationStatus, QueueCounts, QueuedOperation,
    RequestSignature,
};
use crate::ports::queue_store::check_update;
use crate::ports::{CacheEntry, CancelOutcome, PendingScan, QueueStore, ReadCache, StoreError};

struct InMemoryQueueState {
    /// All records, keyed (and therefore ordered) by id.
    records: BTreeMap<OperationId, QueuedOperation>,

    /// Next id to assign. Never reused, even after compaction.
    next_id: i64,

    /// Latest enqueued_at handed out, for clamping.
    last_enqueued_at: Option<DateTime<Utc>>,
}

impl InMemoryQueueState {
    fn allocate_id(&mut self) -> OperationId {
        let id = OperationId::new(self.next_id);
        self.next_id += 1;
        id
    }
}

pub struct InMemoryQueueStore {
    installation: InstallationId,
    state: Mutex<InMemoryQueueState>,
}

impl InMemoryQueueStore {
    /// 新しい空の InMemoryQueueStore を作成
    pub fn new(installation: InstallationId) -> Self {
        Self {
            installation,
            state: Mutex::new(InMemoryQueueState {
                records: BTreeMap::new(),
                next_id: 1,
                last_enqueued_at: None,
            }),
        }
    }
}

#[async_trait]
impl QueueStore for InMemoryQueueStore {
    fn installation_id(&self) -> InstallationId {
        self.installation
    }

    async fn enqueue(&self, mut op: NewOperation) -> Result<OperationId, StoreError> {
        let mut state = self.state.lock().await;
        if let Some(last) = state.last_enqueued_at
            && op.enqueued_at < last
        {
            op.enqueued_at = last;
        }
        state.last_enqueued_at = Some(op.enqueued_at);

        let id = state.allocate_id();
        state.records.insert(id, QueuedOperation::from_new(id, op));
        Ok(id)
    }

    async fn get(&self, id: OperationId) -> Result<Option<QueuedOperation>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.records.get(&id).cloned())
    }

    async fn list_pending(&self) -> Result<PendingScan, StoreError> {
        let state = self.state.lock().await;
        let operations = state
            .records
            .values()
            .filter(|op| op.status != OperationStatus::Synced)
            .cloned()
            .collect();
        Ok(PendingScan {
            operations,
            unreadable: Vec::new(),
        })
    }

    async fn claim(&self, id: OperationId) -> Result<Option<QueuedOperation>, StoreError> {
        let mut state = self.state.lock().await;
        match state.records.get_mut(&id) {
            Some(op) if op.status == OperationStatus::Queued => {
                op.status = OperationStatus::Syncing;
                Ok(Some(op.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn update(
        &self,
        id: OperationId,
        status: OperationStatus,
        retry_count: u32,
        last_error: Option<String>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let op = state.records.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        check_update(op, status, retry_count)?;
        op.status = status;
        op.retry_count = retry_count;
        op.last_error = last_error;
        Ok(())
    }

    async fn recover_in_flight(&self) -> Result<usize, StoreError> {
        let mut state = self.state.lock().await;
        let mut reset = 0;
        for op in state.records.values_mut() {
            if op.status == OperationStatus::Syncing {
                op.status = OperationStatus::Queued;
                reset += 1;
            }
        }
        Ok(reset)
    }

    async fn cancel(&self, id: OperationId) -> Result<CancelOutcome, StoreError> {
        let mut state = self.state.lock().await;
        let Some(op) = state.records.get(&id) else {
            return Ok(CancelOutcome::NotFound);
        };
        if op.status != OperationStatus::Queued {
            return Ok(CancelOutcome::NotCancellable(op.status));
        }
        state.records.remove(&id);
        Ok(CancelOutcome::Removed)
    }

    async fn reset_failed(&self, id: OperationId) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        match state.records.get_mut(&id) {
            Some(op) if op.status == OperationStatus::Failed => {
                op.status = OperationStatus::Queued;
                op.retry_count = 0;
                op.last_error = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn discard_failed(&self, id: OperationId) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        if state
            .records
            .get(&id)
            .is_some_and(|op| op.status == OperationStatus::Failed)
        {
            state.records.remove(&id);
            return Ok(true);
        }
        Ok(false)
    }

    async fn delete_synced(&self) -> Result<usize, StoreError> {
        let mut state = self.state.lock().await;
        let before = state.records.len();
        state
            .records
            .retain(|_, op| op.status != OperationStatus::Synced);
        Ok(before - state.records.len())
    }

    async fn counts(&self) -> Result<QueueCounts, StoreError> {
        let state = self.state.lock().await;
        let mut counts = QueueCounts::default();
        for op in state.records.values() {
            counts.record(op.status);
        }
        Ok(counts)
    }
}

#[derive(Default)]
pub struct InMemoryReadCache {
    entries: Mutex<HashMap<RequestSignature, CacheEntry>>,
}

impl InMemoryReadCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReadCache for InMemoryReadCache {
    async fn get(&self, key: &RequestSignature) -> Result<Option<CacheEntry>, StoreError> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn put(&self, key: &RequestSignature, entry: CacheEntry) -> Result<(), StoreError> {
        self.entries.lock().await.insert(key.clone(), entry);
        Ok(())
    }
}
