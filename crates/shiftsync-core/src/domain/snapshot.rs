//! Read-only projections handed to UI code.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::ids::OperationId;
use super::operation::{OperationKind, QueuedOperation};
use super::state::OperationStatus;

/// QueueCounts は状態ごとの保存件数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub queued: usize,
    pub syncing: usize,
    pub synced: usize,
    pub failed: usize,
}

impl QueueCounts {
    /// Visible queue depth: entries still waiting for the server.
    pub fn depth(&self) -> usize {
        self.queued + self.syncing
    }

    pub fn record(&mut self, status: OperationStatus) {
        match status {
            OperationStatus::Queued => self.queued += 1,
            OperationStatus::Syncing => self.syncing += 1,
            OperationStatus::Synced => self.synced += 1,
            OperationStatus::Failed => self.failed += 1,
        }
    }
}

/// OperationSummary は UI に並べる pending / failed の 1 件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationSummary {
    pub id: OperationId,
    pub kind: OperationKind,
    pub label: String,
    pub status: OperationStatus,
    pub retry_count: u32,
    pub enqueued_at: DateTime<Utc>,
    pub last_error: Option<String>,
    /// Older than the configured staleness threshold.
    pub stale: bool,
}

impl OperationSummary {
    pub fn of(op: &QueuedOperation, now: DateTime<Utc>, stale_after: Duration) -> Self {
        Self {
            id: op.id,
            kind: op.kind,
            label: op.kind.label().to_string(),
            status: op.status,
            retry_count: op.retry_count,
            enqueued_at: op.enqueued_at,
            last_error: op.last_error.clone(),
            stale: op.age(now) > stale_after,
        }
    }
}

/// ストアに残っているが読み戻せない行。再送されず、discard を待つ
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnreadableOperation {
    pub id: OperationId,
    pub detail: String,
}

/// QueueSnapshot は depth と、再送順に並べた pending / failed の一覧
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub depth: usize,
    pub pending: Vec<OperationSummary>,
    pub failed: Vec<OperationSummary>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unreadable: Vec<UnreadableOperation>,
}

impl QueueSnapshot {
    pub fn build(ops: &[QueuedOperation], now: DateTime<Utc>, stale_after: Duration) -> Self {
        let mut snapshot = QueueSnapshot::default();
        for op in ops {
            let summary = OperationSummary::of(op, now, stale_after);
            match op.status {
                OperationStatus::Queued | OperationStatus::Syncing => {
                    snapshot.pending.push(summary)
                }
                OperationStatus::Failed => snapshot.failed.push(summary),
                OperationStatus::Synced => {}
            }
        }
        snapshot.depth = snapshot.pending.len();
        snapshot
    }
}
