//! Queued operation record: the unit of deferred work.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{InstallationId, OperationId};
use super::request::{ApiRequest, HttpMethod};
use super::state::OperationStatus;

/// OperationKind はキュー済み write の意味上の種別
///
/// Resolved from the write route table when the operation is captured, so
/// replay never needs to know about business kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    ClockIn,
    ClockOut,
    BreakStart,
    BreakEnd,
    ManualEntryCreate,
    ManualEntryUpdate,
    ManualEntryDelete,
    TaskUpdate,
}

impl OperationKind {
    pub const ALL: [OperationKind; 8] = [
        OperationKind::ClockIn,
        OperationKind::ClockOut,
        OperationKind::BreakStart,
        OperationKind::BreakEnd,
        OperationKind::ManualEntryCreate,
        OperationKind::ManualEntryUpdate,
        OperationKind::ManualEntryDelete,
        OperationKind::TaskUpdate,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::ClockIn => "clock_in",
            OperationKind::ClockOut => "clock_out",
            OperationKind::BreakStart => "break_start",
            OperationKind::BreakEnd => "break_end",
            OperationKind::ManualEntryCreate => "manual_entry_create",
            OperationKind::ManualEntryUpdate => "manual_entry_update",
            OperationKind::ManualEntryDelete => "manual_entry_delete",
            OperationKind::TaskUpdate => "task_update",
        }
    }

    /// Label shown next to pending / failed entries.
    pub fn label(self) -> &'static str {
        match self {
            OperationKind::ClockIn => "Clock in",
            OperationKind::ClockOut => "Clock out",
            OperationKind::BreakStart => "Start break",
            OperationKind::BreakEnd => "End break",
            OperationKind::ManualEntryCreate => "New time entry",
            OperationKind::ManualEntryUpdate => "Edit time entry",
            OperationKind::ManualEntryDelete => "Delete time entry",
            OperationKind::TaskUpdate => "Task update",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown operation kind '{0}'")]
pub struct UnknownKind(pub String);

impl FromStr for OperationKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OperationKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| UnknownKind(s.to_string()))
    }
}

/// NewOperation は interceptor が捕捉した write（id 採番前）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOperation {
    pub kind: OperationKind,
    pub endpoint: String,
    pub method: HttpMethod,
    pub content_type: Option<String>,
    pub payload: Vec<u8>,
    pub enqueued_at: DateTime<Utc>,
}

impl NewOperation {
    /// Capture `request` verbatim. The body becomes the immutable payload.
    pub fn capture(kind: OperationKind, request: &ApiRequest, enqueued_at: DateTime<Utc>) -> Self {
        Self {
            kind,
            endpoint: request.path.clone(),
            method: request.method,
            content_type: request.content_type.clone(),
            payload: request.body.clone().unwrap_or_default(),
            enqueued_at,
        }
    }
}

/// QueuedOperation はキュー内の操作のメタデータ + payload
///
/// Only the queue store mutates `status`, `retry_count` and `last_error`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedOperation {
    pub id: OperationId,
    pub kind: OperationKind,
    pub endpoint: String,
    pub method: HttpMethod,
    pub content_type: Option<String>,
    pub payload: Vec<u8>,
    pub enqueued_at: DateTime<Utc>,
    pub retry_count: u32,
    pub status: OperationStatus,
    pub last_error: Option<String>,
}

impl QueuedOperation {
    /// Build the fresh record the store persists for `op`.
    pub fn from_new(id: OperationId, op: NewOperation) -> Self {
        Self {
            id,
            kind: op.kind,
            endpoint: op.endpoint,
            method: op.method,
            content_type: op.content_type,
            payload: op.payload,
            enqueued_at: op.enqueued_at,
            retry_count: 0,
            status: OperationStatus::Queued,
            last_error: None,
        }
    }

    /// API がこの操作の重複送信を捨てるためのキー
    pub fn idempotency_key(&self, installation: InstallationId) -> String {
        format!("{installation}:{}:{}", self.kind, self.id.get())
    }

    /// The request to send on replay: identical endpoint/method/content-type/payload.
    pub fn replay_request(&self, idempotency: Option<(&str, InstallationId)>) -> ApiRequest {
        let mut request = ApiRequest::new(self.method, self.endpoint.clone());
        request.content_type = self.content_type.clone();
        request.body = Some(self.payload.clone());
        if let Some((header, installation)) = idempotency {
            request = request.with_header(header, self.idempotency_key(installation));
        }
        request
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.enqueued_at
    }
}
