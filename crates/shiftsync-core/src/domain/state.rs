//! Operation state machine.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// OperationStatus はキュー済み操作の状態
///
/// 状態遷移:
/// - Queued -> Syncing -> Synced
/// - Queued -> Syncing -> Queued (transport failure, retry_count + 1)
/// - Queued -> Syncing -> Failed (application error, no automatic retry)
/// - Failed -> Queued (manual retry only)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// Waiting for the next sync pass.
    Queued,

    /// Being replayed right now. At most one entry per queue.
    Syncing,

    /// Accepted by the server. Eligible for compaction.
    Synced,

    /// Rejected by the server. Waits for manual retry or discard.
    Failed,
}

impl OperationStatus {
    /// Eligible for replay in a sync pass.
    pub fn is_runnable(self) -> bool {
        matches!(self, OperationStatus::Queued)
    }

    /// Counts towards the visible queue depth.
    pub fn is_pending(self) -> bool {
        matches!(self, OperationStatus::Queued | OperationStatus::Syncing)
    }

    pub fn can_transition_to(self, next: OperationStatus) -> bool {
        use OperationStatus::*;
        matches!(
            (self, next),
            (Queued, Syncing)
                | (Syncing, Synced)
                | (Syncing, Queued)
                | (Syncing, Failed)
                | (Failed, Queued)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OperationStatus::Queued => "queued",
            OperationStatus::Syncing => "syncing",
            OperationStatus::Synced => "synced",
            OperationStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown operation status '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for OperationStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(OperationStatus::Queued),
            "syncing" => Ok(OperationStatus::Syncing),
            "synced" => Ok(OperationStatus::Synced),
            "failed" => Ok(OperationStatus::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use OperationStatus::*;

    #[rstest]
    #[case::claim(Queued, Syncing)]
    #[case::success(Syncing, Synced)]
    #[case::transport_retry(Syncing, Queued)]
    #[case::application_error(Syncing, Failed)]
    #[case::manual_retry(Failed, Queued)]
    fn allowed_transitions(#[case] from: OperationStatus, #[case] to: OperationStatus) {
        assert!(from.can_transition_to(to));
    }

    #[rstest]
    #[case::skip_syncing(Queued, Synced)]
    #[case::synced_is_final(Synced, Queued)]
    #[case::synced_not_replayed(Synced, Syncing)]
    #[case::failed_not_auto_replayed(Failed, Syncing)]
    #[case::double_claim(Syncing, Syncing)]
    fn rejected_transitions(#[case] from: OperationStatus, #[case] to: OperationStatus) {
        assert!(!from.can_transition_to(to));
    }

    #[test]
    fn only_queued_entries_are_runnable() {
        assert!(Queued.is_runnable());
        for status in [Syncing, Synced, Failed] {
            assert!(!status.is_runnable(), "{status} must not be replayed");
        }
    }

    #[test]
    fn pending_means_queued_or_syncing() {
        assert!(Queued.is_pending());
        assert!(Syncing.is_pending());
        assert!(!Synced.is_pending());
        assert!(!Failed.is_pending());
    }

    #[test]
    fn text_form_round_trips() {
        for status in [Queued, Syncing, Synced, Failed] {
            assert_eq!(status.as_str().parse::<OperationStatus>().unwrap(), status);
        }
        assert!("done".parse::<OperationStatus>().is_err());
    }
}
