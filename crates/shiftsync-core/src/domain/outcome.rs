//! Replay outcome: classification of one replay attempt.

use super::errors::ErrorKind;
use super::request::ApiResponse;

/// ReplayOutcome は 1 件の再送結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayOutcome {
    /// 2xx: the server accepted the operation.
    Accepted { status: u16 },

    /// A response arrived but it is not 2xx. Retrying cannot help.
    Rejected { status: u16, reason: String },

    /// Nothing arrived (connect/DNS/timeout). Safe to retry later.
    Unreachable { kind: ErrorKind, reason: String },
}

impl ReplayOutcome {
    pub fn from_response(response: &ApiResponse) -> Self {
        if response.is_success() {
            ReplayOutcome::Accepted {
                status: response.status,
            }
        } else {
            ReplayOutcome::Rejected {
                status: response.status,
                reason: response.reason(),
            }
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            ReplayOutcome::Accepted { .. } => None,
            ReplayOutcome::Rejected { .. } => Some(ErrorKind::Application),
            ReplayOutcome::Unreachable { kind, .. } => Some(*kind),
        }
    }
}
