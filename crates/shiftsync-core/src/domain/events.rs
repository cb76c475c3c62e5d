//! Status events broadcast to UI contexts.

use serde::{Deserialize, Serialize};

use super::ids::OperationId;

/// StatusEvent は status bridge に流すイベント
///
/// Serialized with a `type` tag so a UI bridge can forward it as-is
/// (`{"type":"queue-changed","depth":2}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StatusEvent {
    /// Queue depth (queued + syncing) changed.
    QueueChanged { depth: usize },

    #[serde(rename_all = "camelCase")]
    SyncSuccess { operation_id: OperationId },

    #[serde(rename_all = "camelCase")]
    SyncError {
        operation_id: OperationId,
        reason: String,
    },

    /// A sync pass finished (whatever its outcome).
    SyncComplete,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_type_tag() {
        let v = serde_json::to_value(StatusEvent::QueueChanged { depth: 2 }).unwrap();
        assert_eq!(v, serde_json::json!({"type": "queue-changed", "depth": 2}));

        let v = serde_json::to_value(StatusEvent::SyncError {
            operation_id: OperationId::new(3),
            reason: "HTTP 422".to_string(),
        })
        .unwrap();
        assert_eq!(
            v,
            serde_json::json!({"type": "sync-error", "operationId": 3, "reason": "HTTP 422"})
        );

        let v = serde_json::to_value(StatusEvent::SyncComplete).unwrap();
        assert_eq!(v, serde_json::json!({"type": "sync-complete"}));
    }
}
