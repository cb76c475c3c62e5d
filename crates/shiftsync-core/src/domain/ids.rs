//! Domain identifiers (strongly-typed IDs).
//!
//! - `OperationId`: ストアが採番する単調増加の代理キー。FIFO 順序の正本。
//! - `InstallationId`: データベースごとに一度だけ生成される ULID。
//!   idempotency key の名前空間として使い、端末間で id が衝突しないようにする。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// OperationId はキュー済み操作の識別子
///
/// Assigned by the queue store at enqueue time. Ordering of ids is the
/// replay order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(i64);

impl OperationId {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op-{}", self.0)
    }
}

impl FromStr for OperationId {
    type Err = std::num::ParseIntError;

    /// Accepts both `42` and `op-42`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix("op-").unwrap_or(s);
        digits.parse::<i64>().map(Self)
    }
}

/// InstallationId はクライアントのインストール（永続ストア 1 つ）の識別子
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstallationId(Ulid);

impl InstallationId {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    pub fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl From<Ulid> for InstallationId {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl fmt::Display for InstallationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for InstallationId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s).map(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_ids_order_by_value() {
        let a = OperationId::new(1);
        let b = OperationId::new(2);
        assert!(a < b);
        assert_eq!(a.to_string(), "op-1");
    }

    #[test]
    fn operation_id_parses_with_or_without_prefix() {
        assert_eq!("op-7".parse::<OperationId>().unwrap(), OperationId::new(7));
        assert_eq!("7".parse::<OperationId>().unwrap(), OperationId::new(7));
        assert!("op-x".parse::<OperationId>().is_err());
    }

    #[test]
    fn operation_id_serializes_as_plain_number() {
        let s = serde_json::to_string(&OperationId::new(12)).unwrap();
        assert_eq!(s, "12");
    }

    #[test]
    fn installation_id_text_form_parses_back() {
        let id = InstallationId::from_ulid(Ulid::new());
        let parsed: InstallationId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }
}
