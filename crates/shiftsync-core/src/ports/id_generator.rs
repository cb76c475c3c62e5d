//! IdGenerator port - installation id の生成
//!
//! Clock を使って現在時刻ベースの ULID を生成する。テストでは FixedClock で
//! timestamp 部分を固定できる。

use ulid::Ulid;

use crate::domain::InstallationId;
use crate::ports::Clock;

pub trait IdGenerator: Send + Sync {
    fn generate_installation_id(&self) -> InstallationId;
}

pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    /// 新しい UlidGenerator を作成
    pub fn new(clock: C) -> Self {
        Self { clock }
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_installation_id(&self) -> InstallationId {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        let ulid = Ulid::from_parts(timestamp_ms, rand::random());
        InstallationId::from(ulid)
    }
}
