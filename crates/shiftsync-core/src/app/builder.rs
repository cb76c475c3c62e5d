//! EngineBuilder - エンジンの構築とワイヤリング
//!
//! # Fail-fast 設計
//! - `build()` で設定値を検証し、起動後に panic しうる値（容量 0 のチャネル、
//!   周期 0 のタイマー）や意味のないルートを BuildError として返す
//! - transport だけは必須。store / cache / clock は未指定ならインメモリ・システム時刻

use std::sync::Arc;
use std::time::Duration;

use crate::config::{SyncConfig, SyncSettings};
use crate::domain::{RouteError, RouteTable};
use crate::impls::{
    InMemoryQueueStore, InMemoryReadCache, ReqwestTransport, SqliteDatabase, SqliteQueueStore,
    SqliteReadCache, StatusBridge,
};
use crate::ports::{
    Clock, EventSink, IdGenerator, QueueStore, ReadCache, StoreError, SystemClock, Transport,
    TransportError, UlidGenerator,
};

use super::engine::Engine;
use super::interceptor::Interceptor;
use super::scheduler::SyncPass;

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("no transport configured")]
    MissingTransport,

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("duplicate write routes: {0:?}")]
    DuplicateWriteRoutes(Vec<String>),

    #[error("write routes must use POST, PUT, PATCH or DELETE: {0:?}")]
    NonMutatingWriteRoutes(Vec<String>),

    #[error("invalid route pattern: {0}")]
    Route(#[from] RouteError),

    #[error("open queue store: {0}")]
    Store(#[from] StoreError),

    #[error("create transport: {0}")]
    Transport(#[from] TransportError),
}

pub struct EngineBuilder {
    settings: SyncSettings,
    routes: RouteTable,
    transport: Option<Arc<dyn Transport>>,
    store: Option<Arc<dyn QueueStore>>,
    cache: Option<Arc<dyn ReadCache>>,
    clock: Option<Arc<dyn Clock>>,
}

impl EngineBuilder {
    /// 新しい EngineBuilder を作成
    pub fn new() -> Self {
        Self {
            settings: SyncSettings::default(),
            routes: RouteTable::new(),
            transport: None,
            store: None,
            cache: None,
            clock: None,
        }
    }

    /// 本番用の配線: `database_path` の SQLite キュー + キャッシュ、reqwest の transport
    pub fn from_config(config: &SyncConfig) -> Result<Self, BuildError> {
        let settings = config.settings();
        let routes = config.routes()?;

        let db = SqliteDatabase::open(&config.database_path)?;
        let store = SqliteQueueStore::open(db.clone(), &UlidGenerator::new(SystemClock))?;
        let cache = SqliteReadCache::new(db);
        let client_timeout = settings.request_timeout.max(settings.replay_timeout);
        let transport = ReqwestTransport::new(config.base_url.clone(), client_timeout)?;

        tracing::info!(
            database = %config.database_path.display(),
            base_url = %config.base_url,
            installation_id = %store.installation_id(),
            "opened queue"
        );

        Ok(Self::new()
            .settings(settings)
            .routes(routes)
            .transport(Arc::new(transport))
            .store(Arc::new(store))
            .cache(Arc::new(cache)))
    }

    pub fn settings(mut self, settings: SyncSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn routes(mut self, routes: RouteTable) -> Self {
        self.routes = routes;
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn store(mut self, store: Arc<dyn QueueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn cache(mut self, cache: Arc<dyn ReadCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> Result<Engine, BuildError> {
        self.validate()?;
        let transport = self.transport.ok_or(BuildError::MissingTransport)?;
        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock),
        };
        let store: Arc<dyn QueueStore> = match self.store {
            Some(store) => store,
            None => {
                let installation = UlidGenerator::new(SystemClock).generate_installation_id();
                Arc::new(InMemoryQueueStore::new(installation))
            }
        };
        let cache: Arc<dyn ReadCache> = match self.cache {
            Some(cache) => cache,
            None => Arc::new(InMemoryReadCache::new()),
        };

        let settings = self.settings;
        let bridge = StatusBridge::new(settings.event_capacity);
        let events: Arc<dyn EventSink> = Arc::new(bridge.clone());

        let interceptor = Interceptor::new(
            self.routes,
            Arc::clone(&transport),
            Arc::clone(&store),
            cache,
            Arc::clone(&events),
            Arc::clone(&clock),
            settings.request_timeout,
            settings.queue_behind_pending,
        );
        let pass = SyncPass::new(
            Arc::clone(&store),
            transport,
            events,
            settings.replay_timeout,
            settings.idempotency_header.clone(),
        );

        Ok(Engine {
            interceptor: Arc::new(interceptor),
            pass,
            store,
            clock,
            bridge,
            settings,
        })
    }

    fn validate(&self) -> Result<(), BuildError> {
        let s = &self.settings;
        let durations = [
            ("request_timeout", Some(s.request_timeout)),
            ("replay_timeout", Some(s.replay_timeout)),
            ("periodic_sync", s.periodic_sync),
        ];
        for (name, value) in durations {
            if value == Some(Duration::ZERO) {
                return Err(BuildError::Zero(name));
            }
        }
        if s.event_capacity == 0 {
            return Err(BuildError::Zero("event_capacity"));
        }
        if s.command_capacity == 0 {
            return Err(BuildError::Zero("command_capacity"));
        }

        let duplicates = self.routes.duplicate_writes();
        if !duplicates.is_empty() {
            return Err(BuildError::DuplicateWriteRoutes(duplicates));
        }
        let non_mutating = self.routes.non_mutating_writes();
        if !non_mutating.is_empty() {
            return Err(BuildError::NonMutatingWriteRoutes(non_mutating));
        }
        Ok(())
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{HttpMethod, OperationKind};
    use crate::impls::ScriptedTransport;

    fn builder() -> EngineBuilder {
        EngineBuilder::new().transport(Arc::new(ScriptedTransport::online()))
    }

    #[test]
    fn build_with_defaults() {
        assert!(builder().build().is_ok());
    }

    #[test]
    fn missing_transport_is_rejected() {
        assert!(matches!(
            EngineBuilder::new().build(),
            Err(BuildError::MissingTransport)
        ));
    }

    #[test]
    fn zero_timeouts_and_capacities_are_rejected() {
        let settings = SyncSettings {
            replay_timeout: Duration::ZERO,
            ..SyncSettings::default()
        };
        assert!(matches!(
            builder().settings(settings).build(),
            Err(BuildError::Zero("replay_timeout"))
        ));

        let settings = SyncSettings {
            command_capacity: 0,
            ..SyncSettings::default()
        };
        assert!(matches!(
            builder().settings(settings).build(),
            Err(BuildError::Zero("command_capacity"))
        ));
    }

    #[test]
    fn bad_write_routes_are_rejected() {
        let routes = RouteTable::new()
            .allow_write(HttpMethod::Post, "/api/clock/in", OperationKind::ClockIn)
            .unwrap()
            .allow_write(HttpMethod::Post, "/api/clock/in", OperationKind::ClockOut)
            .unwrap();
        assert!(matches!(
            builder().routes(routes).build(),
            Err(BuildError::DuplicateWriteRoutes(d)) if d == vec!["POST /api/clock/in".to_string()]
        ));

        let routes = RouteTable::new()
            .allow_write(HttpMethod::Get, "/api/me", OperationKind::TaskUpdate)
            .unwrap();
        assert!(matches!(
            builder().routes(routes).build(),
            Err(BuildError::NonMutatingWriteRoutes(_))
        ));
    }

    #[test]
    fn from_config_opens_sqlite_and_validates_patterns() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = SyncConfig {
            database_path: dir.path().join("queue.db"),
            read_routes: vec!["/api/me".into()],
            ..SyncConfig::default()
        };
        assert!(EngineBuilder::from_config(&config).unwrap().build().is_ok());
        assert!(dir.path().join("queue.db").exists());

        config.read_routes = vec!["api/me".into()];
        assert!(matches!(
            EngineBuilder::from_config(&config),
            Err(BuildError::Route(RouteError::NotAbsolute(_)))
        ));
    }
}
