//! Engine - バックグラウンドで動くキュー本体と、UI が持つハンドル
//!
//! # 構成
//! - engine loop: `Command` を受けて interceptor / store を呼ぶ。リクエストは JoinSet で並行実行
//! - sync scheduler: 再送パスを 1 本ずつ実行
//! - `EngineHandle`: Clone 可能。mpsc + oneshot でのみ engine とやり取りする
//! - `EngineTask`: watch channel で shutdown を伝え、両タスクの終了を待つ
//!
//! UI コードがキューの状態に直接触れることはない。

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};

use crate::config::SyncSettings;
use crate::domain::{ApiRequest, ErrorKind, OperationId, QueueSnapshot, StatusEvent};
use crate::impls::{StatusBridge, StatusListener, StatusReceiver};
use crate::ports::{CancelOutcome, Clock, EventSink, QueueStore, StoreError};

use super::interceptor::{InterceptError, Intercepted, Interceptor};
use super::scheduler::{PassReport, SchedulerMsg, SyncPass, SyncScheduler, Trigger};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("engine is shut down")]
    Shutdown,

    #[error(transparent)]
    Intercept(#[from] InterceptError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EngineError {
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            EngineError::Shutdown => None,
            EngineError::Intercept(e) => Some(e.kind()),
            EngineError::Store(e) => Some(e.kind()),
        }
    }
}

type Reply<T> = oneshot::Sender<Result<T, StoreError>>;

enum Command {
    Request {
        request: ApiRequest,
        reply: oneshot::Sender<Result<Intercepted, InterceptError>>,
    },
    Retry {
        id: OperationId,
        /// Start a pass right away instead of waiting for the next trigger.
        trigger: bool,
        reply: Reply<bool>,
    },
    Cancel {
        id: OperationId,
        reply: Reply<CancelOutcome>,
    },
    Discard {
        id: OperationId,
        reply: Reply<bool>,
    },
    Snapshot {
        reply: Reply<QueueSnapshot>,
    },
    Compact {
        reply: Reply<usize>,
    },
}

/// Engine は配線済みでまだ起動していないエンジン（`EngineBuilder::build` が生成）
pub struct Engine {
    pub(crate) interceptor: Arc<Interceptor>,
    pub(crate) pass: SyncPass,
    pub(crate) store: Arc<dyn QueueStore>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) bridge: StatusBridge,
    pub(crate) settings: SyncSettings,
}

impl Engine {
    /// engine loop と sync scheduler を現在の runtime 上で起動
    pub fn start(self) -> EngineTask {
        let settings = self.settings;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shutdown_tx = Arc::new(shutdown_tx);
        let (command_tx, command_rx) = mpsc::channel(settings.command_capacity);
        let (scheduler_tx, scheduler_rx) = mpsc::channel(settings.command_capacity);

        let scheduler = SyncScheduler::new(
            self.pass,
            scheduler_rx,
            shutdown_rx.clone(),
            settings.start_online,
            settings.connectivity_debounce,
            settings.periodic_sync,
        );
        // TimeDelta::from_std only fails past ~292 million years.
        let stale_after =
            chrono::Duration::from_std(settings.stale_after).unwrap_or(chrono::Duration::MAX);
        let engine_loop = EngineLoop {
            interceptor: self.interceptor,
            store: self.store,
            clock: self.clock,
            events: self.bridge.clone(),
            scheduler: scheduler_tx.clone(),
            stale_after,
            rx: command_rx,
            shutdown: shutdown_rx,
        };

        let joins = vec![
            tokio::spawn(scheduler.run()),
            tokio::spawn(engine_loop.run()),
        ];
        tracing::info!(online = settings.start_online, "sync engine started");

        let handle = EngineHandle {
            commands: command_tx,
            scheduler: scheduler_tx,
            bridge: self.bridge,
            shutdown: Arc::clone(&shutdown_tx),
        };
        EngineTask {
            handle,
            shutdown_tx,
            joins,
        }
    }
}

/// EngineTask はバックグラウンドタスクの所有者
/// - `shutdown_and_join()` で両タスクの終了を待てる
/// - drop しても止まらない（ハンドルが残っている限り動き続ける）
pub struct EngineTask {
    handle: EngineHandle,
    shutdown_tx: Arc<watch::Sender<bool>>,
    joins: Vec<JoinHandle<()>>,
}

impl EngineTask {
    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    pub fn request_shutdown(&self) {
        // ignore send error: both loops may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            if let Err(e) = join.await {
                tracing::error!(error = %e, "engine task panicked");
            }
        }
        tracing::info!("sync engine stopped");
    }
}

/// EngineHandle は UI 側のハンドル
///
/// Clone は安価。すべてのメソッドは engine へのメッセージになる。
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<Command>,
    scheduler: mpsc::Sender<SchedulerMsg>,
    bridge: StatusBridge,
    shutdown: Arc<watch::Sender<bool>>,
}

impl EngineHandle {
    async fn call<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| EngineError::Shutdown)?;
        rx.await.map_err(|_| EngineError::Shutdown)
    }

    /// interceptor 経由で API リクエストを発行
    pub async fn request(&self, request: ApiRequest) -> Result<Intercepted, EngineError> {
        let result = self
            .call(|reply| Command::Request { request, reply })
            .await?;
        Ok(result?)
    }

    pub async fn connectivity_changed(&self, online: bool) -> Result<(), EngineError> {
        self.scheduler
            .send(SchedulerMsg::Connectivity(online))
            .await
            .map_err(|_| EngineError::Shutdown)
    }

    /// 同期パスを今すぐ走らせ（開始直前のパスがあれば合流し）、その結果を待つ
    pub async fn force_sync(&self) -> Result<PassReport, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.scheduler
            .send(SchedulerMsg::Trigger {
                trigger: Trigger::Force,
                reply: Some(reply),
            })
            .await
            .map_err(|_| EngineError::Shutdown)?;
        rx.await.map_err(|_| EngineError::Shutdown)
    }

    /// `Failed` の entry を `Queued` に戻し、すぐに同期パスを起動する
    ///
    /// `Failed` でなければ false を返す。
    pub async fn retry_failed(&self, id: OperationId) -> Result<bool, EngineError> {
        Ok(self
            .call(|reply| Command::Retry {
                id,
                trigger: true,
                reply,
            })
            .await??)
    }

    /// `retry_failed` と同じだが同期パスは起動しない。次のトリガで再送される
    pub async fn requeue_failed(&self, id: OperationId) -> Result<bool, EngineError> {
        Ok(self
            .call(|reply| Command::Retry {
                id,
                trigger: false,
                reply,
            })
            .await??)
    }

    /// `Queued` の entry を取り消す。それ以外の状態には触れない
    pub async fn cancel(&self, id: OperationId) -> Result<CancelOutcome, EngineError> {
        Ok(self.call(|reply| Command::Cancel { id, reply }).await??)
    }

    pub async fn discard_failed(&self, id: OperationId) -> Result<bool, EngineError> {
        Ok(self.call(|reply| Command::Discard { id, reply }).await??)
    }

    pub async fn snapshot(&self) -> Result<QueueSnapshot, EngineError> {
        Ok(self.call(|reply| Command::Snapshot { reply }).await??)
    }

    /// 次のパスを待たずに `Synced` の entry を削除
    pub async fn compact(&self) -> Result<usize, EngineError> {
        Ok(self.call(|reply| Command::Compact { reply }).await??)
    }

    pub fn subscribe(&self) -> StatusReceiver {
        self.bridge.subscribe()
    }

    pub fn subscribe_with<L: StatusListener>(&self, listener: L) -> JoinHandle<()> {
        self.bridge.subscribe_with(listener)
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

struct EngineLoop {
    interceptor: Arc<Interceptor>,
    store: Arc<dyn QueueStore>,
    clock: Arc<dyn Clock>,
    events: StatusBridge,
    scheduler: mpsc::Sender<SchedulerMsg>,
    stale_after: chrono::Duration,
    rx: mpsc::Receiver<Command>,
    shutdown: watch::Receiver<bool>,
}

impl EngineLoop {
    async fn run(mut self) {
        let mut requests = JoinSet::new();
        loop {
            if *self.shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                cmd = self.rx.recv() => match cmd {
                    Some(cmd) => self.dispatch(cmd, &mut requests).await,
                    None => break,
                },
                Some(joined) = requests.join_next(), if !requests.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "request task failed");
                    }
                }
            }
        }

        // In-flight requests are bounded by request_timeout; let them finish.
        while let Some(joined) = requests.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "request task failed");
            }
        }
        tracing::debug!("engine loop stopped");
    }

    async fn dispatch(&self, cmd: Command, requests: &mut JoinSet<()>) {
        match cmd {
            Command::Request { request, reply } => {
                let interceptor = Arc::clone(&self.interceptor);
                requests.spawn(async move {
                    let _ = reply.send(interceptor.handle(request).await);
                });
            }
            Command::Retry { id, trigger, reply } => {
                let _ = reply.send(self.retry(id, trigger).await);
            }
            Command::Cancel { id, reply } => {
                let _ = reply.send(self.cancel(id).await);
            }
            Command::Discard { id, reply } => {
                let _ = reply.send(self.discard(id).await);
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot().await);
            }
            Command::Compact { reply } => {
                let _ = reply.send(self.store.delete_synced().await);
            }
        }
    }

    async fn retry(&self, id: OperationId, trigger: bool) -> Result<bool, StoreError> {
        if !self.store.reset_failed(id).await? {
            tracing::info!(operation_id = %id, "retry ignored: entry is not failed");
            return Ok(false);
        }
        tracing::info!(operation_id = %id, trigger, "failed entry requeued by user");
        self.publish_depth().await;
        if !trigger {
            return Ok(true);
        }

        let msg = SchedulerMsg::Trigger {
            trigger: Trigger::ManualRetry,
            reply: None,
        };
        if let Err(e) = self.scheduler.try_send(msg) {
            // A full channel already holds a trigger that will pick this up.
            tracing::debug!(error = %e, "retry trigger not delivered");
        }
        Ok(true)
    }

    async fn cancel(&self, id: OperationId) -> Result<CancelOutcome, StoreError> {
        let outcome = self.store.cancel(id).await?;
        match outcome {
            CancelOutcome::Removed => {
                tracing::info!(operation_id = %id, "queued entry cancelled");
                self.publish_depth().await;
            }
            CancelOutcome::NotCancellable(status) => {
                tracing::info!(operation_id = %id, %status, "cancel ignored");
            }
            CancelOutcome::NotFound => {
                tracing::info!(operation_id = %id, "cancel ignored: no such entry");
            }
        }
        Ok(outcome)
    }

    async fn discard(&self, id: OperationId) -> Result<bool, StoreError> {
        let removed = self.store.discard_failed(id).await?;
        if removed {
            tracing::info!(operation_id = %id, "failed entry discarded");
            self.publish_depth().await;
        } else {
            tracing::info!(operation_id = %id, "discard ignored: entry is not failed");
        }
        Ok(removed)
    }

    async fn snapshot(&self) -> Result<QueueSnapshot, StoreError> {
        let scan = self.store.list_pending().await?;
        let now = self.clock.now();
        let mut snapshot = QueueSnapshot::build(&scan.operations, now, self.stale_after);
        snapshot.unreadable = scan.unreadable;
        Ok(snapshot)
    }

    /// The change is already committed; a failed count only skips the event.
    async fn publish_depth(&self) {
        match self.store.counts().await {
            Ok(counts) => self.events.publish(StatusEvent::QueueChanged {
                depth: counts.depth(),
            }),
            Err(e) => tracing::warn!(error = %e, "queue-changed skipped: cannot read depth"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::EngineBuilder;
    use crate::domain::{HttpMethod, InstallationId, OperationKind, OperationStatus, RouteTable};
    use crate::impls::{
        BridgeMessage, InMemoryQueueStore, ScriptedTransport, SqliteDatabase, SqliteQueueStore,
    };
    use crate::ports::{FixedClock, UlidGenerator};
    use chrono::{TimeZone, Utc};
    use std::path::Path;
    use std::time::Duration;
    use ulid::Ulid;

    fn routes() -> RouteTable {
        RouteTable::new()
            .allow_read("/api/me")
            .unwrap()
            .allow_write(HttpMethod::Post, "/api/clock/in", OperationKind::ClockIn)
            .unwrap()
            .allow_write(HttpMethod::Post, "/api/clock/out", OperationKind::ClockOut)
            .unwrap()
            .allow_write(HttpMethod::Patch, "/api/tasks/*", OperationKind::TaskUpdate)
            .unwrap()
    }

    fn settings(start_online: bool) -> SyncSettings {
        SyncSettings {
            start_online,
            periodic_sync: None,
            ..SyncSettings::default()
        }
    }

    fn clock() -> FixedClock {
        FixedClock::new(Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap())
    }

    fn start(
        transport: Arc<ScriptedTransport>,
        store: Arc<dyn QueueStore>,
        start_online: bool,
    ) -> EngineTask {
        EngineBuilder::new()
            .settings(settings(start_online))
            .routes(routes())
            .transport(transport)
            .store(store)
            .clock(Arc::new(clock()))
            .build()
            .unwrap()
            .start()
    }

    fn memory_store() -> Arc<dyn QueueStore> {
        Arc::new(InMemoryQueueStore::new(InstallationId::from_ulid(Ulid::new())))
    }

    fn sqlite_store(path: &Path) -> Arc<dyn QueueStore> {
        let db = SqliteDatabase::open(path).unwrap();
        Arc::new(SqliteQueueStore::open(db, &UlidGenerator::new(clock())).unwrap())
    }

    async fn wait_for_sync_complete(rx: &mut StatusReceiver) -> Vec<StatusEvent> {
        let mut seen = Vec::new();
        loop {
            match rx.recv().await {
                Some(BridgeMessage::Event(StatusEvent::SyncComplete)) => {
                    seen.push(StatusEvent::SyncComplete);
                    return seen;
                }
                Some(BridgeMessage::Event(e)) => seen.push(e),
                Some(BridgeMessage::Missed(_)) => {}
                None => return seen,
            }
        }
    }

    fn clock_in() -> ApiRequest {
        ApiRequest::new(HttpMethod::Post, "/api/clock/in")
            .with_json(&serde_json::json!({ "site": 4, "note": "gate B" }))
    }

    #[tokio::test]
    async fn clock_in_offline_then_reconnect_drains_queue() {
        let transport = Arc::new(ScriptedTransport::offline());
        let task = start(transport.clone(), memory_store(), false);
        let handle = task.handle();
        let mut events = handle.subscribe();

        let got = handle.request(clock_in()).await.unwrap();
        let Intercepted::Queued(ack) = got else {
            panic!("expected queued ack, got {got:?}");
        };
        assert_eq!(handle.snapshot().await.unwrap().depth, 1);
        assert_eq!(
            events.recv().await,
            Some(BridgeMessage::Event(StatusEvent::QueueChanged { depth: 1 }))
        );

        transport.go_online();
        handle.connectivity_changed(true).await.unwrap();
        let seen = wait_for_sync_complete(&mut events).await;

        assert_eq!(
            seen,
            vec![
                StatusEvent::SyncSuccess {
                    operation_id: ack.operation_id
                },
                StatusEvent::QueueChanged { depth: 0 },
                StatusEvent::SyncComplete,
            ]
        );
        assert_eq!(handle.snapshot().await.unwrap().depth, 0);

        // Replayed body is the captured body.
        let sent = transport.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].body, clock_in().body);

        task.shutdown_and_join().await;
    }

    #[tokio::test]
    async fn rejected_entry_is_listed_and_can_be_retried() {
        let transport = Arc::new(ScriptedTransport::offline());
        let task = start(transport.clone(), memory_store(), false);
        let handle = task.handle();

        let Intercepted::Queued(ack) = handle.request(clock_in()).await.unwrap() else {
            panic!("expected queued ack");
        };
        transport.go_online();
        transport.respond(422, "shift already closed");

        let report = handle.force_sync().await.unwrap();
        assert_eq!(report.failed, 1);

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.depth, 0);
        assert_eq!(snapshot.failed.len(), 1);
        let failed = &snapshot.failed[0];
        assert_eq!(failed.id, ack.operation_id);
        assert_eq!(failed.label, "Clock in");
        assert_eq!(failed.retry_count, 1);
        assert_eq!(failed.last_error.as_deref(), Some("HTTP 422: shift already closed"));

        // More triggers never replay it again.
        handle.force_sync().await.unwrap();
        assert_eq!(transport.sent().len(), 2);

        let mut events = handle.subscribe();
        assert!(handle.retry_failed(ack.operation_id).await.unwrap());
        assert_eq!(
            events.recv().await,
            Some(BridgeMessage::Event(StatusEvent::QueueChanged { depth: 1 }))
        );
        wait_for_sync_complete(&mut events).await;
        assert!(handle.snapshot().await.unwrap().failed.is_empty());
        assert_eq!(transport.sent().len(), 3);

        task.shutdown_and_join().await;
    }

    #[tokio::test]
    async fn requeue_without_trigger_waits_for_next_sync() {
        let transport = Arc::new(ScriptedTransport::offline());
        let store = memory_store();
        let task = start(transport.clone(), store.clone(), false);
        let handle = task.handle();

        let Intercepted::Queued(ack) = handle.request(clock_in()).await.unwrap() else {
            panic!("expected queued ack");
        };
        transport.go_online();
        transport.respond(422, "shift already closed");
        assert_eq!(handle.force_sync().await.unwrap().failed, 1);
        transport.go_offline();

        assert!(handle.requeue_failed(ack.operation_id).await.unwrap());
        assert!(!handle.requeue_failed(ack.operation_id).await.unwrap());
        task.shutdown_and_join().await;

        let op = store.get(ack.operation_id).await.unwrap().unwrap();
        assert_eq!((op.status, op.retry_count), (OperationStatus::Queued, 0));
        assert_eq!(op.last_error, None);
        assert_eq!(transport.sent().len(), 2);
    }

    #[tokio::test]
    async fn snapshot_lists_unreadable_rows_next_to_healthy_ones() {
        let dir = tempfile::tempdir().unwrap();
        let db = SqliteDatabase::open(&dir.path().join("queue.db")).unwrap();
        let store = Arc::new(SqliteQueueStore::open(db, &UlidGenerator::new(clock())).unwrap());
        let task = start(Arc::new(ScriptedTransport::offline()), store.clone(), false);
        let handle = task.handle();

        let Intercepted::Queued(bad) = handle.request(clock_in()).await.unwrap() else {
            panic!("expected queued ack");
        };
        handle
            .request(ApiRequest::new(HttpMethod::Patch, "/api/tasks/12"))
            .await
            .unwrap();
        let broken = bad.operation_id;
        store
            .database()
            .run(move |conn| {
                conn.execute(
                    "UPDATE queued_operations SET method = 'BREW' WHERE id = ?1",
                    rusqlite::params![broken.get()],
                )?;
                Ok(())
            })
            .await
            .unwrap();

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.depth, 1);
        assert_eq!(snapshot.pending[0].kind, OperationKind::TaskUpdate);
        assert_eq!(snapshot.unreadable.len(), 1);
        assert_eq!(snapshot.unreadable[0].id, broken);

        assert!(handle.discard_failed(broken).await.unwrap());
        assert!(handle.snapshot().await.unwrap().unreadable.is_empty());
        task.shutdown_and_join().await;
    }

    #[tokio::test]
    async fn cancel_and_discard_only_touch_matching_states() {
        let transport = Arc::new(ScriptedTransport::offline());
        let store = memory_store();
        let task = start(transport.clone(), store.clone(), false);
        let handle = task.handle();

        let Intercepted::Queued(first) = handle.request(clock_in()).await.unwrap() else {
            panic!("expected queued ack");
        };
        let clock_out = ApiRequest::new(HttpMethod::Post, "/api/clock/out");
        let Intercepted::Queued(second) = handle.request(clock_out).await.unwrap() else {
            panic!("expected queued ack");
        };

        assert!(!handle.discard_failed(first.operation_id).await.unwrap());
        assert_eq!(
            handle.cancel(first.operation_id).await.unwrap(),
            CancelOutcome::Removed
        );
        assert_eq!(
            handle.cancel(first.operation_id).await.unwrap(),
            CancelOutcome::NotFound
        );

        transport.go_online();
        transport.respond(400, "bad");
        handle.force_sync().await.unwrap();
        assert_eq!(
            handle.cancel(second.operation_id).await.unwrap(),
            CancelOutcome::NotCancellable(OperationStatus::Failed)
        );
        assert!(handle.discard_failed(second.operation_id).await.unwrap());
        assert!(store.list_pending().await.unwrap().operations.is_empty());

        task.shutdown_and_join().await;
    }

    #[tokio::test]
    async fn restart_keeps_queue_order_and_retry_counts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.db");
        let transport = Arc::new(ScriptedTransport::offline());

        {
            let task = start(transport.clone(), sqlite_store(&path), false);
            let handle = task.handle();
            handle.request(clock_in()).await.unwrap();
            handle
                .request(ApiRequest::new(HttpMethod::Patch, "/api/tasks/12"))
                .await
                .unwrap();
            // Each pass stops at the head of the queue.
            for _ in 0..2 {
                handle.force_sync().await.unwrap();
            }
            task.shutdown_and_join().await;
        }

        let task = start(transport.clone(), sqlite_store(&path), false);
        let snapshot = task.handle().snapshot().await.unwrap();
        let rows: Vec<_> = snapshot
            .pending
            .iter()
            .map(|s| (s.kind, s.status, s.retry_count))
            .collect();
        assert_eq!(
            rows,
            vec![
                (OperationKind::ClockIn, OperationStatus::Queued, 2),
                (OperationKind::TaskUpdate, OperationStatus::Queued, 0),
            ]
        );
        task.shutdown_and_join().await;
    }

    #[tokio::test]
    async fn startup_with_pending_entries_syncs_when_online() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.db");
        {
            let task = start(Arc::new(ScriptedTransport::offline()), sqlite_store(&path), false);
            task.handle().request(clock_in()).await.unwrap();
            task.shutdown_and_join().await;
        }

        let transport = Arc::new(ScriptedTransport::online());
        let task = start(transport.clone(), sqlite_store(&path), true);
        let handle = task.handle();
        // force_sync joins or follows the startup pass.
        handle.force_sync().await.unwrap();

        assert_eq!(handle.snapshot().await.unwrap().depth, 0);
        assert_eq!(transport.sent_paths(), vec!["/api/clock/in"]);
        task.shutdown_and_join().await;
    }

    #[tokio::test]
    async fn stale_entries_are_flagged_in_snapshot() {
        let transport = Arc::new(ScriptedTransport::offline());
        let clock = clock();
        let task = EngineBuilder::new()
            .settings(SyncSettings {
                stale_after: Duration::from_secs(3600),
                ..settings(false)
            })
            .routes(routes())
            .transport(transport)
            .clock(Arc::new(clock.clone()))
            .build()
            .unwrap()
            .start();
        let handle = task.handle();
        handle.request(clock_in()).await.unwrap();

        assert!(!handle.snapshot().await.unwrap().pending[0].stale);
        clock.advance(chrono::Duration::hours(2));
        assert!(handle.snapshot().await.unwrap().pending[0].stale);

        task.shutdown_and_join().await;
    }

    #[tokio::test]
    async fn handle_reports_shutdown_after_stop() {
        let task = start(Arc::new(ScriptedTransport::online()), memory_store(), false);
        let handle = task.handle();
        task.shutdown_and_join().await;

        assert!(matches!(
            handle.snapshot().await,
            Err(EngineError::Shutdown)
        ));
        assert!(matches!(
            handle.force_sync().await,
            Err(EngineError::Shutdown)
        ));
    }

    #[tokio::test]
    async fn server_errors_on_online_writes_reach_the_caller() {
        let transport = Arc::new(ScriptedTransport::online());
        transport.respond(403, "forbidden");
        let task = start(transport, memory_store(), true);
        let handle = task.handle();

        let got = handle.request(clock_in()).await.unwrap();
        assert_eq!(got.into_response().status, 403);
        assert_eq!(handle.snapshot().await.unwrap().depth, 0);

        let me = handle.request(ApiRequest::get("/api/me")).await.unwrap();
        assert_eq!(me.into_response().status, 200);
        task.shutdown_and_join().await;
    }
}
