//! SyncScheduler - キューの再送ループ
//!
//! # フロー（1 パス）
//! 1. `recover_in_flight()`: 前回中断された `Syncing` を `Queued` に戻す
//! 2. `list_pending()` を id 昇順に走査し、`Queued` だけを 1 件ずつ処理
//!    （読み戻せない行はログに残して飛ばす）
//!    - `claim` → `Syncing`（その間に cancel されていたら skip）
//!    - 再送（`replay_timeout` で打ち切り）
//!    - 2xx → `Synced` + sync-success
//!    - 応答なし（接続失敗・タイムアウト）→ `Queued`, retry_count+1, パス終了
//!    - それ以外の応答 → `Failed`, retry_count+1, sync-error, 次へ
//! 3. compaction（`Synced` の削除）→ depth が変わっていれば queue-changed → sync-complete
//!
//! # 設計原則
//! - パスは同時に 1 本だけ。パス中に届いたトリガは次の 1 パスにまとめる
//! - ストアのエラーはそのパスを打ち切る（行は最後に確定した状態のまま）
//! - shutdown は操作の合間で止まる。再送中なら entry を `Queued` に戻す（retry_count は据え置き）

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::domain::{OperationId, OperationStatus, QueuedOperation, ReplayOutcome, StatusEvent};
use crate::ports::{EventSink, QueueStore, Transport, send_bounded};

/// StopReason はパスがキューの末尾まで届かずに終わった理由
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The network went away again; the rest waits for the next trigger.
    Transport,
    Storage,
    Shutdown,
}

/// PassReport は 1 パスの集計
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassReport {
    /// Replays sent (claimed entries).
    pub attempted: usize,
    pub synced: usize,
    pub failed: usize,
    /// Queue depth after compaction.
    pub remaining: usize,
    pub stopped: Option<StopReason>,
}

/// Trigger はパスの起動理由（ログ用）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Startup,
    ConnectivityRegained,
    Force,
    ManualRetry,
    Periodic,
}

pub(crate) enum SchedulerMsg {
    Connectivity(bool),
    Trigger {
        trigger: Trigger,
        reply: Option<oneshot::Sender<PassReport>>,
    },
}

enum Continue {
    Next,
    Stop(StopReason),
}

/// SyncPass はトリガとは独立した 1 パス分の再送ロジック
pub struct SyncPass {
    store: Arc<dyn QueueStore>,
    transport: Arc<dyn Transport>,
    events: Arc<dyn EventSink>,
    replay_timeout: Duration,
    idempotency_header: Option<String>,
}

impl SyncPass {
    pub fn new(
        store: Arc<dyn QueueStore>,
        transport: Arc<dyn Transport>,
        events: Arc<dyn EventSink>,
        replay_timeout: Duration,
        idempotency_header: Option<String>,
    ) -> Self {
        Self {
            store,
            transport,
            events,
            replay_timeout,
            idempotency_header,
        }
    }

    pub async fn run(&self, shutdown: &mut watch::Receiver<bool>) -> PassReport {
        let mut report = PassReport::default();

        let depth_before = match self.store.counts().await {
            Ok(counts) => Some(counts.depth()),
            Err(e) => {
                tracing::error!(error = %e, "sync pass aborted: cannot read queue counts");
                report.stopped = Some(StopReason::Storage);
                None
            }
        };

        if report.stopped.is_none() {
            report.stopped = self.drain(&mut report, shutdown).await;
        }

        self.finish(&mut report, depth_before).await;
        report
    }

    async fn drain(
        &self,
        report: &mut PassReport,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Option<StopReason> {
        match self.store.recover_in_flight().await {
            Ok(0) => {}
            Ok(n) => tracing::warn!(count = n, "reset interrupted replays to queued"),
            Err(e) => {
                tracing::error!(error = %e, "sync pass aborted: recover_in_flight failed");
                return Some(StopReason::Storage);
            }
        }

        let pending = match self.store.list_pending().await {
            Ok(pending) => pending,
            Err(e) => {
                tracing::error!(error = %e, "sync pass aborted: list_pending failed");
                return Some(StopReason::Storage);
            }
        };
        for bad in &pending.unreadable {
            tracing::warn!(
                operation_id = %bad.id,
                detail = %bad.detail,
                "skipping unreadable entry"
            );
        }

        for op in pending.operations {
            if !op.status.is_runnable() {
                continue;
            }
            if shutdown_requested(shutdown) {
                return Some(StopReason::Shutdown);
            }
            if let Continue::Stop(reason) = self.replay_one(op.id, report, shutdown).await {
                return Some(reason);
            }
        }
        None
    }

    async fn replay_one(
        &self,
        id: OperationId,
        report: &mut PassReport,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Continue {
        let op = match self.store.claim(id).await {
            Ok(Some(op)) => op,
            Ok(None) => {
                tracing::debug!(operation_id = %id, "skipping entry that is no longer queued");
                return Continue::Next;
            }
            Err(e) => {
                tracing::error!(operation_id = %id, error = %e, "claim failed");
                return Continue::Stop(StopReason::Storage);
            }
        };
        report.attempted += 1;

        let idempotency = self
            .idempotency_header
            .as_deref()
            .map(|header| (header, self.store.installation_id()));
        let request = op.replay_request(idempotency);

        let send = send_bounded(self.transport.as_ref(), &request, self.replay_timeout);
        let sent = tokio::select! {
            result = send => Some(result),
            _ = wait_for_shutdown(shutdown) => None,
        };
        let Some(result) = sent else {
            self.put_back(&op).await;
            return Continue::Stop(StopReason::Shutdown);
        };

        let outcome = match result {
            Ok(response) => ReplayOutcome::from_response(&response),
            Err(e) => ReplayOutcome::Unreachable {
                kind: e.kind(),
                reason: e.to_string(),
            },
        };
        self.apply(&op, outcome, report).await
    }

    async fn apply(
        &self,
        op: &QueuedOperation,
        outcome: ReplayOutcome,
        report: &mut PassReport,
    ) -> Continue {
        let next_retry = op.retry_count.saturating_add(1);
        let (status, retry_count, last_error) = match &outcome {
            ReplayOutcome::Accepted { .. } => (OperationStatus::Synced, op.retry_count, None),
            ReplayOutcome::Rejected { reason, .. } => {
                (OperationStatus::Failed, next_retry, Some(reason.clone()))
            }
            ReplayOutcome::Unreachable { reason, .. } => {
                (OperationStatus::Queued, next_retry, Some(reason.clone()))
            }
        };
        // Network-class failures hold back everything behind this entry.
        let then = match outcome.error_kind() {
            Some(kind) if kind.is_network_class() => Continue::Stop(StopReason::Transport),
            _ => Continue::Next,
        };

        if let Err(e) = self.store.update(op.id, status, retry_count, last_error).await {
            tracing::error!(
                operation_id = %op.id,
                kind = %op.kind,
                error = %e,
                "failed to record replay outcome"
            );
            return Continue::Stop(StopReason::Storage);
        }

        match outcome {
            ReplayOutcome::Accepted { status } => {
                tracing::info!(operation_id = %op.id, kind = %op.kind, status, "operation synced");
                report.synced += 1;
                self.events.publish(StatusEvent::SyncSuccess {
                    operation_id: op.id,
                });
            }
            ReplayOutcome::Rejected { status, reason } => {
                tracing::warn!(
                    operation_id = %op.id,
                    kind = %op.kind,
                    status,
                    retry_count,
                    "operation rejected by server"
                );
                report.failed += 1;
                self.events.publish(StatusEvent::SyncError {
                    operation_id: op.id,
                    reason,
                });
            }
            ReplayOutcome::Unreachable { kind, reason } => {
                tracing::info!(
                    operation_id = %op.id,
                    retry_count,
                    ?kind,
                    %reason,
                    "api unreachable, pass stopped"
                );
            }
        }
        then
    }

    /// 中断された再送の claim を取り消す
    async fn put_back(&self, op: &QueuedOperation) {
        if let Err(e) = self
            .store
            .update(op.id, OperationStatus::Queued, op.retry_count, op.last_error.clone())
            .await
        {
            // Still `Syncing`; the next pass resets it.
            tracing::error!(operation_id = %op.id, error = %e, "failed to return entry to queue");
        } else {
            tracing::info!(operation_id = %op.id, "replay interrupted by shutdown");
        }
    }

    async fn finish(&self, report: &mut PassReport, depth_before: Option<usize>) {
        match self.store.delete_synced().await {
            Ok(0) => {}
            Ok(n) => tracing::debug!(removed = n, "compacted synced operations"),
            Err(e) => tracing::warn!(error = %e, "compaction failed"),
        }

        match self.store.counts().await {
            Ok(counts) => {
                report.remaining = counts.depth();
                if depth_before != Some(report.remaining) {
                    self.events.publish(StatusEvent::QueueChanged {
                        depth: report.remaining,
                    });
                }
            }
            Err(e) => tracing::warn!(error = %e, "cannot read queue depth after pass"),
        }

        tracing::info!(
            attempted = report.attempted,
            synced = report.synced,
            failed = report.failed,
            depth = report.remaining,
            stopped = ?report.stopped,
            "sync pass complete"
        );
        self.events.publish(StatusEvent::SyncComplete);
    }
}

fn shutdown_requested(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow() || shutdown.has_changed().is_err()
}

/// Resolves once shutdown is requested or the sender is gone.
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Triggers collected while the previous pass was running.
#[derive(Default)]
struct Batch {
    triggers: Vec<Trigger>,
    waiters: Vec<oneshot::Sender<PassReport>>,
}

pub struct SyncScheduler {
    pass: SyncPass,
    rx: mpsc::Receiver<SchedulerMsg>,
    shutdown: watch::Receiver<bool>,
    online: bool,
    debounce: Duration,
    periodic: Option<Duration>,
    last_regained: Option<Instant>,
}

impl SyncScheduler {
    pub(crate) fn new(
        pass: SyncPass,
        rx: mpsc::Receiver<SchedulerMsg>,
        shutdown: watch::Receiver<bool>,
        online: bool,
        debounce: Duration,
        periodic: Option<Duration>,
    ) -> Self {
        Self {
            pass,
            rx,
            shutdown,
            online,
            debounce,
            periodic,
            last_regained: None,
        }
    }

    pub async fn run(mut self) {
        let mut ticker = self.periodic.map(|every| {
            let mut interval = tokio::time::interval_at(Instant::now() + every, every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval
        });

        let mut batch = Batch::default();
        if self.online && self.has_queued().await {
            batch.triggers.push(Trigger::Startup);
        }

        loop {
            if shutdown_requested(&self.shutdown) {
                break;
            }

            if batch.triggers.is_empty() {
                tokio::select! {
                    changed = self.shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        continue;
                    }
                    msg = self.rx.recv() => match msg {
                        Some(msg) => self.absorb(msg, &mut batch),
                        None => break,
                    },
                    _ = tick(&mut ticker) => {
                        if self.online && self.has_queued().await {
                            batch.triggers.push(Trigger::Periodic);
                        }
                    }
                }
            }
            // Everything already waiting joins the same pass.
            while let Ok(msg) = self.rx.try_recv() {
                self.absorb(msg, &mut batch);
            }

            if batch.triggers.is_empty() {
                continue;
            }
            let current = std::mem::take(&mut batch);
            tracing::debug!(triggers = ?current.triggers, "starting sync pass");
            let report = self.pass.run(&mut self.shutdown).await;
            for waiter in current.waiters {
                let _ = waiter.send(report.clone());
            }
        }
        tracing::debug!("sync scheduler stopped");
    }

    fn absorb(&mut self, msg: SchedulerMsg, batch: &mut Batch) {
        match msg {
            SchedulerMsg::Connectivity(false) => {
                if self.online {
                    tracing::info!("connectivity lost");
                }
                self.online = false;
            }
            SchedulerMsg::Connectivity(true) => {
                self.online = true;
                let now = Instant::now();
                if let Some(last) = self.last_regained
                    && now.duration_since(last) < self.debounce
                {
                    tracing::debug!("connectivity trigger debounced");
                    return;
                }
                tracing::info!("connectivity regained");
                self.last_regained = Some(now);
                batch.triggers.push(Trigger::ConnectivityRegained);
            }
            SchedulerMsg::Trigger { trigger, reply } => {
                batch.triggers.push(trigger);
                if let Some(reply) = reply {
                    batch.waiters.push(reply);
                }
            }
        }
    }

    async fn has_queued(&self) -> bool {
        match self.pass.store.counts().await {
            Ok(counts) => counts.depth() > 0,
            Err(e) => {
                tracing::warn!(error = %e, "cannot read queue counts");
                false
            }
        }
    }
}
