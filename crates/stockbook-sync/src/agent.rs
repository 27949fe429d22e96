//! # Sync Agent
//!
//! Background task that runs sync cycles and publishes status.
//!
//! ## Agent Loop
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          SyncAgent::run                                 │
//! │                                                                         │
//! │   spawn ──► cycle(Startup)                                              │
//! │               │                                                         │
//! │               ▼                                                         │
//! │   ┌───────── select! ─────────────────────────────────────────────┐     │
//! │   │  interval.tick()         → cycle(Timer)                       │     │
//! │   │  trigger_rx (Online,     → cycle(trigger)                     │     │
//! │   │              Manual)                                          │     │
//! │   │  shutdown_rx             → break                              │     │
//! │   └───────────────────────────────────────────────────────────────┘     │
//! │                                                                         │
//! │   cycle = QueueDrainer::run_cycle, then status + events:               │
//! │     "status"   - { mode, is_online, pending, retrying, ... }            │
//! │     "progress" - { pending, synced }                                    │
//! │     "error"    - { message, retryable }                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! In offline mode the loop still runs but every cycle is skipped.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use stockbook_db::Database;

use crate::config::{SyncConfig, SyncMode};
use crate::drain::{CycleReport, QueueDrainer};
use crate::error::{RemoteError, SyncError, SyncResult};
use crate::server::SyncServer;

// =============================================================================
// Triggers
// =============================================================================

/// Why a cycle ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    Startup,
    Timer,
    /// Connectivity came back.
    Online,
    Manual,
}

impl fmt::Display for SyncTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncTrigger::Startup => "startup",
            SyncTrigger::Timer => "timer",
            SyncTrigger::Online => "online",
            SyncTrigger::Manual => "manual",
        };
        f.write_str(s)
    }
}

// =============================================================================
// Sync Status
// =============================================================================

/// Current sync status for external queries.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncStatus {
    pub mode: SyncMode,

    /// Whether the last cycle reached the server.
    pub is_online: bool,

    /// Queue items never attempted.
    pub pending: i64,

    /// Queue items that failed transiently.
    pub retrying: i64,

    /// Queue items waiting on an operator.
    pub needs_attention: i64,

    /// End of the last cycle that reached the server.
    pub last_sync: Option<DateTime<Utc>>,

    pub last_error: Option<String>,
}

// =============================================================================
// Event Emitter Trait
// =============================================================================

/// Receives sync events (a UI shell implements this).
pub trait SyncEventEmitter: Send + Sync {
    fn emit_status(&self, status: &SyncStatus);

    /// `pending` is what is still queued; `synced` what this cycle delivered.
    fn emit_progress(&self, pending: i64, synced: i64);

    fn emit_error(&self, message: &str, retryable: bool);
}

pub struct NoOpEmitter;

impl SyncEventEmitter for NoOpEmitter {
    fn emit_status(&self, _status: &SyncStatus) {}
    fn emit_progress(&self, _pending: i64, _synced: i64) {}
    fn emit_error(&self, _message: &str, _retryable: bool) {}
}

// =============================================================================
// Sync Agent
// =============================================================================

pub struct SyncAgent {
    config: Arc<SyncConfig>,
    db: Database,
    drainer: QueueDrainer,
    status: Arc<RwLock<SyncStatus>>,
    emitter: Arc<dyn SyncEventEmitter>,
}

impl SyncAgent {
    pub fn new(config: Arc<SyncConfig>, db: Database, server: Arc<dyn SyncServer>) -> Self {
        Self::with_emitter(config, db, server, Arc::new(NoOpEmitter))
    }

    pub fn with_emitter(
        config: Arc<SyncConfig>,
        db: Database,
        server: Arc<dyn SyncServer>,
        emitter: Arc<dyn SyncEventEmitter>,
    ) -> Self {
        let status = SyncStatus {
            mode: config.mode(),
            ..Default::default()
        };

        SyncAgent {
            drainer: QueueDrainer::new(db.clone(), server, config.clone()),
            config,
            db,
            status: Arc::new(RwLock::new(status)),
            emitter,
        }
    }

    pub async fn status(&self) -> SyncStatus {
        self.status.read().await.clone()
    }

    /// Runs one cycle now. `None` when sync is disabled.
    ///
    /// ## Errors
    /// The cycle's own failure, after it has been recorded in the status
    /// and emitted.
    pub async fn sync_now(&self, trigger: SyncTrigger) -> SyncResult<Option<CycleReport>> {
        if !self.config.is_sync_enabled() {
            debug!(%trigger, "Sync disabled, skipping cycle");
            return Ok(None);
        }

        debug!(%trigger, "Sync cycle starting");
        match self.drainer.run_cycle().await {
            Ok(report) => {
                self.record_cycle(&report).await;
                Ok(Some(report))
            }
            Err(err) => {
                self.record_failure(&err).await;
                Err(err)
            }
        }
    }

    async fn record_cycle(&self, report: &CycleReport) {
        let counts = report.counts;
        let reached = report.reached_server();

        let snapshot = {
            let mut s = self.status.write().await;
            s.is_online = reached;
            s.pending = counts.pending;
            s.retrying = counts.retrying;
            s.needs_attention = counts.needs_attention;
            if reached {
                s.last_sync = Some(Utc::now());
                s.last_error = None;
            } else {
                s.last_error = Some("Server unreachable".into());
            }
            s.clone()
        };

        let synced = report.drain.applied + report.sweep.map_or(0, |s| s.posted);
        self.emitter
            .emit_progress(counts.pending + counts.retrying, synced as i64);
        if report.drain.needs_attention > 0 {
            self.emitter.emit_error(
                &format!("{} queue item(s) need attention", report.drain.needs_attention),
                false,
            );
        }
        self.emitter.emit_status(&snapshot);
    }

    async fn record_failure(&self, err: &SyncError) {
        error!(error = %err, "Sync cycle failed");
        let counts = self.db.sync_queue().counts().await.ok();

        let snapshot = {
            let mut s = self.status.write().await;
            if matches!(err, SyncError::Remote(RemoteError::Unreachable(_))) {
                s.is_online = false;
            }
            if let Some(counts) = counts {
                s.pending = counts.pending;
                s.retrying = counts.retrying;
                s.needs_attention = counts.needs_attention;
            }
            s.last_error = Some(err.to_string());
            s.clone()
        };

        self.emitter.emit_error(&err.to_string(), err.is_retryable());
        self.emitter.emit_status(&snapshot);
    }

    /// Moves the agent onto a background task.
    pub fn spawn(self) -> SyncAgentHandle {
        let (trigger_tx, trigger_rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let status = self.status.clone();
        let task = tokio::spawn(self.run(trigger_rx, shutdown_rx));

        SyncAgentHandle {
            trigger_tx,
            shutdown_tx,
            status,
            task,
        }
    }

    async fn run(
        self,
        mut trigger_rx: mpsc::Receiver<SyncTrigger>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        info!(
            device_id = %self.config.device_id(),
            mode = %self.config.mode(),
            "Sync agent starting"
        );

        self.cycle(SyncTrigger::Startup).await;

        let period = self.config.poll_interval();
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.cycle(SyncTrigger::Timer).await;
                }

                Some(trigger) = trigger_rx.recv() => {
                    self.cycle(trigger).await;
                }

                _ = shutdown_rx.recv() => {
                    info!("Sync agent shutting down");
                    break;
                }
            }
        }

        info!("Sync agent stopped");
    }

    async fn cycle(&self, trigger: SyncTrigger) {
        if let Err(err) = self.sync_now(trigger).await {
            warn!(%trigger, error = %err, "Cycle ended early");
        }
    }
}

// =============================================================================
// Agent Handle
// =============================================================================

/// Controls a spawned [`SyncAgent`].
pub struct SyncAgentHandle {
    trigger_tx: mpsc::Sender<SyncTrigger>,
    shutdown_tx: mpsc::Sender<()>,
    status: Arc<RwLock<SyncStatus>>,
    task: JoinHandle<()>,
}

impl SyncAgentHandle {
    pub async fn status(&self) -> SyncStatus {
        self.status.read().await.clone()
    }

    /// Asks for a cycle as soon as the current one finishes.
    pub async fn trigger(&self, trigger: SyncTrigger) -> SyncResult<()> {
        self.trigger_tx
            .send(trigger)
            .await
            .map_err(|_| SyncError::ShuttingDown)
    }

    /// Stops the loop and waits for the in-flight cycle to finish.
    pub async fn shutdown(self) -> SyncResult<()> {
        // A closed channel means the loop already exited.
        let _ = self.shutdown_tx.send(()).await;
        self.task
            .await
            .map_err(|e| SyncError::ChannelError(format!("Sync agent task failed: {e}")))
    }
}
