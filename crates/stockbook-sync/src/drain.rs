//! # Queue Drainer
//!
//! Replays the client's sync queue against the server, then sweeps unsynced
//! local sales and refreshes the mirror.
//!
//! ## Sync Cycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         QueueDrainer::run_cycle                         │
//! │                                                                         │
//! │  1. Drain   next_batch(after seq, batch_size), strictly by seq          │
//! │             one item fully resolved before the next is sent             │
//! │                                                                         │
//! │             Ok(ack)               → delete item (+ mark sale synced)    │
//! │             Unreachable           → retrying, STOP the cycle            │
//! │             Internal              → retrying, continue                  │
//! │             Rejected / bad JSON   → needs_attention, continue           │
//! │                                                                         │
//! │  2. Sweep   local sales with synced_at = NULL whose Checkout is no      │
//! │             longer queued → post_transaction → mark synced              │
//! │                                                                         │
//! │  3. Pull    whenever the server answered, even with items still queued: │
//! │             snapshot(recent_limit) → mirror.replace_all                 │
//! │             (unsynced local sales are deducted again in the same        │
//! │             local transaction)                                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A stuck item never freezes the mirror. Stock that queued sales already
//! spent locally stays spent after the pull.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use stockbook_core::sync::{QueueCounts, SyncIntent, SyncQueueItem};
use stockbook_db::Database;

use crate::config::SyncConfig;
use crate::error::{RemoteError, SyncResult};
use crate::server::{Ack, SyncServer};

// =============================================================================
// Reports
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub applied: usize,
    pub retrying: usize,
    pub needs_attention: usize,
    /// The server could not be reached; later items were not attempted.
    pub interrupted: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub posted: usize,
    /// Still represented in the queue, left to the drainer.
    pub skipped: usize,
    pub failed: usize,
    pub interrupted: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub drain: DrainReport,
    pub sweep: Option<SweepReport>,
    pub pulled: bool,
    /// Queue totals once the cycle finished.
    pub counts: QueueCounts,
}

impl CycleReport {
    /// False when the cycle ended on an unreachable server.
    pub fn reached_server(&self) -> bool {
        !self.drain.interrupted && !self.sweep.is_some_and(|s| s.interrupted)
    }
}

enum Outcome {
    Applied,
    Retrying,
    NeedsAttention,
    Unreachable,
}

// =============================================================================
// Drainer
// =============================================================================

#[derive(Clone)]
pub struct QueueDrainer {
    db: Database,
    server: Arc<dyn SyncServer>,
    config: Arc<SyncConfig>,
}

impl QueueDrainer {
    pub fn new(db: Database, server: Arc<dyn SyncServer>, config: Arc<SyncConfig>) -> Self {
        QueueDrainer { db, server, config }
    }

    /// Drain, sweep, pull.
    ///
    /// ## Errors
    /// Local database failures, and an unreachable server during the pull.
    /// Server refusals of individual items are recorded on the items.
    #[instrument(skip(self))]
    pub async fn run_cycle(&self) -> SyncResult<CycleReport> {
        let drain = self.drain().await?;

        let sweep = if !drain.interrupted && self.config.sync.sweep_unsynced {
            Some(self.sweep_unsynced().await?)
        } else {
            None
        };

        let mut report = CycleReport {
            drain,
            sweep,
            ..CycleReport::default()
        };

        if report.reached_server() {
            self.pull().await?;
            report.pulled = true;
        } else {
            debug!("Server unreachable, keeping the mirror");
        }
        let counts = self.db.sync_queue().counts().await?;
        report.counts = counts;

        info!(
            applied = drain.applied,
            retrying = drain.retrying,
            needs_attention = counts.needs_attention,
            pulled = report.pulled,
            "Sync cycle finished"
        );
        Ok(report)
    }

    /// Replays drainable items in enqueue order.
    pub async fn drain(&self) -> SyncResult<DrainReport> {
        let queue = self.db.sync_queue();
        let mut report = DrainReport::default();
        let mut cursor = 0;

        loop {
            let batch = queue.next_batch(cursor, self.config.sync.batch_size).await?;
            if batch.is_empty() {
                break;
            }
            debug!(count = batch.len(), after_seq = cursor, "Draining batch");

            for item in batch {
                cursor = item.seq;
                match self.replay(&item).await? {
                    Outcome::Applied => report.applied += 1,
                    Outcome::Retrying => report.retrying += 1,
                    Outcome::NeedsAttention => report.needs_attention += 1,
                    Outcome::Unreachable => {
                        report.retrying += 1;
                        report.interrupted = true;
                        return Ok(report);
                    }
                }
            }
        }

        Ok(report)
    }

    async fn replay(&self, item: &SyncQueueItem) -> SyncResult<Outcome> {
        let queue = self.db.sync_queue();

        let intent = match item.intent() {
            Ok(intent) => intent,
            Err(err) => {
                queue
                    .mark_needs_attention(&item.id, &format!("Undecodable payload: {err}"))
                    .await?;
                return Ok(Outcome::NeedsAttention);
            }
        };

        match self.server.apply(&intent).await {
            Ok(ack) => {
                queue.mark_done(&item.id).await?;
                if let Ack::Transaction(transaction) = &ack {
                    self.db
                        .local_transactions()
                        .mark_synced(transaction.transaction_id)
                        .await?;
                }
                debug!(id = %item.id, table = %item.table_name, action = %item.action, "Replayed");
                Ok(Outcome::Applied)
            }
            Err(err @ RemoteError::Unreachable(_)) => {
                warn!(id = %item.id, error = %err, "Server unreachable, stopping drain");
                queue.mark_retrying(&item.id, &err.to_string()).await?;
                Ok(Outcome::Unreachable)
            }
            Err(err @ RemoteError::Internal(_)) => {
                warn!(id = %item.id, error = %err, "Server failed, will retry");
                queue.mark_retrying(&item.id, &err.to_string()).await?;
                Ok(Outcome::Retrying)
            }
            Err(err @ RemoteError::Rejected { .. }) => {
                queue.mark_needs_attention(&item.id, &err.to_string()).await?;
                Ok(Outcome::NeedsAttention)
            }
        }
    }

    /// Posts local sales the queue no longer accounts for.
    pub async fn sweep_unsynced(&self) -> SyncResult<SweepReport> {
        let queued: HashSet<i64> = self
            .db
            .sync_queue()
            .list()
            .await?
            .iter()
            .filter_map(|item| match item.intent() {
                Ok(SyncIntent::Checkout(request)) => request.transaction_id,
                _ => None,
            })
            .collect();

        let local = self.db.local_transactions();
        let mut report = SweepReport::default();

        for sale in local.unsynced().await? {
            let transaction_id = sale.transaction.transaction_id;
            if queued.contains(&transaction_id) {
                report.skipped += 1;
                continue;
            }

            match self.server.post_transaction(&sale.request).await {
                Ok(posted) => {
                    local.mark_synced(posted.transaction_id).await?;
                    info!(transaction_id, "Unsynced sale posted");
                    report.posted += 1;
                }
                Err(err @ RemoteError::Unreachable(_)) => {
                    warn!(transaction_id, error = %err, "Server unreachable, stopping sweep");
                    report.interrupted = true;
                    break;
                }
                Err(err) => {
                    warn!(transaction_id, error = %err, "Unsynced sale not accepted");
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    /// Replaces the mirror with the server's current state.
    pub async fn pull(&self) -> SyncResult<()> {
        let snapshot = self
            .server
            .snapshot(self.config.sync.recent_transactions_limit)
            .await?;
        self.db.mirror().replace_all(&snapshot).await?;
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::OfflineClient;
    use crate::server::EmbeddedServer;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use stockbook_core::sync::{QueueItemState, ServerSnapshot};
    use stockbook_core::workflow::{NewTransfer, TransferLine};
    use stockbook_core::{
        CheckoutLine, CheckoutRequest, Money, NewProduct, RestockRequest, Transaction,
    };
    use stockbook_db::DbConfig;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Mode {
        Online,
        Offline,
        Busy,
        /// Only `apply` of this action fails, as a server error.
        Failing(&'static str),
    }

    /// Embedded server behind a switch, recording what it was sent.
    struct FlakyServer {
        inner: EmbeddedServer,
        mode: Mutex<Mode>,
        seen: Mutex<Vec<&'static str>>,
    }

    impl FlakyServer {
        fn set(&self, mode: Mode) {
            *self.mode.lock().unwrap() = mode;
        }

        fn gate(&self) -> Result<(), RemoteError> {
            match *self.mode.lock().unwrap() {
                Mode::Online | Mode::Failing(_) => Ok(()),
                Mode::Offline => Err(RemoteError::Unreachable("connection refused".into())),
                Mode::Busy => Err(RemoteError::Internal("database is locked".into())),
            }
        }
    }

    #[async_trait]
    impl SyncServer for FlakyServer {
        async fn apply(&self, intent: &SyncIntent) -> Result<Ack, RemoteError> {
            self.gate()?;
            if *self.mode.lock().unwrap() == Mode::Failing(intent.action()) {
                return Err(RemoteError::Internal("database is locked".into()));
            }
            self.seen.lock().unwrap().push(intent.action());
            self.inner.apply(intent).await
        }

        async fn post_transaction(&self, request: &CheckoutRequest) -> Result<Transaction, RemoteError> {
            self.gate()?;
            self.inner.post_transaction(request).await
        }

        async fn snapshot(&self, recent_limit: u32) -> Result<ServerSnapshot, RemoteError> {
            self.gate()?;
            self.inner.snapshot(recent_limit).await
        }
    }

    struct Harness {
        server: Arc<FlakyServer>,
        server_db: Database,
        client: OfflineClient,
        drainer: QueueDrainer,
        product_id: i64,
        store_id: i64,
    }

    /// Server: one product (price 50, cost 30), 100 left in the warehouse
    /// after moving 20 to Downtown. Client: pulled once, selling at Downtown.
    async fn harness() -> Harness {
        let server_db = Database::new(DbConfig::in_memory()).await.unwrap();
        let product = server_db
            .catalog()
            .create_product(&NewProduct {
                name: "Desk Lamp".into(),
                cost: Money::from_cents(3000),
                price: Money::from_cents(5000),
                warehouse_stock: 120,
                restock_qty: 0,
            })
            .await
            .unwrap();
        let store = server_db.catalog().get_or_create_store("Downtown").await.unwrap();
        server_db
            .stock()
            .move_warehouse_to_store(product.id, store.id, 20)
            .await
            .unwrap();

        let server = Arc::new(FlakyServer {
            inner: EmbeddedServer::new(server_db.clone()),
            mode: Mutex::new(Mode::Online),
            seen: Mutex::new(Vec::new()),
        });

        let mut config = SyncConfig::default();
        config.store.name = "Downtown".into();
        let config = Arc::new(config);

        let client_db = Database::new(DbConfig::in_memory()).await.unwrap();
        let client = OfflineClient::new(client_db.clone(), config.clone());
        let drainer = QueueDrainer::new(client_db, server.clone(), config);
        drainer.pull().await.unwrap();

        Harness {
            server,
            server_db,
            client,
            drainer,
            product_id: product.id,
            store_id: store.id,
        }
    }

    fn sale(product_id: i64, qty: i64) -> Vec<CheckoutLine> {
        vec![CheckoutLine { product_id, qty }]
    }

    #[tokio::test]
    async fn test_offline_sale_replays_when_server_returns() {
        let h = harness().await;
        h.server.set(Mode::Offline);

        let local = h.client.checkout(sale(h.product_id, 2)).await.unwrap();
        assert_eq!(local.transaction.transaction_id, 10001);
        assert_eq!(local.transaction.total, Money::from_cents(11250));
        assert_eq!(h.client.mirror().inventory_level("Downtown", h.product_id).await.unwrap(), 18);

        let offline = h.drainer.run_cycle().await.unwrap();
        assert!(offline.drain.interrupted);
        assert!(!offline.reached_server());
        assert!(!offline.pulled);
        let queued = h.client.queue().await.unwrap();
        assert_eq!(queued[0].state, QueueItemState::Retrying);
        assert_eq!(queued[0].attempts, 1);

        h.server.set(Mode::Online);
        let online = h.drainer.run_cycle().await.unwrap();
        assert_eq!(online.drain.applied, 1);
        assert!(online.pulled);
        assert_eq!(online.counts.total(), 0);

        let stored = h.server_db.checkout().get_transaction(10001).await.unwrap();
        assert_eq!(stored.total, Money::from_cents(11250));
        assert_eq!(h.server_db.catalog().store_stock(h.store_id, h.product_id).await.unwrap(), 18);
        assert!(h.client.unsynced_transactions().await.unwrap().is_empty());

        // Mirror now carries the server's view, including the sale.
        assert_eq!(h.client.mirror().inventory_level("Downtown", h.product_id).await.unwrap(), 18);
        let mirrored = h.client.mirror().transactions().await.unwrap();
        assert!(mirrored.iter().any(|t| t.transaction_id == 10001));
    }

    #[tokio::test]
    async fn test_drain_replays_in_enqueue_order() {
        let h = harness().await;
        h.client
            .create_transfer(NewTransfer {
                to_store: "Uptown".into(),
                from_store: None,
                items: vec![TransferLine { product_id: h.product_id, qty: 30 }],
                requested_by: "clerk".into(),
            })
            .await
            .unwrap();
        // Transfer ids start at 1; confirming before creating would be NotFound.
        h.client.confirm_transfer(1, "mgr").await.unwrap();
        h.client.checkout(sale(h.product_id, 1)).await.unwrap();

        let report = h.drainer.drain().await.unwrap();
        assert_eq!(report.applied, 3);
        assert_eq!(report.needs_attention, 0);
        assert_eq!(*h.server.seen.lock().unwrap(), vec!["create", "confirm", "create"]);

        let product = h.server_db.catalog().get_product(h.product_id).await.unwrap();
        assert_eq!(product.warehouse_stock, 70);
    }

    #[tokio::test]
    async fn test_small_batches_still_drain_everything() {
        let h = harness().await;
        for _ in 0..5 {
            h.client.checkout(sale(h.product_id, 1)).await.unwrap();
        }
        let mut config = SyncConfig::default();
        config.sync.batch_size = 2;
        let drainer = QueueDrainer::new(h.client.database().clone(), h.server.clone(), Arc::new(config));

        let report = drainer.drain().await.unwrap();
        assert_eq!(report.applied, 5);
        assert_eq!(h.server_db.catalog().store_stock(h.store_id, h.product_id).await.unwrap(), 15);
    }

    #[tokio::test]
    async fn test_rejected_item_is_parked_and_the_rest_drain() {
        let h = harness().await;
        let rejected = h.client.approve_change(99, "mgr").await.unwrap();
        h.client
            .restock(RestockRequest {
                product_id: h.product_id,
                qty: 10,
                cost: Money::from_cents(3000),
                price: Money::from_cents(5000),
                received_by: "dock".into(),
            })
            .await
            .unwrap();

        let report = h.drainer.run_cycle().await.unwrap();
        assert_eq!(report.drain.applied, 1);
        assert_eq!(report.drain.needs_attention, 1);
        // Parked items don't hold back the pull.
        assert!(report.pulled);

        let parked = h.client.queue().await.unwrap();
        assert_eq!(parked.len(), 1);
        assert_eq!(parked[0].id, rejected.id);
        assert_eq!(parked[0].state, QueueItemState::NeedsAttention);
        assert!(parked[0].last_error.as_deref().unwrap().contains("not found"));

        // Skipped on later cycles until an operator acts.
        h.drainer.drain().await.unwrap();
        assert_eq!(h.client.queue().await.unwrap()[0].attempts, 1);

        h.client.retry_item(&rejected.id).await.unwrap();
        let again = h.drainer.drain().await.unwrap();
        assert_eq!(again.needs_attention, 1);
        assert_eq!(h.client.queue().await.unwrap()[0].attempts, 2);
    }

    #[tokio::test]
    async fn test_server_failure_retries_without_blocking_later_items() {
        let h = harness().await;
        h.client.confirm_transfer(1, "mgr").await.unwrap();
        h.client.confirm_transfer(2, "mgr").await.unwrap();
        h.client.checkout(sale(h.product_id, 1)).await.unwrap();
        h.server.set(Mode::Busy);

        let report = h.drainer.drain().await.unwrap();
        assert_eq!(report.retrying, 3);
        assert!(!report.interrupted);
        let counts = h.client.queue_counts().await.unwrap();
        assert_eq!(counts.retrying, 3);

        // A pull against a failing server keeps the old mirror.
        assert!(h.drainer.run_cycle().await.is_err());
        assert_eq!(h.client.mirror().inventory_level("Downtown", h.product_id).await.unwrap(), 19);
    }

    #[tokio::test]
    async fn test_stuck_item_does_not_freeze_the_mirror() {
        let h = harness().await;
        let stuck = h.client.confirm_transfer(1, "mgr").await.unwrap();
        let local = h.client.checkout(sale(h.product_id, 2)).await.unwrap();
        h.server.set(Mode::Failing("confirm"));

        // Meanwhile the server moves 7 more units to Downtown.
        h.server_db
            .stock()
            .move_warehouse_to_store(h.product_id, h.store_id, 7)
            .await
            .unwrap();

        for _ in 0..3 {
            let report = h.drainer.run_cycle().await.unwrap();
            assert_eq!(report.counts.retrying, 1);
            assert!(report.pulled);
        }

        assert_eq!(h.client.queue().await.unwrap()[0].id, stuck.id);
        assert_eq!(h.client.queue().await.unwrap()[0].attempts, 3);
        assert!(h.client.unsynced_transactions().await.unwrap().is_empty());
        assert!(h.server_db.checkout().get_transaction(local.transaction.transaction_id).await.is_ok());
        // 20 + 7 at the server, less the sale it has now applied.
        assert_eq!(h.client.mirror().inventory_level("Downtown", h.product_id).await.unwrap(), 25);
    }

    #[tokio::test]
    async fn test_oversell_found_at_replay_needs_attention() {
        let h = harness().await;
        h.server.set(Mode::Offline);
        let local = h.client.checkout(sale(h.product_id, 10)).await.unwrap();

        // Meanwhile another register sells most of the store's stock.
        h.server_db
            .checkout()
            .checkout(&CheckoutRequest {
                transaction_id: Some(20001),
                store_name: "Downtown".into(),
                lines: sale(h.product_id, 15),
            })
            .await
            .unwrap();

        h.server.set(Mode::Online);
        let report = h.drainer.run_cycle().await.unwrap();
        assert_eq!(report.drain.needs_attention, 1);

        let item = &h.client.queue().await.unwrap()[0];
        let error = item.last_error.as_deref().unwrap();
        assert!(error.contains("out_of_stock"));
        assert!(error.contains("Desk Lamp (available 5, requested 10)"));

        // The sale stays unsynced and the sweep leaves it to the queue.
        assert_eq!(report.sweep.unwrap().skipped, 1);
        let unsynced = h.client.unsynced_transactions().await.unwrap();
        assert_eq!(unsynced[0].transaction.transaction_id, local.transaction.transaction_id);
        assert_eq!(h.server_db.catalog().store_stock(h.store_id, h.product_id).await.unwrap(), 5);
        // The pulled 5 less the 10 the till still owes, floored.
        assert_eq!(h.client.mirror().inventory_level("Downtown", h.product_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_replayed_id_taken_by_the_server_needs_attention() {
        let h = harness().await;
        h.server.set(Mode::Offline);
        let local = h.client.checkout(sale(h.product_id, 2)).await.unwrap();
        assert_eq!(local.transaction.transaction_id, 10001);

        // The server allocates the same id to a counter sale.
        let counter_sale = h
            .server_db
            .checkout()
            .checkout(&CheckoutRequest {
                transaction_id: None,
                store_name: "Downtown".into(),
                lines: sale(h.product_id, 1),
            })
            .await
            .unwrap();
        assert_eq!(counter_sale.transaction_id, 10001);

        h.server.set(Mode::Online);
        let report = h.drainer.run_cycle().await.unwrap();
        assert_eq!(report.drain.needs_attention, 1);
        assert_eq!(report.drain.applied, 0);

        let item = &h.client.queue().await.unwrap()[0];
        assert_eq!(item.state, QueueItemState::NeedsAttention);
        assert!(item.last_error.as_deref().unwrap().contains("transaction_id_conflict"));

        // The offline sale is kept, not mistaken for the counter sale.
        assert_eq!(h.client.unsynced_transactions().await.unwrap().len(), 1);
        assert_eq!(h.server_db.catalog().store_stock(h.store_id, h.product_id).await.unwrap(), 19);
        assert_eq!(h.server_db.checkout().list_recent_transactions(10).await.unwrap().len(), 1);
        assert_eq!(h.client.mirror().inventory_level("Downtown", h.product_id).await.unwrap(), 17);
    }

    #[tokio::test]
    async fn test_sweep_posts_sales_missing_from_queue() {
        let h = harness().await;
        let local = h.client.checkout(sale(h.product_id, 3)).await.unwrap();
        let item = h.client.queue().await.unwrap().remove(0);
        h.client.discard_item(&item.id).await.unwrap();

        let report = h.drainer.run_cycle().await.unwrap();
        assert_eq!(report.drain, DrainReport::default());
        assert_eq!(report.sweep.unwrap().posted, 1);
        assert!(h.client.unsynced_transactions().await.unwrap().is_empty());

        let stored = h
            .server_db
            .checkout()
            .get_transaction(local.transaction.transaction_id)
            .await
            .unwrap();
        assert_eq!(stored.items[0].qty, 3);
    }

    #[tokio::test]
    async fn test_sweep_stops_when_server_unreachable() {
        let h = harness().await;
        for _ in 0..2 {
            h.client.checkout(sale(h.product_id, 1)).await.unwrap();
        }
        for item in h.client.queue().await.unwrap() {
            h.client.discard_item(&item.id).await.unwrap();
        }
        h.server.set(Mode::Offline);

        let report = h.drainer.sweep_unsynced().await.unwrap();
        assert!(report.interrupted);
        assert_eq!(report.posted, 0);
        assert_eq!(h.client.unsynced_transactions().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_replay_after_lost_ack_applies_once() {
        let h = harness().await;
        let local = h.client.checkout(sale(h.product_id, 2)).await.unwrap();

        // The server applied it, but the client never heard back.
        h.server
            .inner
            .post_transaction(&local.request)
            .await
            .unwrap();

        let report = h.drainer.run_cycle().await.unwrap();
        assert_eq!(report.drain.applied, 1);
        assert_eq!(h.server_db.catalog().store_stock(h.store_id, h.product_id).await.unwrap(), 18);
        assert_eq!(h.server_db.checkout().list_recent_transactions(10).await.unwrap().len(), 1);
        assert!(h.server_db.ledger().verify_balances().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_undecodable_payload_needs_attention() {
        let h = harness().await;
        let item = h.client.confirm_transfer(1, "mgr").await.unwrap();
        sqlx::query("UPDATE sync_queue SET data = '{\"action\":\"teleport\"}' WHERE id = ?1")
            .bind(&item.id)
            .execute(h.client.database().pool())
            .await
            .unwrap();

        let report = h.drainer.drain().await.unwrap();
        assert_eq!(report.needs_attention, 1);
        assert!(h.server.seen.lock().unwrap().is_empty());
        let parked = h.client.queue().await.unwrap().remove(0);
        assert!(parked.last_error.unwrap().starts_with("Undecodable payload"));
    }

    #[tokio::test]
    async fn test_unreachable_pull_surfaces_error() {
        let h = harness().await;
        h.server.set(Mode::Offline);
        let err = h.drainer.pull().await.unwrap_err();
        assert!(err.is_retryable());
        // The old mirror survives.
        assert_eq!(h.client.mirror().products().await.unwrap().len(), 1);
    }
}
