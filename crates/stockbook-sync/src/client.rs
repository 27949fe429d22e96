//! # Offline Client
//!
//! The device-side API. Every mutation is written ahead locally and queued;
//! nothing here talks to the server.
//!
//! ## Local Apply
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  checkout(lines)                                                        │
//! │    priced + stock-checked against the mirror                            │
//! │    local_transactions row + Checkout intent + mirror decrement          │
//! │    (one local transaction, see LocalTransactionRepository)              │
//! │                                                                         │
//! │  restock / request_change / approve / reject / acknowledge_return /     │
//! │  create_transfer / confirm / cancel                                     │
//! │    shape-validated locally, then appended to the queue as-is.           │
//! │    The server decides; the next pull shows the outcome.                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use tracing::{info, instrument};

use stockbook_core::sync::{QueueCounts, SyncIntent, SyncQueueItem};
use stockbook_core::validation::{validate_amount, validate_identity, validate_quantity, validate_store_name};
use stockbook_core::workflow::{NewPendingChange, NewTransfer};
use stockbook_core::{CheckoutLine, CheckoutRequest, RestockRequest};
use stockbook_db::{Database, LocalTransaction, MirrorRepository};

use crate::config::SyncConfig;
use crate::error::SyncResult;

#[derive(Debug, Clone)]
pub struct OfflineClient {
    db: Database,
    config: Arc<SyncConfig>,
}

impl OfflineClient {
    pub fn new(db: Database, config: Arc<SyncConfig>) -> Self {
        OfflineClient { db, config }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Last pulled server state, with local sales already deducted.
    pub fn mirror(&self) -> MirrorRepository {
        self.db.mirror()
    }

    // =========================================================================
    // Sales
    // =========================================================================

    /// Rings up a sale at the configured store.
    pub async fn checkout(&self, lines: Vec<CheckoutLine>) -> SyncResult<LocalTransaction> {
        self.checkout_at(self.config.store_name(), lines).await
    }

    /// ## Errors
    /// - `OutOfStock` when the mirror shows less than a line needs
    /// - `NotFound` for a product the mirror doesn't know
    #[instrument(skip(self, lines), fields(lines = lines.len()))]
    pub async fn checkout_at(&self, store_name: &str, lines: Vec<CheckoutLine>) -> SyncResult<LocalTransaction> {
        let request = CheckoutRequest {
            transaction_id: None,
            store_name: store_name.to_string(),
            lines,
        };
        Ok(self.db.local_transactions().record_offline_checkout(&request).await?)
    }

    pub async fn unsynced_transactions(&self) -> SyncResult<Vec<LocalTransaction>> {
        Ok(self.db.local_transactions().unsynced().await?)
    }

    // =========================================================================
    // Queued Intents
    // =========================================================================

    pub async fn restock(&self, request: RestockRequest) -> SyncResult<SyncQueueItem> {
        validate_quantity(request.qty)?;
        validate_amount("cost", request.cost)?;
        validate_amount("price", request.price)?;
        validate_identity("received_by", &request.received_by)?;
        self.enqueue(SyncIntent::Restock(request)).await
    }

    pub async fn request_change(&self, change: NewPendingChange) -> SyncResult<SyncQueueItem> {
        change.validate()?;
        validate_store_name(&change.store_name)?;
        self.enqueue(SyncIntent::RequestChange(change)).await
    }

    pub async fn approve_change(&self, change_id: i64, reviewed_by: &str) -> SyncResult<SyncQueueItem> {
        validate_identity("reviewed_by", reviewed_by)?;
        self.enqueue(SyncIntent::ApproveChange {
            change_id,
            reviewed_by: reviewed_by.to_string(),
        })
        .await
    }

    pub async fn reject_change(
        &self,
        change_id: i64,
        reviewed_by: &str,
        reason: &str,
    ) -> SyncResult<SyncQueueItem> {
        validate_identity("reviewed_by", reviewed_by)?;
        self.enqueue(SyncIntent::RejectChange {
            change_id,
            reviewed_by: reviewed_by.to_string(),
            reason: reason.to_string(),
        })
        .await
    }

    pub async fn acknowledge_return(&self, product_id: i64, store_name: &str) -> SyncResult<SyncQueueItem> {
        validate_store_name(store_name)?;
        self.enqueue(SyncIntent::AcknowledgeReturn {
            product_id,
            store_name: store_name.to_string(),
        })
        .await
    }

    pub async fn create_transfer(&self, transfer: NewTransfer) -> SyncResult<SyncQueueItem> {
        transfer.validate()?;
        self.enqueue(SyncIntent::CreateTransfer(transfer)).await
    }

    pub async fn confirm_transfer(&self, transfer_id: i64, confirmed_by: &str) -> SyncResult<SyncQueueItem> {
        validate_identity("confirmed_by", confirmed_by)?;
        self.enqueue(SyncIntent::ConfirmTransfer {
            transfer_id,
            confirmed_by: confirmed_by.to_string(),
        })
        .await
    }

    pub async fn cancel_transfer(
        &self,
        transfer_id: i64,
        reason: &str,
        cancelled_by: &str,
    ) -> SyncResult<SyncQueueItem> {
        validate_identity("cancelled_by", cancelled_by)?;
        self.enqueue(SyncIntent::CancelTransfer {
            transfer_id,
            reason: reason.to_string(),
            cancelled_by: cancelled_by.to_string(),
        })
        .await
    }

    async fn enqueue(&self, intent: SyncIntent) -> SyncResult<SyncQueueItem> {
        let item = self.db.sync_queue().enqueue(&intent).await?;
        info!(id = %item.id, table = %item.table_name, action = %item.action, "Queued for sync");
        Ok(item)
    }

    // =========================================================================
    // Queue Operator Tools
    // =========================================================================

    pub async fn queue(&self) -> SyncResult<Vec<SyncQueueItem>> {
        Ok(self.db.sync_queue().list().await?)
    }

    pub async fn queue_counts(&self) -> SyncResult<QueueCounts> {
        Ok(self.db.sync_queue().counts().await?)
    }

    /// Moves a parked item back to `pending`, keeping its place in line.
    pub async fn retry_item(&self, id: &str) -> SyncResult<SyncQueueItem> {
        Ok(self.db.sync_queue().retry_item(id).await?)
    }

    pub async fn discard_item(&self, id: &str) -> SyncResult<()> {
        Ok(self.db.sync_queue().discard_item(id).await?)
    }
}
