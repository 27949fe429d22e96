//! # Server Boundary
//!
//! Everything the client needs from the authoritative server, as a trait.
//!
//! ```text
//! ┌──────────────────────┐         SyncServer         ┌──────────────────────┐
//! │  QueueDrainer        │  apply(intent)        ───► │  EmbeddedServer      │
//! │  (client database)   │  post_transaction(req)───► │  (server database)   │
//! │                      │  snapshot(limit)      ───► │                      │
//! │                      │ ◄─── Ack | RemoteError     │  engines in          │
//! └──────────────────────┘                            │  stockbook-db        │
//!                                                     └──────────────────────┘
//! ```
//!
//! An HTTP or RPC transport would implement the same trait and map a
//! failed request to [`RemoteError::Unreachable`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use stockbook_core::sync::{ServerSnapshot, SyncIntent};
use stockbook_core::{
    ChangeStatus, CheckoutRequest, InventoryAddition, PendingInventoryChange, StockTransfer,
    Transaction,
};
use stockbook_db::{Database, DbError};

use crate::error::RemoteError;

/// What the server hands back for an applied intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Ack {
    Transaction(Transaction),
    Addition(InventoryAddition),
    Change(PendingInventoryChange),
    Transfer(StockTransfer),
    ReturnsAcknowledged { completed: u64 },
}

#[async_trait]
pub trait SyncServer: Send + Sync {
    /// Applies one queued intent. Checkout replays are idempotent on
    /// `transaction_id`.
    async fn apply(&self, intent: &SyncIntent) -> Result<Ack, RemoteError>;

    /// Posts a locally created sale outside the queue.
    async fn post_transaction(&self, request: &CheckoutRequest) -> Result<Transaction, RemoteError>;

    /// Authoritative read state for a pull.
    async fn snapshot(&self, recent_limit: u32) -> Result<ServerSnapshot, RemoteError>;
}

// =============================================================================
// Embedded Server
// =============================================================================

/// The engines of a server database, called in-process.
#[derive(Debug, Clone)]
pub struct EmbeddedServer {
    db: Database,
}

impl EmbeddedServer {
    pub fn new(db: Database) -> Self {
        EmbeddedServer { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    async fn dispatch(&self, intent: &SyncIntent) -> Result<Ack, DbError> {
        let ack = match intent {
            SyncIntent::Checkout(request) => Ack::Transaction(self.db.checkout().checkout(request).await?),
            SyncIntent::Restock(request) => {
                Ack::Addition(self.db.stock().receive_into_warehouse(request).await?)
            }
            SyncIntent::RequestChange(change) => Ack::Change(self.db.changes().request(change).await?),
            SyncIntent::ApproveChange {
                change_id,
                reviewed_by,
            } => Ack::Change(self.db.changes().approve(*change_id, reviewed_by).await?),
            SyncIntent::RejectChange {
                change_id,
                reviewed_by,
                reason,
            } => Ack::Change(self.db.changes().reject(*change_id, reviewed_by, reason).await?),
            SyncIntent::AcknowledgeReturn {
                product_id,
                store_name,
            } => {
                let store = self
                    .db
                    .catalog()
                    .find_store(store_name)
                    .await?
                    .ok_or_else(|| DbError::not_found("Store", store_name))?;
                let completed = self.db.changes().acknowledge_return(*product_id, store.id).await?;
                Ack::ReturnsAcknowledged { completed }
            }
            SyncIntent::CreateTransfer(transfer) => {
                Ack::Transfer(self.db.transfers().create_transfer(transfer).await?)
            }
            SyncIntent::ConfirmTransfer {
                transfer_id,
                confirmed_by,
            } => Ack::Transfer(self.db.transfers().confirm(*transfer_id, confirmed_by).await?),
            SyncIntent::CancelTransfer {
                transfer_id,
                reason,
                cancelled_by,
            } => Ack::Transfer(
                self.db
                    .transfers()
                    .cancel(*transfer_id, reason, cancelled_by)
                    .await?,
            ),
        };
        Ok(ack)
    }

    async fn build_snapshot(&self, recent_limit: u32) -> Result<ServerSnapshot, DbError> {
        let catalog = self.db.catalog();
        Ok(ServerSnapshot {
            products: catalog.list_products().await?,
            stores: catalog.list_stores().await?,
            inventories: catalog.list_inventory(None).await?,
            pending_changes: self
                .db
                .changes()
                .list_changes(Some(ChangeStatus::Pending), None)
                .await?,
            transfers: self.db.transfers().list_transfers(None).await?,
            additions: self.db.stock().list_additions(None).await?,
            recent_transactions: self
                .db
                .checkout()
                .list_recent_transactions(recent_limit)
                .await?,
        })
    }
}

#[async_trait]
impl SyncServer for EmbeddedServer {
    #[instrument(skip(self, intent), fields(action = intent.action(), table = %intent.table()))]
    async fn apply(&self, intent: &SyncIntent) -> Result<Ack, RemoteError> {
        let ack = self.dispatch(intent).await?;
        debug!("Intent applied");
        Ok(ack)
    }

    async fn post_transaction(&self, request: &CheckoutRequest) -> Result<Transaction, RemoteError> {
        Ok(self.db.checkout().checkout(request).await?)
    }

    async fn snapshot(&self, recent_limit: u32) -> Result<ServerSnapshot, RemoteError> {
        Ok(self.build_snapshot(recent_limit).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockbook_core::workflow::{NewPendingChange, NewTransfer, TransferLine};
    use stockbook_core::{ChangeAction, CheckoutLine, ErrorKind, Money, NewProduct, TransferStatus};
    use stockbook_db::DbConfig;

    async fn server() -> (EmbeddedServer, i64) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let product = db
            .catalog()
            .create_product(&NewProduct {
                name: "Desk Lamp".into(),
                cost: Money::from_cents(3000),
                price: Money::from_cents(5000),
                warehouse_stock: 100,
                restock_qty: 0,
            })
            .await
            .unwrap();
        (EmbeddedServer::new(db), product.id)
    }

    #[tokio::test]
    async fn test_transfer_intents_dispatch_to_engine() {
        let (server, product_id) = server().await;

        let created = server
            .apply(&SyncIntent::CreateTransfer(NewTransfer {
                to_store: "Downtown".into(),
                from_store: None,
                items: vec![TransferLine { product_id, qty: 30 }],
                requested_by: "clerk".into(),
            }))
            .await
            .unwrap();
        let Ack::Transfer(transfer) = created else {
            panic!("expected a transfer ack");
        };
        assert_eq!(transfer.status, TransferStatus::Pending);

        let confirmed = server
            .apply(&SyncIntent::ConfirmTransfer {
                transfer_id: transfer.transfer_id,
                confirmed_by: "mgr".into(),
            })
            .await
            .unwrap();
        assert!(matches!(confirmed, Ack::Transfer(t) if t.status == TransferStatus::Confirmed));

        let again = server
            .apply(&SyncIntent::ConfirmTransfer {
                transfer_id: transfer.transfer_id,
                confirmed_by: "mgr".into(),
            })
            .await
            .unwrap_err();
        assert_eq!(again.kind(), Some(ErrorKind::NotPending));
        assert!(!again.is_retryable());
    }

    #[tokio::test]
    async fn test_return_flow_through_intents() {
        let (server, product_id) = server().await;
        let store = server.database().catalog().get_or_create_store("Downtown").await.unwrap();
        server
            .database()
            .stock()
            .move_warehouse_to_store(product_id, store.id, 20)
            .await
            .unwrap();

        let requested = server
            .apply(&SyncIntent::RequestChange(NewPendingChange {
                product_id,
                store_name: "Downtown".into(),
                action: ChangeAction::Return { qty: 5 },
                new_cost: None,
                new_price: None,
                reason: "damaged".into(),
                requested_by: "clerk".into(),
            }))
            .await
            .unwrap();
        let Ack::Change(change) = requested else {
            panic!("expected a change ack");
        };
        server
            .apply(&SyncIntent::ApproveChange {
                change_id: change.id,
                reviewed_by: "mgr".into(),
            })
            .await
            .unwrap();

        let ack = server
            .apply(&SyncIntent::AcknowledgeReturn {
                product_id,
                store_name: "downtown".into(),
            })
            .await
            .unwrap();
        assert_eq!(ack, Ack::ReturnsAcknowledged { completed: 1 });

        let unknown = server
            .apply(&SyncIntent::AcknowledgeReturn {
                product_id,
                store_name: "Nowhere".into(),
            })
            .await
            .unwrap_err();
        assert_eq!(unknown.kind(), Some(ErrorKind::NotFound));
    }

    #[tokio::test]
    async fn test_snapshot_and_idempotent_post() {
        let (server, product_id) = server().await;
        let store = server.database().catalog().get_or_create_store("Downtown").await.unwrap();
        server
            .database()
            .stock()
            .move_warehouse_to_store(product_id, store.id, 10)
            .await
            .unwrap();

        let request = CheckoutRequest {
            transaction_id: Some(10050),
            store_name: "Downtown".into(),
            lines: vec![CheckoutLine { product_id, qty: 2 }],
        };
        let first = server.post_transaction(&request).await.unwrap();
        let second = server.post_transaction(&request).await.unwrap();
        assert_eq!(first, second);

        let snapshot = server.snapshot(10).await.unwrap();
        assert_eq!(snapshot.products.len(), 1);
        assert_eq!(snapshot.stores.len(), 1);
        assert_eq!(snapshot.inventories[0].stock, 8);
        assert_eq!(snapshot.recent_transactions.len(), 1);
        assert_eq!(snapshot.recent_transactions[0].transaction_id, 10050);
    }
}
