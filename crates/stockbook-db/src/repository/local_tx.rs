//! # Local Transactions
//!
//! Sales rung up on this device while offline.
//!
//! ## Offline Checkout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                   SINGLE LOCAL TRANSACTION                              │
//! │                                                                         │
//! │  1. price and stock-check every line against the mirror                │
//! │  2. transaction_id = max(local ids, mirrored ids, 10000) + 1            │
//! │  3. INSERT local_transactions (synced_at = NULL)                        │
//! │  4. enqueue SyncIntent::Checkout { transaction_id, .. }                 │
//! │  5. mirrored store stock -= qty                                         │
//! │                                                                         │
//! │  Later: the drainer replays the intent; the sweep re-posts anything    │
//! │  still unsynced. Both are idempotent on transaction_id.                 │
//! │  Every pull re-deducts unsynced sales from the fresh mirror.            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{info, instrument};

use crate::error::{DbError, DbResult};
use crate::repository::mirror::{
    decrement_inventory_in, max_transaction_id_in, product_in, store_by_name_in,
};
use crate::repository::sync_queue::enqueue_in;
use stockbook_core::checkout::{price_sale, PricedLine};
use stockbook_core::numbering::FIRST_TRANSACTION_ID;
use stockbook_core::sync::SyncIntent;
use stockbook_core::{CheckoutRequest, CoreError, Transaction, TransactionItem, SALES_TAX};

/// A sale recorded on this device, with the request it will replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalTransaction {
    pub transaction: Transaction,
    pub store_name: String,
    pub request: CheckoutRequest,
    pub synced_at: Option<DateTime<Utc>>,
}

#[derive(sqlx::FromRow)]
struct LocalTransactionRow {
    store_name: String,
    request: String,
    payload: String,
    synced_at: Option<DateTime<Utc>>,
}

impl TryFrom<LocalTransactionRow> for LocalTransaction {
    type Error = DbError;

    fn try_from(row: LocalTransactionRow) -> Result<Self, Self::Error> {
        Ok(LocalTransaction {
            transaction: serde_json::from_str(&row.payload)?,
            store_name: row.store_name,
            request: serde_json::from_str(&row.request)?,
            synced_at: row.synced_at,
        })
    }
}

/// Repository for locally created sales.
#[derive(Debug, Clone)]
pub struct LocalTransactionRepository {
    pool: SqlitePool,
}

impl LocalTransactionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        LocalTransactionRepository { pool }
    }

    /// Prices a sale from the mirror, records it, queues its replay and
    /// decrements mirrored stock, all in one local transaction.
    ///
    /// ## Errors
    /// - `OutOfStock` when the mirror holds less than a line asks for
    /// - `NotFound` for a product the mirror has never seen
    #[instrument(skip(self, request), fields(store = %request.store_name))]
    pub async fn record_offline_checkout(&self, request: &CheckoutRequest) -> DbResult<LocalTransaction> {
        let lines = request.normalized_lines()?;
        let mut tx = self.pool.begin().await?;

        let store = store_by_name_in(&mut tx, &request.store_name).await?;
        let mut priced = Vec::with_capacity(lines.len());
        for line in &lines {
            let product = product_in(&mut tx, line.product_id)
                .await?
                .ok_or_else(|| DbError::not_found("Product", line.product_id))?;
            let shortfall = match &store {
                Some(store) => decrement_inventory_in(&mut tx, store.id, product.id, line.qty)
                    .await?
                    .err(),
                None => Some(0),
            };
            if let Some(available) = shortfall {
                return Err(CoreError::OutOfStock {
                    item: product.name,
                    available,
                    requested: line.qty,
                }
                .into());
            }
            priced.push(PricedLine {
                product_id: product.id,
                item_name: product.name,
                item_price: product.price,
                item_cost: product.cost,
                qty: line.qty,
            });
        }
        // Stock was found, so the store is known.
        let store_id = store.map_or(0, |s| s.id);

        let totals = price_sale(&priced, SALES_TAX);
        let transaction_id = next_local_id_in(&mut tx).await?;
        let created_at = Utc::now();

        let transaction = Transaction {
            transaction_id,
            store_id,
            subtotal: totals.subtotal,
            tax: totals.tax,
            total: totals.total,
            created_at,
            items: priced
                .into_iter()
                .enumerate()
                .map(|(idx, l)| TransactionItem {
                    transaction_id,
                    line_no: idx as i64 + 1,
                    product_id: l.product_id,
                    item_name: l.item_name,
                    item_price: l.item_price,
                    item_cost: l.item_cost,
                    qty: l.qty,
                })
                .collect(),
        };
        let replay = CheckoutRequest {
            transaction_id: Some(transaction_id),
            store_name: request.store_name.trim().to_string(),
            lines,
        };

        sqlx::query(
            r#"
            INSERT INTO local_transactions (transaction_id, store_name, request, payload, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(transaction_id)
        .bind(&replay.store_name)
        .bind(serde_json::to_string(&replay)?)
        .bind(serde_json::to_string(&transaction)?)
        .bind(created_at)
        .execute(&mut *tx)
        .await?;

        enqueue_in(&mut tx, &SyncIntent::Checkout(replay.clone())).await?;
        tx.commit().await?;

        info!(transaction_id, total = %transaction.total, "Offline sale recorded");
        Ok(LocalTransaction {
            transaction,
            store_name: replay.store_name.clone(),
            request: replay,
            synced_at: None,
        })
    }

    /// Local sales the server hasn't confirmed, oldest first.
    pub async fn unsynced(&self) -> DbResult<Vec<LocalTransaction>> {
        let rows = sqlx::query_as::<_, LocalTransactionRow>(
            r#"
            SELECT store_name, request, payload, synced_at
            FROM local_transactions
            WHERE synced_at IS NULL
            ORDER BY transaction_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(LocalTransaction::try_from).collect()
    }

    pub async fn list(&self) -> DbResult<Vec<LocalTransaction>> {
        let rows = sqlx::query_as::<_, LocalTransactionRow>(
            "SELECT store_name, request, payload, synced_at FROM local_transactions ORDER BY transaction_id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(LocalTransaction::try_from).collect()
    }

    /// Idempotent. Returns false when the id isn't a local sale.
    pub async fn mark_synced(&self, transaction_id: i64) -> DbResult<bool> {
        let affected = sqlx::query(
            "UPDATE local_transactions SET synced_at = COALESCE(synced_at, ?1) WHERE transaction_id = ?2",
        )
        .bind(Utc::now())
        .bind(transaction_id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(affected == 1)
    }

    /// The id the next offline sale would take.
    pub async fn next_local_id(&self) -> DbResult<i64> {
        let mut conn = self.pool.acquire().await?;
        next_local_id_in(&mut conn).await
    }
}

/// Deducts every unsynced local sale from freshly pulled mirror stock.
/// The server hasn't counted these yet. A shortfall floors the mirrored
/// level at zero. Returns the number of sales re-applied.
pub(crate) async fn reapply_unsynced_in(conn: &mut SqliteConnection) -> DbResult<usize> {
    let requests: Vec<String> = sqlx::query_scalar(
        "SELECT request FROM local_transactions WHERE synced_at IS NULL ORDER BY transaction_id",
    )
    .fetch_all(&mut *conn)
    .await?;

    for raw in &requests {
        let request: CheckoutRequest = serde_json::from_str(raw)?;
        let Some(store) = store_by_name_in(conn, &request.store_name).await? else {
            continue;
        };
        for line in request.normalized_lines()? {
            if let Err(available) = decrement_inventory_in(conn, store.id, line.product_id, line.qty).await? {
                if available > 0 {
                    let _ = decrement_inventory_in(conn, store.id, line.product_id, available).await?;
                }
            }
        }
    }
    Ok(requests.len())
}

async fn next_local_id_in(conn: &mut SqliteConnection) -> DbResult<i64> {
    let local: Option<i64> = sqlx::query_scalar("SELECT MAX(transaction_id) FROM local_transactions")
        .fetch_one(&mut *conn)
        .await?;
    let mirrored = max_transaction_id_in(conn).await?;
    let highest = local
        .into_iter()
        .chain(mirrored)
        .fold(FIRST_TRANSACTION_ID - 1, i64::max);
    Ok(highest + 1)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};
    use stockbook_core::sync::ServerSnapshot;
    use stockbook_core::{CheckoutLine, ErrorKind, Inventory, Money, Product, Store};

    async fn setup(stock: i64, recent: &[i64]) -> Database {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let now = Utc::now();
        let snapshot = ServerSnapshot {
            products: vec![Product {
                id: 7,
                name: "Desk Lamp".into(),
                cost: Money::from_cents(3000),
                price: Money::from_cents(5000),
                warehouse_stock: 0,
                restock_qty: 0,
                created_at: now,
                updated_at: now,
            }],
            stores: vec![Store { id: 2, name: "Downtown".into(), created_at: now }],
            inventories: vec![Inventory { store_id: 2, product_id: 7, stock, updated_at: now }],
            recent_transactions: recent
                .iter()
                .map(|&id| Transaction {
                    transaction_id: id,
                    store_id: 2,
                    subtotal: Money::zero(),
                    tax: Money::zero(),
                    total: Money::zero(),
                    created_at: now,
                    items: Vec::new(),
                })
                .collect(),
            ..ServerSnapshot::default()
        };
        db.mirror().replace_all(&snapshot).await.unwrap();
        db
    }

    fn sale(qty: i64) -> CheckoutRequest {
        CheckoutRequest {
            transaction_id: None,
            store_name: "Downtown".into(),
            lines: vec![CheckoutLine { product_id: 7, qty }],
        }
    }

    #[tokio::test]
    async fn test_offline_checkout_writes_all_three_arenas() {
        let db = setup(10, &[]).await;

        let local = db.local_transactions().record_offline_checkout(&sale(2)).await.unwrap();

        assert_eq!(local.transaction.transaction_id, 10001);
        assert_eq!(local.transaction.total.cents(), 11250);
        assert_eq!(local.request.transaction_id, Some(10001));
        assert_eq!(db.mirror().inventory_level("Downtown", 7).await.unwrap(), 8);

        let queued = db.sync_queue().list().await.unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].intent().unwrap(), SyncIntent::Checkout(local.request.clone()));

        assert_eq!(db.local_transactions().unsynced().await.unwrap(), vec![local]);
    }

    #[tokio::test]
    async fn test_offline_oversell_leaves_everything_untouched() {
        let db = setup(1, &[]).await;
        let err = db.local_transactions().record_offline_checkout(&sale(2)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfStock);
        assert_eq!(db.mirror().inventory_level("Downtown", 7).await.unwrap(), 1);
        assert!(db.sync_queue().list().await.unwrap().is_empty());
        assert!(db.local_transactions().list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_local_ids_stay_above_mirrored_ids() {
        let db = setup(10, &[10040, 10007]).await;
        assert_eq!(db.local_transactions().next_local_id().await.unwrap(), 10041);
        let a = db.local_transactions().record_offline_checkout(&sale(1)).await.unwrap();
        let b = db.local_transactions().record_offline_checkout(&sale(1)).await.unwrap();
        assert_eq!(a.transaction.transaction_id, 10041);
        assert_eq!(b.transaction.transaction_id, 10042);
    }

    #[tokio::test]
    async fn test_pull_keeps_unsynced_sales_deducted() {
        let db = setup(10, &[]).await;
        // What the server will keep reporting until it sees the sales.
        let snapshot = ServerSnapshot {
            products: db.mirror().products().await.unwrap(),
            stores: db.mirror().stores().await.unwrap(),
            inventories: db.mirror().inventories().await.unwrap(),
            ..ServerSnapshot::default()
        };

        let local = db.local_transactions().record_offline_checkout(&sale(4)).await.unwrap();
        db.local_transactions().record_offline_checkout(&sale(3)).await.unwrap();
        assert_eq!(db.mirror().inventory_level("Downtown", 7).await.unwrap(), 3);

        db.mirror().replace_all(&snapshot).await.unwrap();
        assert_eq!(db.mirror().inventory_level("Downtown", 7).await.unwrap(), 3);

        // Once the first is acknowledged the server's count includes it.
        db.local_transactions().mark_synced(local.transaction.transaction_id).await.unwrap();
        let mut counted = snapshot.clone();
        counted.inventories[0].stock = 6;
        db.mirror().replace_all(&counted).await.unwrap();
        assert_eq!(db.mirror().inventory_level("Downtown", 7).await.unwrap(), 3);

        // A server level below what is still owed floors at zero.
        counted.inventories[0].stock = 1;
        db.mirror().replace_all(&counted).await.unwrap();
        assert_eq!(db.mirror().inventory_level("Downtown", 7).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_mark_synced_clears_unsynced() {
        let db = setup(10, &[]).await;
        let local = db.local_transactions().record_offline_checkout(&sale(1)).await.unwrap();
        let id = local.transaction.transaction_id;
        assert!(db.local_transactions().mark_synced(id).await.unwrap());
        assert!(db.local_transactions().mark_synced(id).await.unwrap());
        assert!(db.local_transactions().unsynced().await.unwrap().is_empty());
        assert!(!db.local_transactions().mark_synced(1).await.unwrap());
    }
}
