//! # Checkout Transaction Engine
//!
//! A sale is one SQLite transaction: the transaction row, its items, the
//! store stock decrements and the ledger postings commit together or not at
//! all.
//!
//! ## Sale Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  CheckoutRequest { transaction_id?, store_name, lines }                │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  normalized_lines()  ← merge duplicates, qty > 0                        │
//! │       │                                                                 │
//! │  BEGIN ─────────────────────────────────────────────────────────────┐   │
//! │  │ store = get_or_create(store_name)      ← first write, takes lock │   │
//! │  │ transaction_id given and already stored?                         │   │
//! │  │   same store and lines → return it (replay)                      │   │
//! │  │   anything else        ──✗──► TransactionIdConflict              │   │
//! │  │ per line: stock -= qty WHERE stock >= qty   ──✗──► OutOfStock    │   │
//! │  │           snapshot name / price / cost                            │   │
//! │  │ subtotal, tax (12.5%, half up), total                             │   │
//! │  │ transaction_id = given or MAX + 1                                  │   │
//! │  │ INSERT transactions + transaction_items                           │   │
//! │  │ Entry A: Dr Cash / Cr Sales Revenue       (total)                 │   │
//! │  │ Entry B: Dr COGS / Cr Inventory           (Σ cost × qty, if > 0)  │   │
//! │  COMMIT ────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Replay
//! Offline tills pick their own `transaction_id`. Posting the same id again
//! returns the stored sale without touching stock or the ledger, provided
//! the stored sale has the same store and the same (product, qty) lines. An
//! id held by a different sale is refused so the caller can surface it.
//! When two replays race, the loser's insert hits the primary key, the unit
//! is retried, and the retry takes the replay branch.

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{info, instrument, warn};

use crate::error::{DbError, DbResult};
use crate::repository::catalog::{get_or_create_store_in, product_in};
use crate::repository::ledger::{post_entry_in, standard_account_in};
use crate::repository::stock::try_decrement_store_in;
use crate::sequence::{with_sequences_retry, Sequence};
use stockbook_core::checkout::{price_sale, sale_journal_entries, PricedLine, SaleAccounts};
use stockbook_core::ledger::StandardAccount;
use stockbook_core::{CheckoutLine, CheckoutRequest, CoreError, Transaction, TransactionItem, SALES_TAX};

/// Repository for sales.
#[derive(Debug, Clone)]
pub struct CheckoutRepository {
    pool: SqlitePool,
}

impl CheckoutRepository {
    pub fn new(pool: SqlitePool) -> Self {
        CheckoutRepository { pool }
    }

    /// Rings up a sale, or returns the stored one for a replayed id.
    ///
    /// ## Errors
    /// - `OutOfStock` naming the first line the store can't cover; nothing
    ///   is written
    /// - `Validation` for an empty cart, a non-positive quantity or a blank
    ///   store name
    /// - `TransactionIdConflict` when a replayed id is stored for a
    ///   different sale
    #[instrument(skip(self, request), fields(store = %request.store_name, transaction_id = ?request.transaction_id))]
    pub async fn checkout(&self, request: &CheckoutRequest) -> DbResult<Transaction> {
        let lines = request.normalized_lines()?;
        let lines = &lines;

        let transaction_id = with_sequences_retry(
            &[Sequence::Transaction, Sequence::JournalEntry],
            move || async move {
                let mut tx = self.pool.begin().await?;
                let id = checkout_in(&mut tx, request, lines).await?;
                tx.commit().await?;
                Ok(id)
            },
        )
        .await?;

        self.get_transaction(transaction_id).await
    }

    pub async fn get_transaction(&self, transaction_id: i64) -> DbResult<Transaction> {
        let mut conn = self.pool.acquire().await?;
        transaction_in(&mut conn, transaction_id)
            .await?
            .ok_or_else(|| DbError::not_found("Transaction", transaction_id))
    }

    /// Newest first.
    pub async fn list_recent_transactions(&self, limit: u32) -> DbResult<Vec<Transaction>> {
        let mut conn = self.pool.acquire().await?;
        let mut transactions = sqlx::query_as::<_, Transaction>(
            r#"
            SELECT transaction_id, store_id, subtotal, tax, total, created_at
            FROM transactions
            ORDER BY transaction_id DESC
            LIMIT ?1
            "#,
        )
        .bind(limit)
        .fetch_all(&mut *conn)
        .await?;
        for transaction in &mut transactions {
            transaction.items = items_in(&mut conn, transaction.transaction_id).await?;
        }
        Ok(transactions)
    }
}

/// Returns the id of the stored (new or replayed) transaction.
async fn checkout_in(
    conn: &mut SqliteConnection,
    request: &CheckoutRequest,
    lines: &[CheckoutLine],
) -> DbResult<i64> {
    // The store upsert is a write, so the unit holds the write lock before
    // anything below reads.
    let store = get_or_create_store_in(conn, &request.store_name).await?;

    if let Some(id) = request.transaction_id {
        if transaction_exists_in(conn, id).await? {
            if !replay_matches_in(conn, id, store.id, lines).await? {
                warn!(transaction_id = id, store = %request.store_name, "Replayed id belongs to another sale");
                return Err(CoreError::TransactionIdConflict { transaction_id: id }.into());
            }
            info!(transaction_id = id, "Checkout replay, returning stored sale");
            return Ok(id);
        }
    }

    let mut priced = Vec::with_capacity(lines.len());
    for line in lines {
        let product = product_in(conn, line.product_id).await?;
        if let Err(available) = try_decrement_store_in(conn, store.id, product.id, line.qty).await? {
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
    let totals = price_sale(&priced, SALES_TAX);

    let transaction_id = match request.transaction_id {
        Some(id) => id,
        None => Sequence::Transaction.next_value(conn).await?,
    };
    let created_at = Utc::now();

    sqlx::query(
        r#"
        INSERT INTO transactions (transaction_id, store_id, subtotal, tax, total, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
    )
    .bind(transaction_id)
    .bind(store.id)
    .bind(totals.subtotal)
    .bind(totals.tax)
    .bind(totals.total)
    .bind(created_at)
    .execute(&mut *conn)
    .await?;

    for (idx, line) in priced.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO transaction_items
                (transaction_id, line_no, product_id, item_name, item_price, item_cost, qty)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(transaction_id)
        .bind(idx as i64 + 1)
        .bind(line.product_id)
        .bind(&line.item_name)
        .bind(line.item_price)
        .bind(line.item_cost)
        .bind(line.qty)
        .execute(&mut *conn)
        .await?;
    }

    let accounts = SaleAccounts {
        cash: standard_account_in(conn, StandardAccount::Cash).await?.id,
        sales_revenue: standard_account_in(conn, StandardAccount::SalesRevenue).await?.id,
        cost_of_goods_sold: standard_account_in(conn, StandardAccount::CostOfGoodsSold).await?.id,
        inventory: standard_account_in(conn, StandardAccount::Inventory).await?.id,
    };
    for entry in sale_journal_entries(transaction_id, created_at.date_naive(), &totals, accounts) {
        post_entry_in(conn, &entry).await?;
    }

    info!(
        transaction_id,
        store_id = store.id,
        lines = priced.len(),
        total = %totals.total,
        "Sale recorded"
    );
    Ok(transaction_id)
}

pub(crate) async fn transaction_exists_in(conn: &mut SqliteConnection, id: i64) -> DbResult<bool> {
    let found: Option<i64> =
        sqlx::query_scalar("SELECT transaction_id FROM transactions WHERE transaction_id = ?1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
    Ok(found.is_some())
}

/// Same store and same merged (product, qty) lines as the stored sale.
async fn replay_matches_in(
    conn: &mut SqliteConnection,
    id: i64,
    store_id: i64,
    lines: &[CheckoutLine],
) -> DbResult<bool> {
    let stored_store: i64 = sqlx::query_scalar("SELECT store_id FROM transactions WHERE transaction_id = ?1")
        .bind(id)
        .fetch_one(&mut *conn)
        .await?;
    if stored_store != store_id {
        return Ok(false);
    }

    let stored: Vec<(i64, i64)> = sqlx::query_as(
        r#"
        SELECT product_id, qty
        FROM transaction_items
        WHERE transaction_id = ?1
        ORDER BY product_id
        "#,
    )
    .bind(id)
    .fetch_all(&mut *conn)
    .await?;

    let mut requested: Vec<(i64, i64)> = lines.iter().map(|l| (l.product_id, l.qty)).collect();
    requested.sort_unstable();
    Ok(stored == requested)
}

async fn transaction_in(conn: &mut SqliteConnection, id: i64) -> DbResult<Option<Transaction>> {
    let transaction = sqlx::query_as::<_, Transaction>(
        r#"
        SELECT transaction_id, store_id, subtotal, tax, total, created_at
        FROM transactions
        WHERE transaction_id = ?1
        "#,
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    match transaction {
        Some(mut t) => {
            t.items = items_in(conn, id).await?;
            Ok(Some(t))
        }
        None => Ok(None),
    }
}

async fn items_in(conn: &mut SqliteConnection, id: i64) -> DbResult<Vec<TransactionItem>> {
    Ok(sqlx::query_as::<_, TransactionItem>(
        r#"
        SELECT transaction_id, line_no, product_id, item_name, item_price, item_cost, qty
        FROM transaction_items
        WHERE transaction_id = ?1
        ORDER BY line_no
        "#,
    )
    .bind(id)
    .fetch_all(&mut *conn)
    .await?)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};
    use stockbook_core::{DateRange, ErrorKind, Money, NewProduct};

    /// Lamp (price 50.00, cost 30.00) with `store_stock` units at Store S.
    async fn setup(store_stock: i64) -> (Database, i64) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let lamp = db
            .catalog()
            .create_product(&NewProduct {
                name: "Desk Lamp".into(),
                cost: Money::from_cents(3000),
                price: Money::from_cents(5000),
                warehouse_stock: 100,
                restock_qty: 0,
            })
            .await
            .unwrap()
            .id;
        let store = db.catalog().get_or_create_store("Store S").await.unwrap();
        db.stock().move_warehouse_to_store(lamp, store.id, store_stock).await.unwrap();
        (db, lamp)
    }

    fn sale(transaction_id: Option<i64>, product_id: i64, qty: i64) -> CheckoutRequest {
        CheckoutRequest {
            transaction_id,
            store_name: "Store S".into(),
            lines: vec![CheckoutLine { product_id, qty }],
        }
    }

    async fn store_stock(db: &Database, product: i64) -> i64 {
        let store = db.catalog().find_store("Store S").await.unwrap().unwrap();
        db.catalog().store_stock(store.id, product).await.unwrap()
    }

    #[tokio::test]
    async fn test_sale_totals_and_ledger_postings() {
        let (db, lamp) = setup(10).await;

        let t = db.checkout().checkout(&sale(None, lamp, 2)).await.unwrap();

        assert_eq!(t.transaction_id, 10001);
        assert_eq!(t.subtotal.cents(), 10000);
        assert_eq!(t.tax.cents(), 1250);
        assert_eq!(t.total.cents(), 11250);
        assert_eq!(t.items.len(), 1);
        assert_eq!(t.items[0].item_cost.cents(), 3000);
        assert_eq!(store_stock(&db, lamp).await, 8);

        let entries = db.ledger().entries_for_source("sale:10001").await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].description, "Sale #10001");
        assert!(entries[0].lines.iter().all(|l| l.debit.cents() == 11250 || l.credit.cents() == 11250));
        assert!(entries[1].lines.iter().all(|l| l.debit.cents() == 6000 || l.credit.cents() == 6000));

        assert_eq!(db.ledger().get_account("1010").await.unwrap().balance.cents(), 11250);
        assert_eq!(db.ledger().get_account("4010").await.unwrap().balance.cents(), 11250);
        assert_eq!(db.ledger().get_account("5010").await.unwrap().balance.cents(), 6000);
        assert_eq!(db.ledger().get_account("1200").await.unwrap().balance.cents(), -6000);
        assert!(db.ledger().verify_balances().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_oversell_writes_nothing() {
        let (db, lamp) = setup(10).await;

        let err = db.checkout().checkout(&sale(None, lamp, 12)).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::OutOfStock);
        assert!(err.as_domain().is_some_and(CoreError::is_insufficient_stock));
        match err.as_domain() {
            Some(CoreError::OutOfStock { available, requested, .. }) => {
                assert_eq!((*available, *requested), (10, 12));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(store_stock(&db, lamp).await, 10);
        assert!(db.checkout().list_recent_transactions(10).await.unwrap().is_empty());
        assert!(db.ledger().list_entries(DateRange::all_time()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_replayed_transaction_id_is_idempotent() {
        let (db, lamp) = setup(10).await;

        let first = db.checkout().checkout(&sale(Some(10042), lamp, 3)).await.unwrap();
        let again = db.checkout().checkout(&sale(Some(10042), lamp, 3)).await.unwrap();

        assert_eq!(first, again);
        assert_eq!(db.checkout().list_recent_transactions(10).await.unwrap().len(), 1);
        assert_eq!(store_stock(&db, lamp).await, 7);
        assert_eq!(db.ledger().entries_for_source("sale:10042").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_replayed_id_held_by_another_sale_is_refused() {
        let (db, lamp) = setup(20).await;

        // The server rang up 5 on its own and took the id the till picked.
        let counter_sale = db.checkout().checkout(&sale(None, lamp, 5)).await.unwrap();
        assert_eq!(counter_sale.transaction_id, 10001);

        let err = db.checkout().checkout(&sale(Some(10001), lamp, 2)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransactionIdConflict);
        assert!(err.kind().is_business_rule());

        let other_store = CheckoutRequest {
            store_name: "Store T".into(),
            ..sale(Some(10001), lamp, 5)
        };
        let err = db.checkout().checkout(&other_store).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransactionIdConflict);

        // Same store, case aside, and same lines is still a replay.
        let replay = CheckoutRequest {
            store_name: "store s".into(),
            ..sale(Some(10001), lamp, 5)
        };
        assert_eq!(db.checkout().checkout(&replay).await.unwrap(), counter_sale);

        assert_eq!(store_stock(&db, lamp).await, 15);
        assert_eq!(db.checkout().list_recent_transactions(10).await.unwrap().len(), 1);
        assert!(db.catalog().find_store("Store T").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_lines_are_checked_together() {
        let (db, lamp) = setup(5).await;
        let request = CheckoutRequest {
            transaction_id: None,
            store_name: "Store S".into(),
            lines: vec![
                CheckoutLine { product_id: lamp, qty: 3 },
                CheckoutLine { product_id: lamp, qty: 3 },
            ],
        };
        let err = db.checkout().checkout(&request).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfStock);
        assert_eq!(store_stock(&db, lamp).await, 5);
    }

    #[tokio::test]
    async fn test_zero_cost_sale_posts_only_revenue_entry() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let sample = db
            .catalog()
            .create_product(&NewProduct {
                name: "Sample".into(),
                cost: Money::zero(),
                price: Money::from_cents(100),
                warehouse_stock: 5,
                restock_qty: 0,
            })
            .await
            .unwrap()
            .id;
        let store = db.catalog().get_or_create_store("Kiosk").await.unwrap();
        db.stock().move_warehouse_to_store(sample, store.id, 5).await.unwrap();

        let t = db
            .checkout()
            .checkout(&CheckoutRequest {
                transaction_id: None,
                store_name: "Kiosk".into(),
                lines: vec![CheckoutLine { product_id: sample, qty: 1 }],
            })
            .await
            .unwrap();

        let source = format!("sale:{}", t.transaction_id);
        assert_eq!(db.ledger().entries_for_source(&source).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sequential_ids_and_recent_listing() {
        let (db, lamp) = setup(10).await;
        for _ in 0..3 {
            db.checkout().checkout(&sale(None, lamp, 1)).await.unwrap();
        }
        let recent = db.checkout().list_recent_transactions(2).await.unwrap();
        let ids: Vec<_> = recent.iter().map(|t| t.transaction_id).collect();
        assert_eq!(ids, vec![10003, 10002]);

        let err = db.checkout().get_transaction(1).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parallel_checkouts_never_oversell() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(DbConfig::new(dir.path().join("stockbook.db")).max_connections(8))
            .await
            .unwrap();
        let lamp = db
            .catalog()
            .create_product(&NewProduct {
                name: "Desk Lamp".into(),
                cost: Money::from_cents(3000),
                price: Money::from_cents(5000),
                warehouse_stock: 100,
                restock_qty: 0,
            })
            .await
            .unwrap()
            .id;
        let store = db.catalog().get_or_create_store("Store S").await.unwrap();
        db.stock().move_warehouse_to_store(lamp, store.id, 10).await.unwrap();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let db = db.clone();
                tokio::spawn(async move { db.checkout().checkout(&sale(None, lamp, 1)).await })
            })
            .collect();

        let mut ids = Vec::new();
        for handle in handles {
            match handle.await.unwrap() {
                Ok(t) => ids.push(t.transaction_id),
                Err(err) => assert_eq!(err.kind(), ErrorKind::OutOfStock, "{err}"),
            }
        }

        assert_eq!(ids.len(), 10);
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids, (10001..=10010).collect::<Vec<_>>());
        assert_eq!(store_stock(&db, lamp).await, 0);
        assert_eq!(db.checkout().list_recent_transactions(100).await.unwrap().len(), 10);
        assert_eq!(db.ledger().get_account("1010").await.unwrap().balance.cents(), 10 * 5625);
        assert!(db.ledger().verify_balances().await.unwrap().is_empty());
    }
}
