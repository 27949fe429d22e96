//! # Stock Transfer Protocol
//!
//! Two-phase warehouse → store movement.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │  create_transfer()          confirm()                    cancel()        │
//! │  ────────────────           ─────────                    ────────        │
//! │  check warehouse ≥ qty      BEGIN                        status=cancelled│
//! │  allocate transfer_id       status = confirmed           (nothing moved, │
//! │  status = pending             warehouse -= qty  ──✗──┐    nothing to     │
//! │  NO STOCK MOVES               store     += qty       │    reverse)       │
//! │                             (once per item)          │                   │
//! │                             COMMIT                   ▼                   │
//! │                                          ROLLBACK: no item moved         │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The create-time check is advisory: two transfers can both pass it and
//! the second one fails at confirm. Confirm is where stock is actually
//! reserved.

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{info, instrument};

use crate::error::{DbError, DbResult};
use crate::repository::catalog::{get_or_create_store_in, product_in};
use crate::repository::stock::move_warehouse_to_store_in;
use crate::sequence::{with_sequence_retry, Sequence};
use stockbook_core::validation::validate_identity;
use stockbook_core::workflow::{NewTransfer, StockTransferItem};
use stockbook_core::{CoreError, StockLocation, StockTransfer, TransferStatus, ValidationError};

const TRANSFER_COLUMNS: &str = "transfer_id, from_store, to_store_id, status, requested_by, \
     created_at, confirmed_at, confirmed_by, cancelled_at, cancelled_reason, cancelled_by";

/// Repository for stock transfers.
#[derive(Debug, Clone)]
pub struct TransferRepository {
    pool: SqlitePool,
}

impl TransferRepository {
    pub fn new(pool: SqlitePool) -> Self {
        TransferRepository { pool }
    }

    /// Records a pending transfer. Warehouse stock is checked per product
    /// (duplicate lines summed) but not decremented.
    ///
    /// ## Errors
    /// - `InsufficientStock { location: Warehouse }` naming the product
    /// - `Validation` for a store-sourced transfer
    #[instrument(skip(self, transfer), fields(to_store = %transfer.to_store, items = transfer.items.len()))]
    pub async fn create_transfer(&self, transfer: &NewTransfer) -> DbResult<StockTransfer> {
        transfer.validate()?;
        if transfer
            .from_store
            .as_deref()
            .is_some_and(|s| !s.trim().is_empty())
        {
            return Err(ValidationError::InvalidFormat {
                field: "from_store".into(),
                reason: "only warehouse-sourced transfers are supported".into(),
            }
            .into());
        }

        with_sequence_retry(Sequence::Transfer, move || async move {
            let mut tx = self.pool.begin().await?;
            let created = create_transfer_in(&mut tx, transfer).await?;
            tx.commit().await?;
            Ok(created)
        })
        .await
    }

    /// Moves every item or none, then marks the transfer confirmed.
    #[instrument(skip(self))]
    pub async fn confirm(&self, transfer_id: i64, confirmed_by: &str) -> DbResult<StockTransfer> {
        validate_identity("confirmed_by", confirmed_by)?;
        let mut tx = self.pool.begin().await?;

        // Status flips first so the unit holds the write lock before it
        // reads. A failed move below rolls the flip back.
        let affected = sqlx::query(
            r#"
            UPDATE stock_transfers
            SET status = ?1, confirmed_at = ?2, confirmed_by = ?3
            WHERE transfer_id = ?4 AND status = 'pending'
            "#,
        )
        .bind(TransferStatus::Confirmed)
        .bind(Utc::now())
        .bind(confirmed_by.trim())
        .bind(transfer_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        ensure_flipped_in(&mut tx, transfer_id, affected).await?;

        let confirmed = transfer_in(&mut tx, transfer_id).await?;
        for item in &confirmed.items {
            move_warehouse_to_store_in(&mut tx, item.product_id, confirmed.to_store_id, item.qty).await?;
        }
        tx.commit().await?;

        info!(transfer_id, items = confirmed.items.len(), confirmed_by = %confirmed_by, "Transfer confirmed");
        Ok(confirmed)
    }

    /// Cancels a pending transfer. No stock to reverse.
    #[instrument(skip(self))]
    pub async fn cancel(
        &self,
        transfer_id: i64,
        reason: &str,
        cancelled_by: &str,
    ) -> DbResult<StockTransfer> {
        validate_identity("cancelled_by", cancelled_by)?;
        let mut tx = self.pool.begin().await?;

        let affected = sqlx::query(
            r#"
            UPDATE stock_transfers
            SET status = ?1, cancelled_at = ?2, cancelled_reason = ?3, cancelled_by = ?4
            WHERE transfer_id = ?5 AND status = 'pending'
            "#,
        )
        .bind(TransferStatus::Cancelled)
        .bind(Utc::now())
        .bind(reason.trim())
        .bind(cancelled_by.trim())
        .bind(transfer_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        ensure_flipped_in(&mut tx, transfer_id, affected).await?;

        let cancelled = transfer_in(&mut tx, transfer_id).await?;
        tx.commit().await?;

        info!(transfer_id, reason = %reason, "Transfer cancelled");
        Ok(cancelled)
    }

    pub async fn get_transfer(&self, transfer_id: i64) -> DbResult<StockTransfer> {
        let mut conn = self.pool.acquire().await?;
        transfer_in(&mut conn, transfer_id).await
    }

    /// Newest first.
    pub async fn list_transfers(&self, status: Option<TransferStatus>) -> DbResult<Vec<StockTransfer>> {
        let mut conn = self.pool.acquire().await?;
        let sql = format!(
            "SELECT {TRANSFER_COLUMNS} FROM stock_transfers
             WHERE ?1 IS NULL OR status = ?1
             ORDER BY transfer_id DESC"
        );
        let mut transfers = sqlx::query_as::<_, StockTransfer>(&sql)
            .bind(status)
            .fetch_all(&mut *conn)
            .await?;
        for transfer in &mut transfers {
            transfer.items = items_in(&mut conn, transfer.transfer_id).await?;
        }
        Ok(transfers)
    }
}

async fn create_transfer_in(
    conn: &mut SqliteConnection,
    transfer: &NewTransfer,
) -> DbResult<StockTransfer> {
    let store = get_or_create_store_in(conn, &transfer.to_store).await?;

    let mut lines = Vec::new();
    for line in transfer.totals_by_product() {
        let product = product_in(conn, line.product_id).await?;
        if product.warehouse_stock < line.qty {
            return Err(CoreError::InsufficientStock {
                location: StockLocation::Warehouse,
                product: product.name,
                available: product.warehouse_stock,
                requested: line.qty,
            }
            .into());
        }
        lines.push((product, line.qty));
    }

    let transfer_id = Sequence::Transfer.next_value(conn).await?;
    sqlx::query(
        r#"
        INSERT INTO stock_transfers (transfer_id, from_store, to_store_id, status, requested_by, created_at)
        VALUES (?1, NULL, ?2, ?3, ?4, ?5)
        "#,
    )
    .bind(transfer_id)
    .bind(store.id)
    .bind(TransferStatus::Pending)
    .bind(transfer.requested_by.trim())
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;

    for (idx, (product, qty)) in lines.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO stock_transfer_items (transfer_id, line_no, product_id, item_name, qty)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(transfer_id)
        .bind(idx as i64 + 1)
        .bind(product.id)
        .bind(&product.name)
        .bind(qty)
        .execute(&mut *conn)
        .await?;
    }

    info!(transfer_id, to_store = %store.name, items = lines.len(), "Transfer requested");
    transfer_in(conn, transfer_id).await
}

/// `NotFound` or `NotPending` when a guarded `pending → status` update
/// matched nothing.
async fn ensure_flipped_in(conn: &mut SqliteConnection, transfer_id: i64, affected: u64) -> DbResult<()> {
    if affected == 0 {
        let current = transfer_in(conn, transfer_id).await?;
        return Err(CoreError::not_pending("StockTransfer", transfer_id, current.status).into());
    }
    Ok(())
}

async fn transfer_in(conn: &mut SqliteConnection, transfer_id: i64) -> DbResult<StockTransfer> {
    let sql = format!("SELECT {TRANSFER_COLUMNS} FROM stock_transfers WHERE transfer_id = ?1");
    let mut transfer = sqlx::query_as::<_, StockTransfer>(&sql)
        .bind(transfer_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| DbError::not_found("StockTransfer", transfer_id))?;
    transfer.items = items_in(conn, transfer_id).await?;
    Ok(transfer)
}

async fn items_in(conn: &mut SqliteConnection, transfer_id: i64) -> DbResult<Vec<StockTransferItem>> {
    Ok(sqlx::query_as::<_, StockTransferItem>(
        r#"
        SELECT transfer_id, line_no, product_id, item_name, qty
        FROM stock_transfer_items
        WHERE transfer_id = ?1
        ORDER BY line_no
        "#,
    )
    .bind(transfer_id)
    .fetch_all(&mut *conn)
    .await?)
}

// =============================================================================
// Unit Tests
// =============================================================================
