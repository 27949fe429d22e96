//! # Stock Ledger
//!
//! The only writer of `products.warehouse_stock` and `inventories.stock`.
//!
//! ## Check-Then-Decrement Is One Statement
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  UPDATE products                                                        │
//! │  SET warehouse_stock = warehouse_stock - :qty                           │
//! │  WHERE id = :product AND warehouse_stock >= :qty                        │
//! │                                                                         │
//! │  rows_affected == 1 → moved                                             │
//! │  rows_affected == 0 → read what is there now → InsufficientStock       │
//! │                                                                         │
//! │  Two tills selling the last unit: exactly one UPDATE matches.          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Moves
//! | Operation                 | Warehouse  | Store       |
//! |---------------------------|------------|-------------|
//! | `move_warehouse_to_store` | − qty      | + qty       |
//! | `move_store_to_warehouse` | + qty      | − qty       |
//! | `remove_from_store`       | none       | − qty       |
//! | `adjust_store_level` ↑    | − diff     | = level     |
//! | `adjust_store_level` ↓    | none       | = level     |
//! | `receive_into_warehouse`  | + qty      | none        |

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info, instrument};

use crate::error::{DbError, DbResult};
use crate::repository::catalog::{product_in, set_pricing_in, store_stock_in};
use crate::sequence::{with_sequence_retry, Sequence};
use stockbook_core::numbering::{addition_reference_prefix, format_addition_reference};
use stockbook_core::validation::{
    validate_amount, validate_identity, validate_quantity, validate_stock_level,
};
use stockbook_core::{CoreError, InventoryAddition, RestockRequest, StockLocation};

/// Stock on both sides of a (product, store) pair after a move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevels {
    pub product_id: i64,
    pub store_id: i64,
    pub warehouse: i64,
    pub store: i64,
}

/// Warehouse and store stock movements.
#[derive(Debug, Clone)]
pub struct StockLedger {
    pool: SqlitePool,
}

impl StockLedger {
    pub fn new(pool: SqlitePool) -> Self {
        StockLedger { pool }
    }

    /// Warehouse → store.
    ///
    /// ## Errors
    /// - `InsufficientStock { location: Warehouse }` when `warehouse_stock < qty`
    #[instrument(skip(self))]
    pub async fn move_warehouse_to_store(
        &self,
        product_id: i64,
        store_id: i64,
        qty: i64,
    ) -> DbResult<StockLevels> {
        validate_quantity(qty)?;
        let mut tx = self.pool.begin().await?;
        move_warehouse_to_store_in(&mut tx, product_id, store_id, qty).await?;
        let levels = levels_in(&mut tx, product_id, store_id).await?;
        tx.commit().await?;
        Ok(levels)
    }

    /// Store → warehouse.
    ///
    /// ## Errors
    /// - `InsufficientStock { location: Store }` when the row is missing or
    ///   `stock < qty`
    #[instrument(skip(self))]
    pub async fn move_store_to_warehouse(
        &self,
        product_id: i64,
        store_id: i64,
        qty: i64,
    ) -> DbResult<StockLevels> {
        validate_quantity(qty)?;
        let mut tx = self.pool.begin().await?;
        move_store_to_warehouse_in(&mut tx, product_id, store_id, qty).await?;
        let levels = levels_in(&mut tx, product_id, store_id).await?;
        tx.commit().await?;
        Ok(levels)
    }

    /// Store-only decrement (shrinkage, write-off).
    #[instrument(skip(self))]
    pub async fn remove_from_store(
        &self,
        product_id: i64,
        store_id: i64,
        qty: i64,
    ) -> DbResult<StockLevels> {
        validate_quantity(qty)?;
        let mut tx = self.pool.begin().await?;
        decrement_store_in(&mut tx, store_id, product_id, qty).await?;
        let levels = levels_in(&mut tx, product_id, store_id).await?;
        tx.commit().await?;
        Ok(levels)
    }

    /// Sets the store level. Raising it draws the difference from the
    /// warehouse; lowering it writes the excess off without a return.
    #[instrument(skip(self))]
    pub async fn adjust_store_level(
        &self,
        product_id: i64,
        store_id: i64,
        level: i64,
    ) -> DbResult<StockLevels> {
        validate_stock_level("level", level)?;
        let mut tx = self.pool.begin().await?;
        adjust_store_level_in(&mut tx, product_id, store_id, level).await?;
        let levels = levels_in(&mut tx, product_id, store_id).await?;
        tx.commit().await?;
        Ok(levels)
    }

    /// Books a purchase into the warehouse and records the addition.
    ///
    /// Stock, cost/price and the addition row (with its `additionId` and
    /// monthly `INV-YYYYMM-NNN` reference) commit together.
    #[instrument(skip(self, request), fields(product_id = request.product_id, qty = request.qty))]
    pub async fn receive_into_warehouse(
        &self,
        request: &RestockRequest,
    ) -> DbResult<InventoryAddition> {
        validate_quantity(request.qty)?;
        validate_amount("cost", request.cost)?;
        validate_amount("price", request.price)?;
        validate_identity("received_by", &request.received_by)?;

        with_sequence_retry(Sequence::Addition, move || async move {
            let mut tx = self.pool.begin().await?;
            let addition = receive_into_warehouse_in(&mut tx, request).await?;
            tx.commit().await?;
            Ok(addition)
        })
        .await
    }

    /// Newest first.
    pub async fn list_additions(&self, product_id: Option<i64>) -> DbResult<Vec<InventoryAddition>> {
        Ok(sqlx::query_as::<_, InventoryAddition>(
            r#"
            SELECT addition_id, reference, product_id, qty, cost, price, received_by, created_at
            FROM inventory_additions
            WHERE ?1 IS NULL OR product_id = ?1
            ORDER BY addition_id DESC
            "#,
        )
        .bind(product_id)
        .fetch_all(&self.pool)
        .await?)
    }
}

// =============================================================================
// In-transaction primitives
// =============================================================================

pub(crate) async fn decrement_warehouse_in(
    conn: &mut SqliteConnection,
    product_id: i64,
    qty: i64,
) -> DbResult<()> {
    let affected = sqlx::query(
        r#"
        UPDATE products
        SET warehouse_stock = warehouse_stock - ?1, updated_at = ?2
        WHERE id = ?3 AND warehouse_stock >= ?1
        "#,
    )
    .bind(qty)
    .bind(Utc::now())
    .bind(product_id)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    if affected == 0 {
        let product = product_in(conn, product_id).await?;
        debug!(product_id, available = product.warehouse_stock, requested = qty, "Warehouse short");
        return Err(CoreError::InsufficientStock {
            location: StockLocation::Warehouse,
            product: product.name,
            available: product.warehouse_stock,
            requested: qty,
        }
        .into());
    }
    Ok(())
}

pub(crate) async fn increment_warehouse_in(
    conn: &mut SqliteConnection,
    product_id: i64,
    qty: i64,
) -> DbResult<()> {
    let affected = sqlx::query(
        "UPDATE products SET warehouse_stock = warehouse_stock + ?1, updated_at = ?2 WHERE id = ?3",
    )
    .bind(qty)
    .bind(Utc::now())
    .bind(product_id)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    if affected == 0 {
        return Err(DbError::not_found("Product", product_id));
    }
    Ok(())
}

/// Store-side conditional decrement. A missing row counts as 0 available.
pub(crate) async fn decrement_store_in(
    conn: &mut SqliteConnection,
    store_id: i64,
    product_id: i64,
    qty: i64,
) -> DbResult<()> {
    if let Err(available) = try_decrement_store_in(conn, store_id, product_id, qty).await? {
        let product = product_in(conn, product_id).await?;
        debug!(product_id, store_id, available, requested = qty, "Store short");
        return Err(CoreError::InsufficientStock {
            location: StockLocation::Store,
            product: product.name,
            available,
            requested: qty,
        }
        .into());
    }
    Ok(())
}

/// Returns `Ok(Err(available))` instead of failing so callers pick the error
/// flavour (store move vs. checkout line).
pub(crate) async fn try_decrement_store_in(
    conn: &mut SqliteConnection,
    store_id: i64,
    product_id: i64,
    qty: i64,
) -> DbResult<Result<(), i64>> {
    let affected = sqlx::query(
        r#"
        UPDATE inventories
        SET stock = stock - ?1, updated_at = ?2
        WHERE store_id = ?3 AND product_id = ?4 AND stock >= ?1
        "#,
    )
    .bind(qty)
    .bind(Utc::now())
    .bind(store_id)
    .bind(product_id)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    if affected == 1 {
        return Ok(Ok(()));
    }
    Ok(Err(store_stock_in(conn, store_id, product_id).await?))
}

/// Upsert-increment of the (store, product) row.
pub(crate) async fn increment_store_in(
    conn: &mut SqliteConnection,
    store_id: i64,
    product_id: i64,
    qty: i64,
) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO inventories (store_id, product_id, stock, updated_at)
        VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT(store_id, product_id)
        DO UPDATE SET stock = stock + excluded.stock, updated_at = excluded.updated_at
        "#,
    )
    .bind(store_id)
    .bind(product_id)
    .bind(qty)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn set_store_level_in(
    conn: &mut SqliteConnection,
    store_id: i64,
    product_id: i64,
    level: i64,
) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO inventories (store_id, product_id, stock, updated_at)
        VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT(store_id, product_id)
        DO UPDATE SET stock = excluded.stock, updated_at = excluded.updated_at
        "#,
    )
    .bind(store_id)
    .bind(product_id)
    .bind(level)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub(crate) async fn move_warehouse_to_store_in(
    conn: &mut SqliteConnection,
    product_id: i64,
    store_id: i64,
    qty: i64,
) -> DbResult<()> {
    decrement_warehouse_in(conn, product_id, qty).await?;
    increment_store_in(conn, store_id, product_id, qty).await?;
    debug!(product_id, store_id, qty, "Moved warehouse → store");
    Ok(())
}

pub(crate) async fn move_store_to_warehouse_in(
    conn: &mut SqliteConnection,
    product_id: i64,
    store_id: i64,
    qty: i64,
) -> DbResult<()> {
    decrement_store_in(conn, store_id, product_id, qty).await?;
    increment_warehouse_in(conn, product_id, qty).await?;
    debug!(product_id, store_id, qty, "Moved store → warehouse");
    Ok(())
}

pub(crate) async fn adjust_store_level_in(
    conn: &mut SqliteConnection,
    product_id: i64,
    store_id: i64,
    level: i64,
) -> DbResult<()> {
    let current = store_stock_in(conn, store_id, product_id).await?;
    let diff = level - current;
    if diff > 0 {
        move_warehouse_to_store_in(conn, product_id, store_id, diff).await
    } else {
        // Product must exist even when nothing is drawn from the warehouse.
        product_in(conn, product_id).await?;
        set_store_level_in(conn, store_id, product_id, level).await?;
        debug!(product_id, store_id, from = current, to = level, "Store level set");
        Ok(())
    }
}

async fn receive_into_warehouse_in(
    conn: &mut SqliteConnection,
    request: &RestockRequest,
) -> DbResult<InventoryAddition> {
    increment_warehouse_in(conn, request.product_id, request.qty).await?;
    set_pricing_in(conn, request.product_id, Some(request.cost), Some(request.price)).await?;

    let created_at = Utc::now();
    let addition_id = Sequence::Addition.next_value(conn).await?;
    let prefix = addition_reference_prefix(created_at.date_naive());
    let suffix: i64 = sqlx::query_scalar(
        r#"
        SELECT COALESCE(MAX(CAST(substr(reference, ?2) AS INTEGER)), 0) + 1
        FROM inventory_additions
        WHERE reference LIKE ?1 || '%'
        "#,
    )
    .bind(&prefix)
    .bind(prefix.len() as i64 + 1)
    .fetch_one(&mut *conn)
    .await?;
    let reference = format_addition_reference(created_at.date_naive(), suffix);

    sqlx::query(
        r#"
        INSERT INTO inventory_additions
            (addition_id, reference, product_id, qty, cost, price, received_by, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        "#,
    )
    .bind(addition_id)
    .bind(&reference)
    .bind(request.product_id)
    .bind(request.qty)
    .bind(request.cost)
    .bind(request.price)
    .bind(request.received_by.trim())
    .bind(created_at)
    .execute(&mut *conn)
    .await?;

    info!(addition_id, reference = %reference, product_id = request.product_id, qty = request.qty, "Warehouse receipt recorded");

    Ok(InventoryAddition {
        addition_id,
        reference,
        product_id: request.product_id,
        qty: request.qty,
        cost: request.cost,
        price: request.price,
        received_by: request.received_by.trim().to_string(),
        created_at,
    })
}

async fn levels_in(
    conn: &mut SqliteConnection,
    product_id: i64,
    store_id: i64,
) -> DbResult<StockLevels> {
    let product = product_in(conn, product_id).await?;
    let store = store_stock_in(conn, store_id, product_id).await?;
    Ok(StockLevels {
        product_id,
        store_id,
        warehouse: product.warehouse_stock,
        store,
    })
}

// =============================================================================
// Unit Tests
// =============================================================================
