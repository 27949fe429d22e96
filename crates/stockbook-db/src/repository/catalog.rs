//! # Catalog Repository
//!
//! Products, stores and per-store inventory reads, plus bulk product import.
//!
//! Stock quantities are never written here except for a new product's
//! opening warehouse stock; every later movement goes through
//! [`StockLedger`](super::stock::StockLedger).
//!
//! ## Bulk Import
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  rows ──► for each row (1-based):                                       │
//! │             validate ──✗──► errors.push({row, name, message})           │
//! │                │                                                        │
//! │                ✓                                                        │
//! │                ▼                                                        │
//! │             name exists? ──yes──► UPDATE cost/price/restock  updated += 1│
//! │                │                                                        │
//! │                no ─────────────► INSERT                  created += 1   │
//! │                                                                         │
//! │  One transaction for the batch. A rejected row writes nothing.         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info, instrument, warn};

use crate::error::{DbError, DbResult};
use stockbook_core::validation::{validate_amount, validate_new_product, validate_store_name};
use stockbook_core::{ImportReport, ImportRowError, Inventory, Money, NewProduct, Product, Store};

pub(crate) const PRODUCT_COLUMNS: &str =
    "id, name, cost, price, warehouse_stock, restock_qty, created_at, updated_at";

/// Repository for products, stores and inventory rows.
///
/// ## Usage
/// ```rust,ignore
/// let catalog = db.catalog();
/// let lamp = catalog.create_product(&NewProduct { .. }).await?;
/// let store = catalog.get_or_create_store("Downtown").await?;
/// let level = catalog.store_stock(store.id, lamp.id).await?;
/// ```
#[derive(Debug, Clone)]
pub struct CatalogRepository {
    pool: SqlitePool,
}

impl CatalogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        CatalogRepository { pool }
    }

    // =========================================================================
    // Products
    // =========================================================================

    /// Inserts a product. The name is the uniqueness key (case-insensitive).
    ///
    /// ## Errors
    /// - `Validation` for an empty name or negative amounts
    /// - `UniqueViolation` on `products.name`
    #[instrument(skip(self, product), fields(name = %product.name))]
    pub async fn create_product(&self, product: &NewProduct) -> DbResult<Product> {
        validate_new_product(product)?;
        let mut conn = self.pool.acquire().await?;
        let id = insert_product_in(&mut conn, product).await?;
        info!(product_id = id, "Product created");
        product_in(&mut conn, id).await
    }

    pub async fn get_product(&self, id: i64) -> DbResult<Product> {
        let mut conn = self.pool.acquire().await?;
        product_in(&mut conn, id).await
    }

    /// Case-insensitive lookup by name.
    pub async fn find_product_by_name(&self, name: &str) -> DbResult<Option<Product>> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE name = ?1");
        Ok(sqlx::query_as::<_, Product>(&sql)
            .bind(name.trim())
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn list_products(&self) -> DbResult<Vec<Product>> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products ORDER BY name");
        Ok(sqlx::query_as::<_, Product>(&sql)
            .fetch_all(&self.pool)
            .await?)
    }

    /// Replaces cost and price.
    #[instrument(skip(self))]
    pub async fn update_pricing(&self, id: i64, cost: Money, price: Money) -> DbResult<Product> {
        validate_amount("cost", cost)?;
        validate_amount("price", price)?;
        let mut conn = self.pool.acquire().await?;
        set_pricing_in(&mut conn, id, Some(cost), Some(price)).await?;
        product_in(&mut conn, id).await
    }

    /// Upserts parsed rows by product name.
    ///
    /// Opening `warehouse_stock` only applies to products the import creates;
    /// existing products keep their stock and take the new cost, price and
    /// restock hint.
    #[instrument(skip(self, rows), fields(rows = rows.len()))]
    pub async fn import_products(&self, rows: &[NewProduct]) -> DbResult<ImportReport> {
        let mut report = ImportReport::default();
        let mut tx = self.pool.begin().await?;

        for (idx, row) in rows.iter().enumerate() {
            let row_no = idx + 1;
            if let Err(err) = validate_new_product(row) {
                debug!(row = row_no, error = %err, "Import row rejected");
                report.errors.push(ImportRowError {
                    row: row_no,
                    name: row.name.clone(),
                    message: err.to_string(),
                });
                continue;
            }

            let existing: Option<i64> = sqlx::query_scalar("SELECT id FROM products WHERE name = ?1")
                .bind(row.name.trim())
                .fetch_optional(&mut *tx)
                .await?;

            match existing {
                Some(id) => {
                    sqlx::query(
                        r#"
                        UPDATE products
                        SET cost = ?1, price = ?2, restock_qty = ?3, updated_at = ?4
                        WHERE id = ?5
                        "#,
                    )
                    .bind(row.cost)
                    .bind(row.price)
                    .bind(row.restock_qty)
                    .bind(Utc::now())
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                    report.updated += 1;
                }
                None => {
                    insert_product_in(&mut tx, row).await?;
                    report.created += 1;
                }
            }
        }

        tx.commit().await?;

        if !report.errors.is_empty() {
            warn!(errors = report.errors.len(), "Import finished with rejected rows");
        }
        info!(
            created = report.created,
            updated = report.updated,
            "Product import applied"
        );
        Ok(report)
    }

    // =========================================================================
    // Stores
    // =========================================================================

    /// Returns the store with this name, creating it on first reference.
    #[instrument(skip(self))]
    pub async fn get_or_create_store(&self, name: &str) -> DbResult<Store> {
        let mut conn = self.pool.acquire().await?;
        get_or_create_store_in(&mut conn, name).await
    }

    pub async fn get_store(&self, id: i64) -> DbResult<Store> {
        sqlx::query_as::<_, Store>("SELECT id, name, created_at FROM stores WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::not_found("Store", id))
    }

    pub async fn find_store(&self, name: &str) -> DbResult<Option<Store>> {
        Ok(
            sqlx::query_as::<_, Store>("SELECT id, name, created_at FROM stores WHERE name = ?1")
                .bind(name.trim())
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    pub async fn list_stores(&self) -> DbResult<Vec<Store>> {
        Ok(
            sqlx::query_as::<_, Store>("SELECT id, name, created_at FROM stores ORDER BY name")
                .fetch_all(&self.pool)
                .await?,
        )
    }

    // =========================================================================
    // Inventory
    // =========================================================================

    pub async fn get_inventory(&self, store_id: i64, product_id: i64) -> DbResult<Option<Inventory>> {
        Ok(sqlx::query_as::<_, Inventory>(
            r#"
            SELECT store_id, product_id, stock, updated_at
            FROM inventories
            WHERE store_id = ?1 AND product_id = ?2
            "#,
        )
        .bind(store_id)
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    /// Store stock, 0 when the row doesn't exist yet.
    pub async fn store_stock(&self, store_id: i64, product_id: i64) -> DbResult<i64> {
        Ok(self
            .get_inventory(store_id, product_id)
            .await?
            .map_or(0, |inv| inv.stock))
    }

    /// All inventory rows, or one store's.
    pub async fn list_inventory(&self, store_id: Option<i64>) -> DbResult<Vec<Inventory>> {
        Ok(sqlx::query_as::<_, Inventory>(
            r#"
            SELECT store_id, product_id, stock, updated_at
            FROM inventories
            WHERE ?1 IS NULL OR store_id = ?1
            ORDER BY store_id, product_id
            "#,
        )
        .bind(store_id)
        .fetch_all(&self.pool)
        .await?)
    }
}

// =============================================================================
// In-transaction helpers
// =============================================================================

pub(crate) async fn product_in(conn: &mut SqliteConnection, id: i64) -> DbResult<Product> {
    let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ?1");
    sqlx::query_as::<_, Product>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| DbError::not_found("Product", id))
}

async fn insert_product_in(conn: &mut SqliteConnection, product: &NewProduct) -> DbResult<i64> {
    let now = Utc::now();
    let id = sqlx::query(
        r#"
        INSERT INTO products (name, cost, price, warehouse_stock, restock_qty, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
        "#,
    )
    .bind(product.name.trim())
    .bind(product.cost)
    .bind(product.price)
    .bind(product.warehouse_stock)
    .bind(product.restock_qty)
    .bind(now)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();
    Ok(id)
}

/// Overwrites whichever of cost/price is given.
pub(crate) async fn set_pricing_in(
    conn: &mut SqliteConnection,
    product_id: i64,
    cost: Option<Money>,
    price: Option<Money>,
) -> DbResult<()> {
    if cost.is_none() && price.is_none() {
        return Ok(());
    }
    let affected = sqlx::query(
        r#"
        UPDATE products
        SET cost = COALESCE(?1, cost), price = COALESCE(?2, price), updated_at = ?3
        WHERE id = ?4
        "#,
    )
    .bind(cost)
    .bind(price)
    .bind(Utc::now())
    .bind(product_id)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    if affected == 0 {
        return Err(DbError::not_found("Product", product_id));
    }
    debug!(product_id, ?cost, ?price, "Product pricing updated");
    Ok(())
}

/// Atomic get-or-insert on the case-insensitive store name.
pub(crate) async fn get_or_create_store_in(
    conn: &mut SqliteConnection,
    name: &str,
) -> DbResult<Store> {
    validate_store_name(name)?;
    let name = name.trim();

    let inserted = sqlx::query(
        "INSERT INTO stores (name, created_at) VALUES (?1, ?2) ON CONFLICT(name) DO NOTHING",
    )
    .bind(name)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?
    .rows_affected();
    if inserted == 1 {
        info!(store = %name, "Store created");
    }

    sqlx::query_as::<_, Store>("SELECT id, name, created_at FROM stores WHERE name = ?1")
        .bind(name)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| DbError::not_found("Store", name))
}

pub(crate) async fn store_stock_in(
    conn: &mut SqliteConnection,
    store_id: i64,
    product_id: i64,
) -> DbResult<i64> {
    let stock: Option<i64> =
        sqlx::query_scalar("SELECT stock FROM inventories WHERE store_id = ?1 AND product_id = ?2")
            .bind(store_id)
            .bind(product_id)
            .fetch_optional(&mut *conn)
            .await?;
    Ok(stock.unwrap_or(0))
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};
    use stockbook_core::ErrorKind;

    async fn setup() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    fn row(name: &str, cost: i64, price: i64, stock: i64) -> NewProduct {
        NewProduct {
            name: name.into(),
            cost: Money::from_cents(cost),
            price: Money::from_cents(price),
            warehouse_stock: stock,
            restock_qty: 0,
        }
    }

    #[tokio::test]
    async fn test_create_and_lookup_product() {
        let db = setup().await;
        let lamp = db.catalog().create_product(&row("Desk Lamp", 3000, 5000, 100)).await.unwrap();
        assert_eq!(lamp.warehouse_stock, 100);

        let found = db.catalog().find_product_by_name("desk lamp").await.unwrap().unwrap();
        assert_eq!(found.id, lamp.id);

        let dup = db.catalog().create_product(&row("DESK LAMP", 1, 1, 0)).await.unwrap_err();
        assert!(dup.is_unique_on("products.name"));
    }

    #[tokio::test]
    async fn test_update_pricing() {
        let db = setup().await;
        let lamp = db.catalog().create_product(&row("Lamp", 3000, 5000, 0)).await.unwrap();
        let updated = db
            .catalog()
            .update_pricing(lamp.id, Money::from_cents(3200), Money::from_cents(5500))
            .await
            .unwrap();
        assert_eq!(updated.cost.cents(), 3200);
        assert_eq!(updated.price.cents(), 5500);

        let missing = db
            .catalog()
            .update_pricing(999, Money::zero(), Money::zero())
            .await
            .unwrap_err();
        assert_eq!(missing.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_get_or_create_store_is_case_insensitive() {
        let db = setup().await;
        let a = db.catalog().get_or_create_store("Downtown").await.unwrap();
        let b = db.catalog().get_or_create_store("  downtown ").await.unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(b.name, "Downtown");
        assert_eq!(db.catalog().list_stores().await.unwrap().len(), 1);

        let err = db.catalog().get_or_create_store("   ").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_store_stock_defaults_to_zero() {
        let db = setup().await;
        let lamp = db.catalog().create_product(&row("Lamp", 3000, 5000, 0)).await.unwrap();
        let store = db.catalog().get_or_create_store("North").await.unwrap();
        assert_eq!(db.catalog().store_stock(store.id, lamp.id).await.unwrap(), 0);
        assert!(db.catalog().list_inventory(Some(store.id)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bulk_import_reports_row_errors() {
        let db = setup().await;
        let rows = vec![
            row("Desk Lamp", 3000, 5000, 10),
            row("", 100, 200, 5),
            row("Chair", 4000, 7000, 3),
        ];

        let report = db.catalog().import_products(&rows).await.unwrap();

        assert_eq!(report.applied(), 2);
        assert_eq!(report.created, 2);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].row, 2);
        assert_eq!(db.catalog().list_products().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_bulk_import_updates_existing_by_name() {
        let db = setup().await;
        db.catalog().create_product(&row("Chair", 4000, 7000, 3)).await.unwrap();

        let report = db
            .catalog()
            .import_products(&[row("chair", 4100, 7200, 99), row("Stool", 900, 1500, -1)])
            .await
            .unwrap();

        assert_eq!(report.updated, 1);
        assert_eq!(report.created, 0);
        assert_eq!(report.errors.len(), 1);

        let chair = db.catalog().find_product_by_name("Chair").await.unwrap().unwrap();
        assert_eq!(chair.price.cents(), 7200);
        assert_eq!(chair.warehouse_stock, 3);
        assert!(db.catalog().find_product_by_name("Stool").await.unwrap().is_none());
    }
}
