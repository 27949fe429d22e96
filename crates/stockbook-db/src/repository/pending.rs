//! # Pending Change Workflow
//!
//! Store-initiated inventory changes that wait for warehouse review before
//! any stock moves.
//!
//! ## State Machine
//! ```text
//!                 request()
//!                     │
//!                     ▼
//!              ┌─────────────┐   reject()    ┌────────────┐
//!              │   pending   │──────────────►│  rejected  │
//!              └─────────────┘               └────────────┘
//!                     │ approve()
//!                     │ (stock moves here, same transaction)
//!                     ▼
//!              ┌─────────────┐ acknowledge_return() ┌────────────┐
//!              │  approved   │─────────────────────►│ completed  │
//!              └─────────────┘   (return only)      └────────────┘
//! ```
//!
//! One `pending` row per (product, store), enforced by a partial unique
//! index so two tills racing on the same request can't both win.

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{info, instrument, warn};

use crate::error::{DbError, DbResult};
use crate::repository::catalog::{get_or_create_store_in, product_in, set_pricing_in, store_stock_in};
use crate::repository::stock::{
    adjust_store_level_in, decrement_store_in, move_store_to_warehouse_in,
    move_warehouse_to_store_in,
};
use stockbook_core::validation::validate_identity;
use stockbook_core::{
    ChangeAction, ChangeStatus, ChangeType, CoreError, PendingInventoryChange, StockLocation,
};
use stockbook_core::workflow::NewPendingChange;

const CHANGE_COLUMNS: &str = "id, product_id, store_id, change_type, qty, new_cost, new_price, \
     reason, requested_by, status, reviewed_by, reviewed_at, review_note, created_at";

/// Repository for the pending change workflow.
#[derive(Debug, Clone)]
pub struct PendingChangeRepository {
    pool: SqlitePool,
}

impl PendingChangeRepository {
    pub fn new(pool: SqlitePool) -> Self {
        PendingChangeRepository { pool }
    }

    /// Files a change for review. Stock is checked, not touched.
    ///
    /// ## Errors
    /// - `DuplicatePendingChange` when the pair already has an open request
    /// - `InsufficientStock` when `add` exceeds the warehouse or
    ///   `remove`/`return` exceeds the store
    #[instrument(skip(self, change), fields(product_id = change.product_id, store = %change.store_name))]
    pub async fn request(&self, change: &NewPendingChange) -> DbResult<PendingInventoryChange> {
        change.validate()?;
        let mut tx = self.pool.begin().await?;

        let store = get_or_create_store_in(&mut tx, &change.store_name).await?;
        let product = product_in(&mut tx, change.product_id).await?;

        if let Some(existing_id) = open_change_id_in(&mut tx, product.id, store.id).await? {
            return Err(duplicate(product.id, store.id, existing_id));
        }

        match change.action {
            ChangeAction::Add { qty } if product.warehouse_stock < qty => {
                return Err(CoreError::InsufficientStock {
                    location: StockLocation::Warehouse,
                    product: product.name,
                    available: product.warehouse_stock,
                    requested: qty,
                }
                .into());
            }
            ChangeAction::Remove { qty } | ChangeAction::Return { qty } => {
                let available = store_stock_in(&mut tx, store.id, product.id).await?;
                if available < qty {
                    return Err(CoreError::InsufficientStock {
                        location: StockLocation::Store,
                        product: product.name,
                        available,
                        requested: qty,
                    }
                    .into());
                }
            }
            ChangeAction::Add { .. } | ChangeAction::Adjust { .. } => {}
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO pending_inventory_changes
                (product_id, store_id, change_type, qty, new_cost, new_price,
                 reason, requested_by, status, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'pending', ?9)
            "#,
        )
        .bind(product.id)
        .bind(store.id)
        .bind(change.action.change_type())
        .bind(change.action.qty())
        .bind(change.new_cost)
        .bind(change.new_price)
        .bind(change.reason.trim())
        .bind(change.requested_by.trim())
        .bind(Utc::now())
        .execute(&mut *tx)
        .await;

        let id = match inserted {
            Ok(done) => done.last_insert_rowid(),
            Err(err) => {
                let err = DbError::from(err);
                if err.is_unique_on("pending_inventory_changes") {
                    let existing_id = open_change_id_in(&mut tx, product.id, store.id)
                        .await?
                        .unwrap_or_default();
                    return Err(duplicate(product.id, store.id, existing_id));
                }
                return Err(err);
            }
        };

        let created = change_in(&mut tx, id).await?;
        tx.commit().await?;

        info!(change_id = id, change_type = %created.change_type, qty = created.qty, "Pending change requested");
        Ok(created)
    }

    /// Applies the change to stock and marks it approved, in one transaction.
    ///
    /// Stock availability is re-checked by the move itself; a shortfall
    /// aborts everything and the change stays `pending`.
    #[instrument(skip(self))]
    pub async fn approve(&self, change_id: i64, reviewed_by: &str) -> DbResult<PendingInventoryChange> {
        validate_identity("reviewed_by", reviewed_by)?;
        let mut tx = self.pool.begin().await?;

        // Status flips first so the unit holds the write lock before it
        // reads. A failed move below rolls the flip back.
        resolve_in(&mut tx, change_id, ChangeStatus::Approved, reviewed_by, None).await?;
        let change = change_in(&mut tx, change_id).await?;

        let (product, store) = (change.product_id, change.store_id);
        match change.action() {
            ChangeAction::Add { qty } => move_warehouse_to_store_in(&mut tx, product, store, qty).await?,
            ChangeAction::Remove { qty } => decrement_store_in(&mut tx, store, product, qty).await?,
            ChangeAction::Return { qty } => move_store_to_warehouse_in(&mut tx, product, store, qty).await?,
            ChangeAction::Adjust { level } => adjust_store_level_in(&mut tx, product, store, level).await?,
        }
        set_pricing_in(&mut tx, product, change.new_cost, change.new_price).await?;
        tx.commit().await?;

        info!(change_id, change_type = %change.change_type, reviewed_by = %reviewed_by, "Pending change approved");
        Ok(change)
    }

    /// Closes the change without touching stock.
    #[instrument(skip(self))]
    pub async fn reject(
        &self,
        change_id: i64,
        reviewed_by: &str,
        reason: &str,
    ) -> DbResult<PendingInventoryChange> {
        validate_identity("reviewed_by", reviewed_by)?;
        let mut tx = self.pool.begin().await?;

        resolve_in(&mut tx, change_id, ChangeStatus::Rejected, reviewed_by, Some(reason.trim())).await?;
        let rejected = change_in(&mut tx, change_id).await?;
        tx.commit().await?;

        info!(change_id, reviewed_by = %reviewed_by, "Pending change rejected");
        Ok(rejected)
    }

    /// Marks approved returns for the pair as completed. Returns how many
    /// rows moved; 0 is not an error.
    #[instrument(skip(self))]
    pub async fn acknowledge_return(&self, product_id: i64, store_id: i64) -> DbResult<u64> {
        let completed = sqlx::query(
            r#"
            UPDATE pending_inventory_changes
            SET status = ?1
            WHERE product_id = ?2 AND store_id = ?3 AND change_type = ?4 AND status = ?5
            "#,
        )
        .bind(ChangeStatus::Completed)
        .bind(product_id)
        .bind(store_id)
        .bind(ChangeType::Return)
        .bind(ChangeStatus::Approved)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if completed > 0 {
            info!(product_id, store_id, completed, "Returns acknowledged");
        }
        Ok(completed)
    }

    pub async fn get_change(&self, change_id: i64) -> DbResult<PendingInventoryChange> {
        let mut conn = self.pool.acquire().await?;
        change_in(&mut conn, change_id).await
    }

    /// Newest first, optionally narrowed by status and store.
    pub async fn list_changes(
        &self,
        status: Option<ChangeStatus>,
        store_id: Option<i64>,
    ) -> DbResult<Vec<PendingInventoryChange>> {
        let sql = format!(
            "SELECT {CHANGE_COLUMNS} FROM pending_inventory_changes
             WHERE (?1 IS NULL OR status = ?1) AND (?2 IS NULL OR store_id = ?2)
             ORDER BY id DESC"
        );
        Ok(sqlx::query_as::<_, PendingInventoryChange>(&sql)
            .bind(status)
            .bind(store_id)
            .fetch_all(&self.pool)
            .await?)
    }
}

fn duplicate(product_id: i64, store_id: i64, existing_id: i64) -> DbError {
    warn!(product_id, store_id, existing_id, "Pending change already open");
    CoreError::DuplicatePendingChange {
        product_id,
        store_id,
        existing_id,
    }
    .into()
}

async fn open_change_id_in(
    conn: &mut SqliteConnection,
    product_id: i64,
    store_id: i64,
) -> DbResult<Option<i64>> {
    Ok(sqlx::query_scalar(
        "SELECT id FROM pending_inventory_changes WHERE product_id = ?1 AND store_id = ?2 AND status = 'pending'",
    )
    .bind(product_id)
    .bind(store_id)
    .fetch_optional(&mut *conn)
    .await?)
}

async fn change_in(conn: &mut SqliteConnection, id: i64) -> DbResult<PendingInventoryChange> {
    let sql = format!("SELECT {CHANGE_COLUMNS} FROM pending_inventory_changes WHERE id = ?1");
    sqlx::query_as::<_, PendingInventoryChange>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| DbError::not_found("PendingInventoryChange", id))
}

/// Guarded `pending → status` transition.
async fn resolve_in(
    conn: &mut SqliteConnection,
    id: i64,
    status: ChangeStatus,
    reviewed_by: &str,
    note: Option<&str>,
) -> DbResult<()> {
    let affected = sqlx::query(
        r#"
        UPDATE pending_inventory_changes
        SET status = ?1, reviewed_by = ?2, reviewed_at = ?3, review_note = ?4
        WHERE id = ?5 AND status = 'pending'
        "#,
    )
    .bind(status)
    .bind(reviewed_by.trim())
    .bind(Utc::now())
    .bind(note)
    .bind(id)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    if affected == 0 {
        let current = change_in(conn, id).await?;
        return Err(CoreError::not_pending("PendingInventoryChange", id, current.status).into());
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};
    use stockbook_core::{ErrorKind, Money, NewProduct};

    struct Fixture {
        db: Database,
        product: i64,
        store: i64,
    }

    /// Product with `warehouse` units, `store` of which are moved to Downtown.
    async fn setup(warehouse: i64, store: i64) -> Fixture {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let product = db
            .catalog()
            .create_product(&NewProduct {
                name: "Desk Lamp".into(),
                cost: Money::from_cents(3000),
                price: Money::from_cents(5000),
                warehouse_stock: warehouse + store,
                restock_qty: 0,
            })
            .await
            .unwrap()
            .id;
        let store_id = db.catalog().get_or_create_store("Downtown").await.unwrap().id;
        if store > 0 {
            db.stock().move_warehouse_to_store(product, store_id, store).await.unwrap();
        }
        Fixture { db, product, store: store_id }
    }

    fn new_change(product_id: i64, action: ChangeAction) -> NewPendingChange {
        NewPendingChange {
            product_id,
            store_name: "Downtown".into(),
            action,
            new_cost: None,
            new_price: None,
            reason: String::new(),
            requested_by: "clerk".into(),
        }
    }

    async fn levels(f: &Fixture) -> (i64, i64) {
        let warehouse = f.db.catalog().get_product(f.product).await.unwrap().warehouse_stock;
        let store = f.db.catalog().store_stock(f.store, f.product).await.unwrap();
        (warehouse, store)
    }

    #[tokio::test]
    async fn test_return_workflow_end_to_end() {
        let f = setup(50, 20).await;
        let changes = f.db.changes();

        let first = changes
            .request(&new_change(f.product, ChangeAction::Return { qty: 5 }))
            .await
            .unwrap();
        assert_eq!(first.status, ChangeStatus::Pending);
        assert_eq!(levels(&f).await, (50, 20));

        let dup = changes
            .request(&new_change(f.product, ChangeAction::Return { qty: 5 }))
            .await
            .unwrap_err();
        assert!(matches!(
            dup.as_domain(),
            Some(CoreError::DuplicatePendingChange { existing_id, .. }) if *existing_id == first.id
        ));

        let approved = changes.approve(first.id, "manager").await.unwrap();
        assert_eq!(approved.status, ChangeStatus::Approved);
        assert_eq!(approved.reviewed_by.as_deref(), Some("manager"));
        assert!(approved.reviewed_at.is_some());
        assert_eq!(levels(&f).await, (55, 15));

        assert_eq!(changes.acknowledge_return(f.product, f.store).await.unwrap(), 1);
        assert_eq!(changes.get_change(first.id).await.unwrap().status, ChangeStatus::Completed);
        assert_eq!(changes.acknowledge_return(f.product, f.store).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_resolved_change_is_not_pending() {
        let f = setup(10, 0).await;
        let changes = f.db.changes();
        let change = changes
            .request(&new_change(f.product, ChangeAction::Add { qty: 4 }))
            .await
            .unwrap();
        changes.reject(change.id, "manager", "not now").await.unwrap();

        let err = changes.approve(change.id, "manager").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotPending);
        let err = changes.reject(change.id, "manager", "again").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotPending);

        let after = changes.get_change(change.id).await.unwrap();
        assert_eq!(after.status, ChangeStatus::Rejected);
        assert_eq!(after.review_note.as_deref(), Some("not now"));
        assert_eq!(levels(&f).await, (10, 0));
    }

    #[tokio::test]
    async fn test_approve_twice_fails_without_second_move() {
        let f = setup(10, 0).await;
        let changes = f.db.changes();
        let change = changes
            .request(&new_change(f.product, ChangeAction::Add { qty: 4 }))
            .await
            .unwrap();
        changes.approve(change.id, "manager").await.unwrap();
        assert_eq!(levels(&f).await, (6, 4));

        let err = changes.approve(change.id, "manager").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotPending);
        assert_eq!(levels(&f).await, (6, 4));
    }

    #[tokio::test]
    async fn test_request_validates_stock_by_action() {
        let f = setup(5, 2).await;
        let changes = f.db.changes();

        let err = changes
            .request(&new_change(f.product, ChangeAction::Add { qty: 6 }))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientWarehouseStock);

        let err = changes
            .request(&new_change(f.product, ChangeAction::Remove { qty: 3 }))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientStoreStock);

        let err = changes
            .request(&new_change(f.product, ChangeAction::Return { qty: 3 }))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientStoreStock);

        assert!(changes.list_changes(None, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_approval_rechecks_stock_and_stays_pending() {
        let f = setup(5, 0).await;
        let changes = f.db.changes();
        let change = changes
            .request(&new_change(f.product, ChangeAction::Add { qty: 5 }))
            .await
            .unwrap();

        // Warehouse drains between request and review.
        let other = f.db.catalog().get_or_create_store("Uptown").await.unwrap();
        f.db.stock().move_warehouse_to_store(f.product, other.id, 3).await.unwrap();

        let err = changes.approve(change.id, "manager").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientWarehouseStock);
        assert!(changes.get_change(change.id).await.unwrap().is_pending());
        assert_eq!(levels(&f).await, (2, 0));
    }

    #[tokio::test]
    async fn test_adjust_approval_updates_pricing() {
        let f = setup(10, 6).await;
        let changes = f.db.changes();
        let mut request = new_change(f.product, ChangeAction::Adjust { level: 2 });
        request.new_price = Some(Money::from_cents(5500));
        let change = changes.request(&request).await.unwrap();
        assert_eq!(change.change_type, ChangeType::Adjust);

        changes.approve(change.id, "manager").await.unwrap();
        assert_eq!(levels(&f).await, (10, 2));
        let product = f.db.catalog().get_product(f.product).await.unwrap();
        assert_eq!(product.price.cents(), 5500);
        assert_eq!(product.cost.cents(), 3000);
    }

    #[tokio::test]
    async fn test_list_changes_filters() {
        let f = setup(10, 5).await;
        let changes = f.db.changes();
        let a = changes
            .request(&new_change(f.product, ChangeAction::Remove { qty: 1 }))
            .await
            .unwrap();
        changes.approve(a.id, "manager").await.unwrap();
        changes
            .request(&new_change(f.product, ChangeAction::Add { qty: 1 }))
            .await
            .unwrap();

        assert_eq!(changes.list_changes(None, Some(f.store)).await.unwrap().len(), 2);
        let pending = changes.list_changes(Some(ChangeStatus::Pending), None).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].change_type, ChangeType::Add);
    }
}
