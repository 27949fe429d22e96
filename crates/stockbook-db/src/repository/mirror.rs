//! # Local Mirror
//!
//! Last pulled server state, stored as JSON documents keyed by kind.
//!
//! The mirror is a read cache: a pull overwrites it wholesale, and an
//! offline sale only nudges the mirrored store stock so the till doesn't
//! oversell. Sales the server hasn't acknowledged are deducted again after
//! every pull. It is never the source of truth for
//! unacknowledged writes; the sync queue is.
//!
//! ```text
//! mirror_entities
//! ┌────────────────┬──────────┬──────────────────────────────┬───────────┐
//! │ kind           │ key      │ payload                      │ pulled_at │
//! ├────────────────┼──────────┼──────────────────────────────┼───────────┤
//! │ product        │ 7        │ {"id":7,"name":"Lamp",...}   │ ...       │
//! │ store          │ 2        │ {"id":2,"name":"Downtown"}   │ ...       │
//! │ inventory      │ 2:7      │ {"store_id":2,"stock":14,..} │ ...       │
//! │ transaction    │ 10042    │ {...}                        │ ...       │
//! └────────────────┴──────────┴──────────────────────────────┴───────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info, instrument};

use crate::error::DbResult;
use crate::repository::local_tx::reapply_unsynced_in;
use stockbook_core::sync::{MirrorKind, ServerSnapshot};
use stockbook_core::{
    Inventory, InventoryAddition, PendingInventoryChange, Product, StockTransfer, Store,
    Transaction,
};

fn inventory_key(store_id: i64, product_id: i64) -> String {
    format!("{store_id}:{product_id}")
}

/// Repository for the client's mirror of server state.
#[derive(Debug, Clone)]
pub struct MirrorRepository {
    pool: SqlitePool,
}

impl MirrorRepository {
    pub fn new(pool: SqlitePool) -> Self {
        MirrorRepository { pool }
    }

    /// Replaces every kind with the snapshot's contents, then re-deducts
    /// unsynced local sales, in one transaction.
    #[instrument(skip(self, snapshot))]
    pub async fn replace_all(&self, snapshot: &ServerSnapshot) -> DbResult<()> {
        let pulled_at = Utc::now();
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM mirror_entities")
            .execute(&mut *tx)
            .await?;

        for p in &snapshot.products {
            put_in(&mut tx, MirrorKind::Product, &p.id.to_string(), p, pulled_at).await?;
        }
        for s in &snapshot.stores {
            put_in(&mut tx, MirrorKind::Store, &s.id.to_string(), s, pulled_at).await?;
        }
        for i in &snapshot.inventories {
            put_in(&mut tx, MirrorKind::Inventory, &inventory_key(i.store_id, i.product_id), i, pulled_at).await?;
        }
        for c in &snapshot.pending_changes {
            put_in(&mut tx, MirrorKind::PendingChange, &c.id.to_string(), c, pulled_at).await?;
        }
        for t in &snapshot.transfers {
            put_in(&mut tx, MirrorKind::Transfer, &t.transfer_id.to_string(), t, pulled_at).await?;
        }
        for a in &snapshot.additions {
            put_in(&mut tx, MirrorKind::Addition, &a.addition_id.to_string(), a, pulled_at).await?;
        }
        for t in &snapshot.recent_transactions {
            put_in(&mut tx, MirrorKind::Transaction, &t.transaction_id.to_string(), t, pulled_at).await?;
        }
        let rows = snapshot.products.len()
            + snapshot.stores.len()
            + snapshot.inventories.len()
            + snapshot.pending_changes.len()
            + snapshot.transfers.len()
            + snapshot.additions.len()
            + snapshot.recent_transactions.len();
        let reapplied = reapply_unsynced_in(&mut tx).await?;

        tx.commit().await?;
        info!(rows, reapplied, "Mirror replaced");
        Ok(())
    }

    pub async fn products(&self) -> DbResult<Vec<Product>> {
        self.load(MirrorKind::Product).await
    }

    pub async fn stores(&self) -> DbResult<Vec<Store>> {
        self.load(MirrorKind::Store).await
    }

    pub async fn inventories(&self) -> DbResult<Vec<Inventory>> {
        self.load(MirrorKind::Inventory).await
    }

    pub async fn pending_changes(&self) -> DbResult<Vec<PendingInventoryChange>> {
        self.load(MirrorKind::PendingChange).await
    }

    pub async fn transfers(&self) -> DbResult<Vec<StockTransfer>> {
        self.load(MirrorKind::Transfer).await
    }

    pub async fn additions(&self) -> DbResult<Vec<InventoryAddition>> {
        self.load(MirrorKind::Addition).await
    }

    pub async fn transactions(&self) -> DbResult<Vec<Transaction>> {
        self.load(MirrorKind::Transaction).await
    }

    pub async fn find_product(&self, product_id: i64) -> DbResult<Option<Product>> {
        let mut conn = self.pool.acquire().await?;
        product_in(&mut conn, product_id).await
    }

    pub async fn find_store(&self, name: &str) -> DbResult<Option<Store>> {
        let mut conn = self.pool.acquire().await?;
        store_by_name_in(&mut conn, name).await
    }

    /// Mirrored stock for a store (by name) and product; 0 when unknown.
    pub async fn inventory_level(&self, store_name: &str, product_id: i64) -> DbResult<i64> {
        let mut conn = self.pool.acquire().await?;
        let Some(store) = store_by_name_in(&mut conn, store_name).await? else {
            return Ok(0);
        };
        inventory_level_in(&mut conn, store.id, product_id).await
    }

    /// When the mirror was last replaced.
    pub async fn last_pulled_at(&self) -> DbResult<Option<DateTime<Utc>>> {
        Ok(sqlx::query_scalar("SELECT MAX(pulled_at) FROM mirror_entities")
            .fetch_one(&self.pool)
            .await?)
    }

    async fn load<T: DeserializeOwned>(&self, kind: MirrorKind) -> DbResult<Vec<T>> {
        let payloads: Vec<String> = sqlx::query_scalar(
            "SELECT payload FROM mirror_entities WHERE kind = ?1 ORDER BY CAST(key AS INTEGER), key",
        )
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await?;
        payloads
            .iter()
            .map(|p| serde_json::from_str(p).map_err(Into::into))
            .collect()
    }
}

// =============================================================================
// In-transaction helpers
// =============================================================================

async fn put_in<T: Serialize>(
    conn: &mut SqliteConnection,
    kind: MirrorKind,
    key: &str,
    value: &T,
    pulled_at: DateTime<Utc>,
) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO mirror_entities (kind, key, payload, pulled_at) VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT(kind, key) DO UPDATE SET payload = excluded.payload, pulled_at = excluded.pulled_at
        "#,
    )
    .bind(kind.as_str())
    .bind(key)
    .bind(serde_json::to_string(value)?)
    .bind(pulled_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn get_in<T: DeserializeOwned>(
    conn: &mut SqliteConnection,
    kind: MirrorKind,
    key: &str,
) -> DbResult<Option<T>> {
    let payload: Option<String> =
        sqlx::query_scalar("SELECT payload FROM mirror_entities WHERE kind = ?1 AND key = ?2")
            .bind(kind.as_str())
            .bind(key)
            .fetch_optional(&mut *conn)
            .await?;
    payload
        .map(|p| serde_json::from_str(&p))
        .transpose()
        .map_err(Into::into)
}

pub(crate) async fn product_in(
    conn: &mut SqliteConnection,
    product_id: i64,
) -> DbResult<Option<Product>> {
    get_in(conn, MirrorKind::Product, &product_id.to_string()).await
}

/// Case-insensitive, like the server's store key.
pub(crate) async fn store_by_name_in(
    conn: &mut SqliteConnection,
    name: &str,
) -> DbResult<Option<Store>> {
    let payload: Option<String> = sqlx::query_scalar(
        r#"
        SELECT payload FROM mirror_entities
        WHERE kind = ?1 AND json_extract(payload, '$.name') = ?2 COLLATE NOCASE
        "#,
    )
    .bind(MirrorKind::Store.as_str())
    .bind(name.trim())
    .fetch_optional(&mut *conn)
    .await?;
    payload
        .map(|p| serde_json::from_str(&p))
        .transpose()
        .map_err(Into::into)
}

pub(crate) async fn inventory_level_in(
    conn: &mut SqliteConnection,
    store_id: i64,
    product_id: i64,
) -> DbResult<i64> {
    let inventory: Option<Inventory> =
        get_in(conn, MirrorKind::Inventory, &inventory_key(store_id, product_id)).await?;
    Ok(inventory.map_or(0, |i| i.stock))
}

/// Conditional decrement of mirrored store stock. `Ok(Err(available))` when
/// the mirror doesn't hold enough.
pub(crate) async fn decrement_inventory_in(
    conn: &mut SqliteConnection,
    store_id: i64,
    product_id: i64,
    qty: i64,
) -> DbResult<Result<(), i64>> {
    let affected = sqlx::query(
        r#"
        UPDATE mirror_entities
        SET payload = json_set(payload, '$.stock', json_extract(payload, '$.stock') - ?1)
        WHERE kind = ?2 AND key = ?3 AND json_extract(payload, '$.stock') >= ?1
        "#,
    )
    .bind(qty)
    .bind(MirrorKind::Inventory.as_str())
    .bind(inventory_key(store_id, product_id))
    .execute(&mut *conn)
    .await?
    .rows_affected();

    if affected == 1 {
        debug!(store_id, product_id, qty, "Mirrored stock decremented");
        return Ok(Ok(()));
    }
    Ok(Err(inventory_level_in(conn, store_id, product_id).await?))
}

/// Highest transaction id the mirror has seen, if any.
pub(crate) async fn max_transaction_id_in(conn: &mut SqliteConnection) -> DbResult<Option<i64>> {
    Ok(sqlx::query_scalar(
        "SELECT MAX(CAST(key AS INTEGER)) FROM mirror_entities WHERE kind = ?1",
    )
    .bind(MirrorKind::Transaction.as_str())
    .fetch_one(&mut *conn)
    .await?)
}

// =============================================================================
// Unit Tests
// =============================================================================
