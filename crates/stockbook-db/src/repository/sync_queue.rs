//! # Sync Queue Repository
//!
//! The client's durable FIFO of intents the server hasn't acknowledged.
//!
//! ## Queue Discipline
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                  LOCAL OPERATION (offline checkout, ...)                │
//! │  ┌───────────────────────────────────────────────────────────────────┐  │
//! │  │                   SINGLE TRANSACTION                              │  │
//! │  │  1. local state write (local_transactions, mirror)               │  │
//! │  │  2. INSERT INTO sync_queue (id, table_name, action, data, ...)   │  │
//! │  └───────────────────────────────────────────────────────────────────┘  │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  DRAINER (one item at a time, ORDER BY seq)                             │
//! │    ✓ acknowledged        → DELETE                                       │
//! │    ✗ unreachable/busy    → state = retrying, stop this cycle           │
//! │    ✗ business rule       → state = needs_attention, skip, keep going    │
//! │                                                                         │
//! │  Never reordered, never deduplicated. Only an ack or an operator        │
//! │  discard removes a row.                                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use stockbook_core::sync::{QueueCounts, QueueItemState, SyncIntent, SyncQueueItem};

const ITEM_COLUMNS: &str =
    "id, seq, table_name, action, data, timestamp, attempts, state, last_error, attempted_at";

/// Repository for the sync queue.
#[derive(Debug, Clone)]
pub struct SyncQueueRepository {
    pool: SqlitePool,
}

impl SyncQueueRepository {
    pub fn new(pool: SqlitePool) -> Self {
        SyncQueueRepository { pool }
    }

    /// Appends an intent on its own.
    pub async fn enqueue(&self, intent: &SyncIntent) -> DbResult<SyncQueueItem> {
        let mut conn = self.pool.acquire().await?;
        enqueue_in(&mut conn, intent).await
    }

    /// Oldest drainable items (pending or retrying) positioned after
    /// `after_seq`, in enqueue order. Pass 0 to start at the head.
    pub async fn next_batch(&self, after_seq: i64, limit: u32) -> DbResult<Vec<SyncQueueItem>> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM sync_queue
             WHERE state IN ('pending', 'retrying') AND seq > ?1
             ORDER BY seq
             LIMIT ?2"
        );
        Ok(sqlx::query_as::<_, SyncQueueItem>(&sql)
            .bind(after_seq)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?)
    }

    /// Every item, any state, in enqueue order.
    pub async fn list(&self) -> DbResult<Vec<SyncQueueItem>> {
        let sql = format!("SELECT {ITEM_COLUMNS} FROM sync_queue ORDER BY seq");
        Ok(sqlx::query_as::<_, SyncQueueItem>(&sql)
            .fetch_all(&self.pool)
            .await?)
    }

    pub async fn get(&self, id: &str) -> DbResult<SyncQueueItem> {
        let sql = format!("SELECT {ITEM_COLUMNS} FROM sync_queue WHERE id = ?1");
        sqlx::query_as::<_, SyncQueueItem>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::not_found("SyncQueueItem", id))
    }

    /// Server acknowledged the item; it leaves the queue.
    pub async fn mark_done(&self, id: &str) -> DbResult<()> {
        sqlx::query("DELETE FROM sync_queue WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        debug!(id = %id, "Queue item acknowledged");
        Ok(())
    }

    /// Transient failure: try again next cycle.
    pub async fn mark_retrying(&self, id: &str, error: &str) -> DbResult<()> {
        self.record_failure(id, QueueItemState::Retrying, error).await
    }

    /// Business-rule rejection or bad payload: park until an operator acts.
    pub async fn mark_needs_attention(&self, id: &str, error: &str) -> DbResult<()> {
        warn!(id = %id, error = %error, "Queue item needs attention");
        self.record_failure(id, QueueItemState::NeedsAttention, error).await
    }

    async fn record_failure(&self, id: &str, state: QueueItemState, error: &str) -> DbResult<()> {
        let affected = sqlx::query(
            r#"
            UPDATE sync_queue
            SET state = ?1, attempts = attempts + 1, last_error = ?2, attempted_at = ?3
            WHERE id = ?4
            "#,
        )
        .bind(state)
        .bind(error)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if affected == 0 {
            return Err(DbError::not_found("SyncQueueItem", id));
        }
        Ok(())
    }

    /// Puts a parked item back in line. Its position (`seq`) is unchanged.
    #[instrument(skip(self))]
    pub async fn retry_item(&self, id: &str) -> DbResult<SyncQueueItem> {
        let affected = sqlx::query("UPDATE sync_queue SET state = ?1 WHERE id = ?2")
            .bind(QueueItemState::Pending)
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if affected == 0 {
            return Err(DbError::not_found("SyncQueueItem", id));
        }
        info!(id = %id, "Queue item re-queued by operator");
        self.get(id).await
    }

    /// Drops an item the operator decided will never apply.
    #[instrument(skip(self))]
    pub async fn discard_item(&self, id: &str) -> DbResult<()> {
        let affected = sqlx::query("DELETE FROM sync_queue WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if affected == 0 {
            return Err(DbError::not_found("SyncQueueItem", id));
        }
        warn!(id = %id, "Queue item discarded by operator");
        Ok(())
    }

    pub async fn counts(&self) -> DbResult<QueueCounts> {
        let rows: Vec<(QueueItemState, i64)> =
            sqlx::query_as("SELECT state, COUNT(*) FROM sync_queue GROUP BY state")
                .fetch_all(&self.pool)
                .await?;

        let mut counts = QueueCounts::default();
        for (state, n) in rows {
            match state {
                QueueItemState::Pending => counts.pending = n,
                QueueItemState::Retrying => counts.retrying = n,
                QueueItemState::NeedsAttention => counts.needs_attention = n,
            }
        }
        Ok(counts)
    }
}

/// Appends inside the caller's transaction so the local write and its
/// queue entry commit together.
pub(crate) async fn enqueue_in(
    conn: &mut SqliteConnection,
    intent: &SyncIntent,
) -> DbResult<SyncQueueItem> {
    let id = Uuid::new_v4().to_string();
    let data = serde_json::to_string(intent)?;
    let timestamp = Utc::now();
    let table = intent.table();

    let seq = sqlx::query(
        r#"
        INSERT INTO sync_queue (id, table_name, action, data, timestamp, attempts, state)
        VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)
        "#,
    )
    .bind(&id)
    .bind(table.as_str())
    .bind(intent.action())
    .bind(&data)
    .bind(timestamp)
    .bind(QueueItemState::Pending)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    debug!(id = %id, seq, table = %table, action = intent.action(), "Intent queued");

    Ok(SyncQueueItem {
        id,
        seq,
        table_name: table.as_str().to_string(),
        action: intent.action().to_string(),
        data,
        timestamp,
        attempts: 0,
        state: QueueItemState::Pending,
        last_error: None,
        attempted_at: None,
    })
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};

    async fn setup() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    fn confirm(transfer_id: i64) -> SyncIntent {
        SyncIntent::ConfirmTransfer {
            transfer_id,
            confirmed_by: "mgr".into(),
        }
    }

    #[tokio::test]
    async fn test_enqueue_records_table_and_action() {
        let db = setup().await;
        let item = db.sync_queue().enqueue(&confirm(4)).await.unwrap();
        assert_eq!(item.table_name, "stock_transfers");
        assert_eq!(item.action, "confirm");
        assert_eq!(item.intent().unwrap(), confirm(4));

        let stored = db.sync_queue().get(&item.id).await.unwrap();
        assert_eq!(stored.seq, item.seq);
        assert_eq!(stored.state, QueueItemState::Pending);
    }

    #[tokio::test]
    async fn test_batches_are_fifo_and_ack_removes() {
        let db = setup().await;
        let queue = db.sync_queue();
        let a = queue.enqueue(&confirm(1)).await.unwrap();
        let b = queue.enqueue(&confirm(2)).await.unwrap();
        let c = queue.enqueue(&confirm(3)).await.unwrap();

        let batch = queue.next_batch(0, 10).await.unwrap();
        let ids: Vec<_> = batch.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec![a.id.as_str(), b.id.as_str(), c.id.as_str()]);

        queue.mark_done(&a.id).await.unwrap();
        let batch = queue.next_batch(0, 1).await.unwrap();
        assert_eq!(batch[0].id, b.id);
        let rest = queue.next_batch(b.seq, 10).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].id, c.id);
    }

    #[tokio::test]
    async fn test_parked_items_are_skipped_until_retried() {
        let db = setup().await;
        let queue = db.sync_queue();
        let a = queue.enqueue(&confirm(1)).await.unwrap();
        let b = queue.enqueue(&confirm(2)).await.unwrap();

        queue.mark_needs_attention(&a.id, "NotPending").await.unwrap();
        queue.mark_retrying(&b.id, "unreachable").await.unwrap();

        let batch = queue.next_batch(0, 10).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].id, b.id);
        assert_eq!(batch[0].attempts, 1);

        let counts = queue.counts().await.unwrap();
        assert_eq!((counts.pending, counts.retrying, counts.needs_attention), (0, 1, 1));

        let retried = queue.retry_item(&a.id).await.unwrap();
        assert_eq!(retried.state, QueueItemState::Pending);
        assert_eq!(retried.last_error.as_deref(), Some("NotPending"));
        // Back at its original position.
        assert_eq!(queue.next_batch(0, 10).await.unwrap()[0].id, a.id);
    }

    #[tokio::test]
    async fn test_discard_and_unknown_ids() {
        let db = setup().await;
        let queue = db.sync_queue();
        let a = queue.enqueue(&confirm(1)).await.unwrap();
        queue.discard_item(&a.id).await.unwrap();
        assert_eq!(queue.counts().await.unwrap().total(), 0);

        assert!(matches!(queue.discard_item(&a.id).await, Err(DbError::NotFound { .. })));
        assert!(matches!(queue.retry_item("nope").await, Err(DbError::NotFound { .. })));
        assert!(matches!(queue.mark_retrying("nope", "x").await, Err(DbError::NotFound { .. })));
    }
}
