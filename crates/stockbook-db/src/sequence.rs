//! # Sequence Allocation
//!
//! Business identifiers that must be strictly increasing with no duplicates.
//!
//! ## Allocation Under Concurrency
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Writer A                          Writer B                             │
//! │  ────────                          ────────                             │
//! │  BEGIN                             BEGIN                                │
//! │  next_value() → MAX+1 = 10005      next_value() → MAX+1 = 10005         │
//! │  INSERT 10005 ... COMMIT ✓         INSERT 10005 → UNIQUE / BUSY ✗       │
//! │                                    ROLLBACK (tx dropped)                │
//! │                                    with_sequence_retry: attempt 2       │
//! │                                    next_value() → 10006 ✓               │
//! │                                                                         │
//! │  The allocation and the dependent write share one transaction; the     │
//! │  unique column is the arbiter. After MAX_SEQUENCE_ATTEMPTS the caller  │
//! │  gets SequenceAllocationConflict.                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use sqlx::SqliteConnection;
use std::future::Future;
use tracing::warn;

use crate::error::{DbError, DbResult};
use stockbook_core::numbering::{
    FIRST_ADDITION_ID, FIRST_ENTRY_SEQ, FIRST_TRANSACTION_ID, FIRST_TRANSFER_ID,
};
use stockbook_core::{CoreError, MAX_SEQUENCE_ATTEMPTS};

/// A server-side counter backed by the max of a unique column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sequence {
    JournalEntry,
    Transaction,
    Transfer,
    Addition,
}

impl Sequence {
    pub fn name(&self) -> &'static str {
        match self {
            Sequence::JournalEntry => "entry number",
            Sequence::Transaction => "transaction id",
            Sequence::Transfer => "transfer id",
            Sequence::Addition => "addition id",
        }
    }

    fn table(&self) -> &'static str {
        match self {
            Sequence::JournalEntry => "journal_entries",
            Sequence::Transaction => "transactions",
            Sequence::Transfer => "stock_transfers",
            Sequence::Addition => "inventory_additions",
        }
    }

    fn column(&self) -> &'static str {
        match self {
            Sequence::JournalEntry => "entry_seq",
            Sequence::Transaction => "transaction_id",
            Sequence::Transfer => "transfer_id",
            Sequence::Addition => "addition_id",
        }
    }

    pub fn start(&self) -> i64 {
        match self {
            Sequence::JournalEntry => FIRST_ENTRY_SEQ,
            Sequence::Transaction => FIRST_TRANSACTION_ID,
            Sequence::Transfer => FIRST_TRANSFER_ID,
            Sequence::Addition => FIRST_ADDITION_ID,
        }
    }

    /// Unique columns whose violation means "someone else took this value".
    fn guarded_columns(&self) -> &'static [&'static str] {
        match self {
            Sequence::JournalEntry => &["journal_entries.entry_seq", "journal_entries.entry_number"],
            Sequence::Transaction => &["transactions.transaction_id"],
            Sequence::Transfer => &["stock_transfers.transfer_id"],
            // The monthly reference is derived in the same unit, so it races too.
            Sequence::Addition => &["inventory_additions.addition_id", "inventory_additions.reference"],
        }
    }

    /// Reads the next value inside the caller's transaction.
    pub async fn next_value(&self, conn: &mut SqliteConnection) -> DbResult<i64> {
        let sql = format!(
            "SELECT COALESCE(MAX({col}), ?1 - 1) + 1 FROM {table}",
            col = self.column(),
            table = self.table()
        );
        let next: i64 = sqlx::query_scalar(&sql)
            .bind(self.start())
            .fetch_one(&mut *conn)
            .await?;
        Ok(next.max(self.start()))
    }
}

impl DbError {
    /// True for failures that a fresh attempt at the same unit may avoid.
    pub fn is_sequence_conflict(&self, sequence: Sequence) -> bool {
        match self {
            DbError::Busy(_) => true,
            DbError::UniqueViolation { field, .. } => sequence
                .guarded_columns()
                .iter()
                .any(|col| field.contains(col)),
            _ => false,
        }
    }
}

/// Re-runs an atomic unit that allocates from `sequence` until it commits.
///
/// `op` must open and commit its own transaction so every attempt reads a
/// fresh maximum.
pub async fn with_sequence_retry<T, F, Fut>(sequence: Sequence, op: F) -> DbResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = DbResult<T>>,
{
    with_sequences_retry(&[sequence], op).await
}

/// [`with_sequence_retry`] for units that allocate from several sequences,
/// e.g. a sale that takes a transaction id and two entry numbers.
pub async fn with_sequences_retry<T, F, Fut>(sequences: &[Sequence], mut op: F) -> DbResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = DbResult<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        let err = match op().await {
            Err(err) => err,
            ok => return ok,
        };
        let Some(sequence) = sequences.iter().find(|s| err.is_sequence_conflict(**s)) else {
            return Err(err);
        };
        if attempt >= MAX_SEQUENCE_ATTEMPTS {
            warn!(sequence = sequence.name(), attempts = attempt, error = %err, "Sequence allocation gave up");
            return Err(CoreError::SequenceAllocationConflict {
                sequence: sequence.name().to_string(),
                attempts: attempt,
            }
            .into());
        }
        warn!(sequence = sequence.name(), attempt, error = %err, "Sequence collision, retrying");
        tokio::task::yield_now().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_next_value_starts_at_sequence_start() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut conn = db.pool().acquire().await.unwrap();
        assert_eq!(Sequence::Transaction.next_value(&mut conn).await.unwrap(), 10001);
        assert_eq!(Sequence::Transfer.next_value(&mut conn).await.unwrap(), 1);
        assert_eq!(Sequence::Addition.next_value(&mut conn).await.unwrap(), 1001);
        assert_eq!(Sequence::JournalEntry.next_value(&mut conn).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_collision() {
        let calls = &AtomicU32::new(0);
        let result = with_sequence_retry(Sequence::Transfer, move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(DbError::duplicate("stock_transfers.transfer_id", "1"))
            } else {
                Ok(7)
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_with_sequence_conflict() {
        let calls = &AtomicU32::new(0);
        let err = with_sequence_retry(Sequence::Transaction, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(DbError::Busy("database is locked".into()))
        })
        .await
        .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), MAX_SEQUENCE_ATTEMPTS);
        assert!(matches!(
            err,
            DbError::Domain(CoreError::SequenceAllocationConflict { attempts: 5, .. })
        ));
    }

    #[tokio::test]
    async fn test_unrelated_unique_violation_not_retried() {
        let calls = &AtomicU32::new(0);
        let err = with_sequence_retry(Sequence::Transaction, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(DbError::duplicate("products.name", "Cola"))
        })
        .await
        .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(err.is_unique_on("products.name"));
    }

    #[tokio::test]
    async fn test_multi_sequence_retry_reports_colliding_sequence() {
        let err = with_sequences_retry(
            &[Sequence::Transaction, Sequence::JournalEntry],
            || async { Err::<(), _>(DbError::duplicate("journal_entries.entry_number", "JE000001")) },
        )
        .await
        .unwrap_err();
        match err {
            DbError::Domain(CoreError::SequenceAllocationConflict { sequence, .. }) => {
                assert_eq!(sequence, "entry number");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
