//! # Ledger Engine
//!
//! Accounts and journal posting.
//!
//! ## Posting Is One Unit
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                   SINGLE TRANSACTION                                    │
//! │                                                                         │
//! │  1. validate: Σdebit == Σcredit, one side per line                     │
//! │  2. entry_seq = MAX(entry_seq) + 1        → entry_number JE000042       │
//! │  3. INSERT journal_entries                                              │
//! │  4. INSERT journal_lines (one per line)                                 │
//! │  5. UPDATE accounts SET balance = balance + delta  (per line)           │
//! │                                                                         │
//! │  COMMIT ← all or nothing. Entries/lines are immutable afterwards        │
//! │           (triggers reject UPDATE/DELETE).                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info, instrument, warn};
use ts_rs::TS;

use crate::error::{DbError, DbResult};
use crate::sequence::{with_sequence_retry, Sequence};
use stockbook_core::ledger::{
    format_entry_number, next_account_code, AccountSpec, NewJournalEntry, StandardAccount,
};
use stockbook_core::reports::AccountActivity;
use stockbook_core::{Account, DateRange, JournalEntry, JournalLine, Money};

pub(crate) const ACCOUNT_COLUMNS: &str =
    "id, code, name, account_type, sub_type, balance, main_account_id, category_id";

const ENTRY_COLUMNS: &str = "id, entry_number, entry_date, description, source, created_at";

/// An account whose cached balance disagrees with its journal lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct BalanceMismatch {
    pub code: String,
    pub name: String,
    pub cached: Money,
    pub computed: Money,
}

#[derive(sqlx::FromRow)]
struct ActivityRow {
    #[sqlx(flatten)]
    account: Account,
    debit_sum: Money,
    credit_sum: Money,
}

/// Repository for accounts and journal entries.
#[derive(Debug, Clone)]
pub struct LedgerRepository {
    pool: SqlitePool,
}

impl LedgerRepository {
    pub fn new(pool: SqlitePool) -> Self {
        LedgerRepository { pool }
    }

    /// Posts a balanced entry and applies every line's balance delta.
    ///
    /// ## Errors
    /// - `UnbalancedEntry` / `Validation` before anything is written
    /// - `NotFound` for an unknown account id
    /// - `SequenceAllocationConflict` if the entry number kept colliding
    #[instrument(skip(self, entry), fields(description = %entry.description))]
    pub async fn post_entry(&self, entry: &NewJournalEntry) -> DbResult<JournalEntry> {
        entry.validate()?;
        with_sequence_retry(Sequence::JournalEntry, move || async move {
            let mut tx = self.pool.begin().await?;
            let posted = post_entry_in(&mut tx, entry).await?;
            tx.commit().await?;
            Ok(posted)
        })
        .await
    }

    /// Finds an account by code (or by name when no code is given), creating
    /// it in the type's code block if missing.
    #[instrument(skip(self))]
    pub async fn resolve_or_create_account(&self, spec: &AccountSpec) -> DbResult<Account> {
        let mut tx = self.pool.begin().await?;
        let account = resolve_account_in(&mut tx, spec).await?;
        tx.commit().await?;
        Ok(account)
    }

    pub async fn get_account(&self, code: &str) -> DbResult<Account> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE code = ?1");
        sqlx::query_as::<_, Account>(&sql)
            .bind(code)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::not_found("Account", code))
    }

    pub async fn list_accounts(&self) -> DbResult<Vec<Account>> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts ORDER BY code");
        Ok(sqlx::query_as::<_, Account>(&sql)
            .fetch_all(&self.pool)
            .await?)
    }

    /// Loads an entry and its lines by `JE######` number.
    pub async fn get_entry(&self, entry_number: &str) -> DbResult<JournalEntry> {
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM journal_entries WHERE entry_number = ?1");
        let mut entry = sqlx::query_as::<_, JournalEntry>(&sql)
            .bind(entry_number)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::not_found("JournalEntry", entry_number))?;
        entry.lines = self.lines_for(entry.id).await?;
        Ok(entry)
    }

    /// Entries whose date falls in `range`, oldest first.
    pub async fn list_entries(&self, range: DateRange) -> DbResult<Vec<JournalEntry>> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM journal_entries
             WHERE (?1 IS NULL OR entry_date >= ?1) AND (?2 IS NULL OR entry_date <= ?2)
             ORDER BY entry_seq"
        );
        let mut entries = sqlx::query_as::<_, JournalEntry>(&sql)
            .bind(range.from)
            .bind(range.to)
            .fetch_all(&self.pool)
            .await?;
        for entry in &mut entries {
            entry.lines = self.lines_for(entry.id).await?;
        }
        Ok(entries)
    }

    /// Entries tagged with `source`, e.g. `sale:10001`.
    pub async fn entries_for_source(&self, source: &str) -> DbResult<Vec<JournalEntry>> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM journal_entries WHERE source = ?1 ORDER BY entry_seq"
        );
        let mut entries = sqlx::query_as::<_, JournalEntry>(&sql)
            .bind(source)
            .fetch_all(&self.pool)
            .await?;
        for entry in &mut entries {
            entry.lines = self.lines_for(entry.id).await?;
        }
        Ok(entries)
    }

    async fn lines_for(&self, entry_id: i64) -> DbResult<Vec<JournalLine>> {
        Ok(sqlx::query_as::<_, JournalLine>(
            "SELECT entry_id, line_no, account_id, debit, credit, description
             FROM journal_lines WHERE entry_id = ?1 ORDER BY line_no",
        )
        .bind(entry_id)
        .fetch_all(&self.pool)
        .await?)
    }

    /// Recomputes every balance from lines and reports the accounts that
    /// disagree with the cached value. Empty means the ledger reconciles.
    pub async fn verify_balances(&self) -> DbResult<Vec<BalanceMismatch>> {
        let activity = account_activity(&self.pool, DateRange::all_time()).await?;
        let mismatches: Vec<BalanceMismatch> = activity
            .into_iter()
            .filter_map(|a| {
                let computed = a.net();
                (computed != a.account.balance).then(|| BalanceMismatch {
                    code: a.account.code.clone(),
                    name: a.account.name.clone(),
                    cached: a.account.balance,
                    computed,
                })
            })
            .collect();
        if !mismatches.is_empty() {
            warn!(count = mismatches.len(), "Account balances out of step with journal lines");
        }
        Ok(mismatches)
    }
}

// =============================================================================
// In-transaction helpers
// =============================================================================

/// Posts inside the caller's transaction. The caller owns retry.
pub(crate) async fn post_entry_in(
    conn: &mut SqliteConnection,
    entry: &NewJournalEntry,
) -> DbResult<JournalEntry> {
    entry.validate()?;

    let mut deltas = Vec::with_capacity(entry.lines.len());
    for line in &entry.lines {
        let account = account_by_id_in(conn, line.account_id).await?;
        deltas.push(account.account_type.balance_delta(line.debit, line.credit));
    }

    let seq = Sequence::JournalEntry.next_value(conn).await?;
    let entry_number = format_entry_number(seq);
    let created_at = Utc::now();

    let entry_id = sqlx::query(
        "INSERT INTO journal_entries (entry_seq, entry_number, entry_date, description, source, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )
    .bind(seq)
    .bind(&entry_number)
    .bind(entry.date)
    .bind(&entry.description)
    .bind(&entry.source)
    .bind(created_at)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    let mut lines = Vec::with_capacity(entry.lines.len());
    for (idx, (line, delta)) in entry.lines.iter().zip(deltas).enumerate() {
        let line_no = idx as i64 + 1;
        sqlx::query(
            "INSERT INTO journal_lines (entry_id, line_no, account_id, debit, credit, description)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(entry_id)
        .bind(line_no)
        .bind(line.account_id)
        .bind(line.debit)
        .bind(line.credit)
        .bind(&line.description)
        .execute(&mut *conn)
        .await?;

        sqlx::query("UPDATE accounts SET balance = balance + ?1 WHERE id = ?2")
            .bind(delta)
            .bind(line.account_id)
            .execute(&mut *conn)
            .await?;

        lines.push(JournalLine {
            entry_id,
            line_no,
            account_id: line.account_id,
            debit: line.debit,
            credit: line.credit,
            description: line.description.clone(),
        });
    }

    info!(entry_number = %entry_number, lines = lines.len(), "Journal entry posted");

    Ok(JournalEntry {
        id: entry_id,
        entry_number,
        entry_date: entry.date,
        description: entry.description.clone(),
        source: entry.source.clone(),
        created_at,
        lines,
    })
}

async fn account_by_id_in(conn: &mut SqliteConnection, id: i64) -> DbResult<Account> {
    let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?1");
    sqlx::query_as::<_, Account>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| DbError::not_found("Account", id))
}

async fn account_by_key_in(
    conn: &mut SqliteConnection,
    column: &str,
    value: &str,
) -> DbResult<Option<Account>> {
    let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE {column} = ?1");
    Ok(sqlx::query_as::<_, Account>(&sql)
        .bind(value)
        .fetch_optional(&mut *conn)
        .await?)
}

/// Get-or-insert keyed by code (or name). An existing account with the same
/// name is reused even when a different code was asked for.
pub(crate) async fn resolve_account_in(
    conn: &mut SqliteConnection,
    spec: &AccountSpec,
) -> DbResult<Account> {
    spec.validate()?;

    let existing = match &spec.code {
        Some(code) => account_by_key_in(conn, "code", code).await?,
        None => account_by_key_in(conn, "name", &spec.name).await?,
    };
    if let Some(account) = existing {
        return Ok(account);
    }

    let code = match &spec.code {
        Some(code) => code.clone(),
        None => {
            let prefix = spec.account_type.code_prefix().to_string();
            let used: Vec<String> =
                sqlx::query_scalar("SELECT code FROM accounts WHERE substr(code, 1, 1) = ?1")
                    .bind(&prefix)
                    .fetch_all(&mut *conn)
                    .await?;
            next_account_code(spec.account_type, used.iter().map(String::as_str))?
        }
    };

    let inserted = sqlx::query(
        "INSERT INTO accounts (code, name, account_type, sub_type) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT DO NOTHING",
    )
    .bind(&code)
    .bind(spec.name.trim())
    .bind(spec.account_type)
    .bind(&spec.sub_type)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    if inserted == 1 {
        info!(code = %code, name = %spec.name, account_type = %spec.account_type, "Account created");
    } else {
        debug!(code = %code, name = %spec.name, "Account appeared concurrently, reusing");
    }

    if let Some(account) = account_by_key_in(conn, "code", &code).await? {
        if account.name.eq_ignore_ascii_case(spec.name.trim()) || spec.code.is_some() {
            return Ok(account);
        }
    }
    account_by_key_in(conn, "name", spec.name.trim())
        .await?
        .ok_or_else(|| DbError::duplicate("accounts.code", code))
}

pub(crate) async fn standard_account_in(
    conn: &mut SqliteConnection,
    which: StandardAccount,
) -> DbResult<Account> {
    resolve_account_in(conn, &which.spec()).await
}

/// Σdebit/Σcredit per account over `range`, every account included.
pub(crate) async fn account_activity(
    pool: &SqlitePool,
    range: DateRange,
) -> DbResult<Vec<AccountActivity>> {
    let rows = sqlx::query_as::<_, ActivityRow>(
        "SELECT a.id, a.code, a.name, a.account_type, a.sub_type, a.balance,
                a.main_account_id, a.category_id,
                COALESCE(s.debit_sum, 0) AS debit_sum,
                COALESCE(s.credit_sum, 0) AS credit_sum
         FROM accounts a
         LEFT JOIN (
             SELECT l.account_id, SUM(l.debit) AS debit_sum, SUM(l.credit) AS credit_sum
             FROM journal_lines l
             JOIN journal_entries e ON e.id = l.entry_id
             WHERE (?1 IS NULL OR e.entry_date >= ?1) AND (?2 IS NULL OR e.entry_date <= ?2)
             GROUP BY l.account_id
         ) s ON s.account_id = a.id
         ORDER BY a.code",
    )
    .bind(range.from)
    .bind(range.to)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|r| AccountActivity {
            account: r.account,
            debit: r.debit_sum,
            credit: r.credit_sum,
        })
        .collect())
}

// =============================================================================
// Unit Tests
// =============================================================================
