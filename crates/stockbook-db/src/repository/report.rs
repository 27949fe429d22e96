//! # Report Repository
//!
//! Financial statements built from journal-line sums for a period. The
//! cached `accounts.balance` is an all-time running total and is never read
//! here.

use chrono::NaiveDate;
use sqlx::SqlitePool;
use tracing::{debug, instrument};

use crate::error::DbResult;
use crate::repository::ledger::account_activity;
use stockbook_core::reports::{self, BalanceSheet, ProfitAndLoss, TrialBalance};
use stockbook_core::DateRange;

#[derive(Debug, Clone)]
pub struct ReportRepository {
    pool: SqlitePool,
}

impl ReportRepository {
    pub fn new(pool: SqlitePool) -> Self {
        ReportRepository { pool }
    }

    #[instrument(skip(self))]
    pub async fn trial_balance(&self, range: DateRange) -> DbResult<TrialBalance> {
        let activity = account_activity(&self.pool, range).await?;
        let tb = reports::trial_balance(&activity);
        debug!(rows = tb.rows.len(), balanced = tb.is_balanced, "Trial balance built");
        Ok(tb)
    }

    #[instrument(skip(self))]
    pub async fn profit_and_loss(&self, range: DateRange) -> DbResult<ProfitAndLoss> {
        let activity = account_activity(&self.pool, range).await?;
        Ok(reports::profit_and_loss(&activity))
    }

    /// Position at the end of `as_of` (inclusive), or now.
    #[instrument(skip(self))]
    pub async fn balance_sheet(&self, as_of: Option<NaiveDate>) -> DbResult<BalanceSheet> {
        let range = match as_of {
            Some(date) => DateRange::until(date),
            None => DateRange::all_time(),
        };
        let activity = account_activity(&self.pool, range).await?;
        Ok(reports::balance_sheet(&activity))
    }
}
