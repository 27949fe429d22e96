//! # Database Migrations
//!
//! Embedded SQL migrations for Stockbook.
//!
//! ```text
//! migrations/sqlite/
//! ├── 001_ledger_and_stock.sql   # Server schema, guards, seeded chart
//! └── 002_offline_client.sql     # Sync queue, mirror, local transactions
//! ```
//!
//! Never modify an applied migration; add a new file instead.

use sqlx::SqlitePool;
use tracing::info;

use crate::error::DbResult;

/// Embedded at compile time from `migrations/sqlite`.
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations/sqlite");

/// Runs all pending database migrations. Idempotent.
pub async fn run_migrations(pool: &SqlitePool) -> DbResult<()> {
    info!("Checking for pending migrations");

    MIGRATOR.run(pool).await?;

    info!("All migrations applied successfully");
    Ok(())
}

/// Returns `(total_migrations, applied_migrations)` for diagnostics.
pub async fn migration_status(pool: &SqlitePool) -> DbResult<(usize, usize)> {
    let total = MIGRATOR.migrations.len();

    let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations")
        .fetch_one(pool)
        .await
        .unwrap_or(0);

    Ok((total, applied as usize))
}
