// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embedded migrations for the flight tables.
//!
//! ```ignore
//! let pool = PgPool::connect(&database_url).await?;
//! rbs_flight::migrations::run_postgres(&pool).await?;
//! ```

use sqlx::migrate::MigrateError;

/// PostgreSQL migrator with all flight migrations embedded.
pub static POSTGRES: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/postgresql");

/// SQLite migrator with all flight migrations embedded.
pub static SQLITE: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/sqlite");

/// Run PostgreSQL migrations. Already-applied migrations are skipped.
///
/// Versions applied by other migrators in the same database are ignored, so
/// the flight tables can share a database with the service tables.
pub async fn run_postgres(pool: &sqlx::PgPool) -> Result<(), MigrateError> {
    let mut migrator = sqlx::migrate!("./migrations/postgresql");
    migrator.set_ignore_missing(true);
    migrator.run(pool).await
}

/// Run SQLite migrations. Already-applied migrations are skipped.
pub async fn run_sqlite(pool: &sqlx::SqlitePool) -> Result<(), MigrateError> {
    SQLITE.run(pool).await
}
