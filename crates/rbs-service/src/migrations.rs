// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Database migrations for the pool and resource tables.
//!
//! The flight tables come from `rbs_flight::migrations`. When both live in
//! one PostgreSQL database, [`run`] merges the two sets into a single
//! migrator so SQLx sees one ordered history.
//!
//! ```ignore
//! let pool = PgPool::connect(&database_url).await?;
//! rbs_service::migrations::run(&pool).await?;
//! ```

use sqlx::migrate::{MigrateError, Migration, Migrator};

/// PostgreSQL migrator for the store tables alone.
pub static POSTGRES: Migrator = sqlx::migrate!("./migrations/postgresql");

/// SQLite migrator for the store tables alone.
pub static SQLITE: Migrator = sqlx::migrate!("./migrations/sqlite");

/// Flight and store PostgreSQL migrations, sorted by version.
#[derive(Debug)]
struct CombinedMigrations;

impl<'s> sqlx::migrate::MigrationSource<'s> for CombinedMigrations {
    fn resolve(
        self,
    ) -> std::pin::Pin<
        Box<
            dyn std::future::Future<
                    Output = Result<Vec<Migration>, Box<dyn std::error::Error + Send + Sync>>,
                > + Send
                + 's,
        >,
    > {
        Box::pin(async move {
            let mut all: Vec<Migration> = rbs_flight::migrations::POSTGRES.iter().cloned().collect();
            all.extend(POSTGRES.iter().cloned());
            all.sort_by_key(|m| m.version);
            Ok(all)
        })
    }
}

/// Migrator holding flight and store migrations.
pub async fn migrator() -> Result<Migrator, MigrateError> {
    Migrator::new(CombinedMigrations).await
}

/// Run flight and store migrations against one PostgreSQL database.
pub async fn run(pool: &sqlx::PgPool) -> Result<(), MigrateError> {
    migrator().await?.run(pool).await
}

/// Run PostgreSQL store migrations only.
///
/// Flight versions already applied to the same database are ignored.
pub async fn run_postgres(pool: &sqlx::PgPool) -> Result<(), MigrateError> {
    let mut migrator = sqlx::migrate!("./migrations/postgresql");
    migrator.set_ignore_missing(true);
    migrator.run(pool).await
}

/// Run SQLite store migrations only.
pub async fn run_sqlite(pool: &sqlx::SqlitePool) -> Result<(), MigrateError> {
    SQLITE.run(pool).await
}
