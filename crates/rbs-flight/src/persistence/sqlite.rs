// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed flight persistence.

use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

use crate::error::{FlightError, Result};
use crate::flight::{Direction, FlightStatus};
use crate::flight_map::FlightMap;
use crate::migrations;

use super::{
    FlightPersistence, FlightRecord, FlightRow, StepAttempt, StepLogRecord, cursor_to_db,
};

const FLIGHT_COLUMNS: &str = "flight_id, kind, status, direction, step_cursor, input, \
     working_map, error, submitted_at, updated_at, completed_at";

/// SQLite-backed flight persistence.
#[derive(Clone)]
pub struct SqliteFlightPersistence {
    pool: SqlitePool,
}

impl SqliteFlightPersistence {
    /// Wrap an existing pool. Migrations are the caller's job.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) a database file and run migrations.
    ///
    /// ```ignore
    /// let persistence = SqliteFlightPersistence::from_path(".data/flights.db").await?;
    /// ```
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                FlightError::persistence("create_dir", format!("{:?}: {}", parent, e))
            })?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .map_err(|e| FlightError::persistence("connect", e))?;

        migrations::run_sqlite(&pool)
            .await
            .map_err(|e| FlightError::persistence("migrate", e))?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl FlightPersistence for SqliteFlightPersistence {
    async fn create_flight(&self, flight_id: &str, kind: &str, input: &FlightMap) -> Result<()> {
        let now = Utc::now();
        let map = input.to_json();
        sqlx::query(
            r#"
            INSERT INTO flight (flight_id, kind, status, direction, step_cursor, input, working_map, submitted_at, updated_at)
            VALUES (?, ?, 'RUNNING', 'DO', 0, ?, ?, ?, ?)
            "#,
        )
        .bind(flight_id)
        .bind(kind)
        .bind(&map)
        .bind(&map)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| FlightError::persistence("create_flight", e))?;
        Ok(())
    }

    async fn get_flight(&self, flight_id: &str) -> Result<Option<FlightRecord>> {
        let row: Option<FlightRow> = sqlx::query_as(&format!(
            "SELECT {} FROM flight WHERE flight_id = ?",
            FLIGHT_COLUMNS
        ))
        .bind(flight_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| FlightError::persistence("get_flight", e))?;

        row.map(FlightRecord::try_from).transpose()
    }

    async fn save_progress(
        &self,
        flight_id: &str,
        cursor: usize,
        direction: Direction,
        working_map: &FlightMap,
        error: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE flight
            SET step_cursor = ?, direction = ?, working_map = ?, error = ?, updated_at = ?
            WHERE flight_id = ? AND status = 'RUNNING'
            "#,
        )
        .bind(cursor_to_db(cursor)?)
        .bind(direction.as_str())
        .bind(working_map.to_json())
        .bind(error)
        .bind(Utc::now())
        .bind(flight_id)
        .execute(&self.pool)
        .await
        .map_err(|e| FlightError::persistence("save_progress", e))?;

        if result.rows_affected() == 0 {
            return Err(FlightError::FlightNotFound(flight_id.to_string()));
        }
        Ok(())
    }

    async fn complete_flight(
        &self,
        flight_id: &str,
        status: FlightStatus,
        working_map: &FlightMap,
        error: Option<&str>,
    ) -> Result<()> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE flight
            SET status = ?, working_map = ?, error = ?, updated_at = ?, completed_at = ?
            WHERE flight_id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(working_map.to_json())
        .bind(error)
        .bind(now)
        .bind(now)
        .bind(flight_id)
        .execute(&self.pool)
        .await
        .map_err(|e| FlightError::persistence("complete_flight", e))?;

        if result.rows_affected() == 0 {
            return Err(FlightError::FlightNotFound(flight_id.to_string()));
        }
        Ok(())
    }

    async fn list_flights(&self, status: FlightStatus, limit: i64) -> Result<Vec<FlightRecord>> {
        let rows: Vec<FlightRow> = sqlx::query_as(&format!(
            "SELECT {} FROM flight WHERE status = ? ORDER BY submitted_at ASC LIMIT ?",
            FLIGHT_COLUMNS
        ))
        .bind(status.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| FlightError::persistence("list_flights", e))?;

        rows.into_iter().map(FlightRecord::try_from).collect()
    }

    async fn delete_flight(&self, flight_id: &str) -> Result<bool> {
        // Step log goes with it through ON DELETE CASCADE.
        let result = sqlx::query("DELETE FROM flight WHERE flight_id = ?")
            .bind(flight_id)
            .execute(&self.pool)
            .await
            .map_err(|e| FlightError::persistence("delete_flight", e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn log_step_attempt(&self, attempt: &StepAttempt<'_>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO flight_step_log (flight_id, step_index, step_name, direction, attempt, outcome, message, logged_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(attempt.flight_id)
        .bind(cursor_to_db(attempt.step_index)?)
        .bind(attempt.step_name)
        .bind(attempt.direction.as_str())
        .bind(i32::try_from(attempt.attempt).unwrap_or(i32::MAX))
        .bind(attempt.outcome)
        .bind(attempt.message)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| FlightError::persistence("log_step_attempt", e))?;
        Ok(())
    }

    async fn list_step_attempts(&self, flight_id: &str) -> Result<Vec<StepLogRecord>> {
        sqlx::query_as(
            r#"
            SELECT id, flight_id, step_index, step_name, direction, attempt, outcome, message, logged_at
            FROM flight_step_log
            WHERE flight_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(flight_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| FlightError::persistence("list_step_attempts", e))
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| FlightError::persistence("health_check", e))?;
        Ok(())
    }
}
