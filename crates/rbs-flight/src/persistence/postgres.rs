// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL-backed flight persistence.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;

use crate::error::{FlightError, Result};
use crate::flight::{Direction, FlightStatus};
use crate::flight_map::FlightMap;

use super::{
    FlightPersistence, FlightRecord, FlightRow, StepAttempt, StepLogRecord, cursor_to_db,
};

const FLIGHT_COLUMNS: &str = "flight_id, kind, status, direction, step_cursor, input, \
     working_map, error, submitted_at, updated_at, completed_at";

/// PostgreSQL-backed flight persistence.
#[derive(Clone)]
pub struct PostgresFlightPersistence {
    pool: PgPool,
}

impl PostgresFlightPersistence {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl FlightPersistence for PostgresFlightPersistence {
    async fn create_flight(&self, flight_id: &str, kind: &str, input: &FlightMap) -> Result<()> {
        let now = Utc::now();
        let map = input.to_json();
        sqlx::query(
            r#"
            INSERT INTO flight (flight_id, kind, status, direction, step_cursor, input, working_map, submitted_at, updated_at)
            VALUES ($1, $2, 'RUNNING', 'DO', 0, $3, $3, $4, $4)
            "#,
        )
        .bind(flight_id)
        .bind(kind)
        .bind(&map)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| FlightError::persistence("create_flight", e))?;
        Ok(())
    }

    async fn get_flight(&self, flight_id: &str) -> Result<Option<FlightRecord>> {
        let row: Option<FlightRow> = sqlx::query_as(&format!(
            "SELECT {} FROM flight WHERE flight_id = $1",
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
            SET step_cursor = $2, direction = $3, working_map = $4, error = $5, updated_at = $6
            WHERE flight_id = $1 AND status = 'RUNNING'
            "#,
        )
        .bind(flight_id)
        .bind(cursor_to_db(cursor)?)
        .bind(direction.as_str())
        .bind(working_map.to_json())
        .bind(error)
        .bind(Utc::now())
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
            SET status = $2, working_map = $3, error = $4, updated_at = $5, completed_at = $5
            WHERE flight_id = $1
            "#,
        )
        .bind(flight_id)
        .bind(status.as_str())
        .bind(working_map.to_json())
        .bind(error)
        .bind(now)
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
            "SELECT {} FROM flight WHERE status = $1 ORDER BY submitted_at ASC LIMIT $2",
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
        let result = sqlx::query("DELETE FROM flight WHERE flight_id = $1")
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
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
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
            WHERE flight_id = $1
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
