// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence interfaces and backends for flights.
//!
//! A flight row holds everything needed to resume: kind and input (to rebuild
//! the steps), the working map, the cursor and the direction. The engine
//! rewrites the row after every step.

pub mod postgres;
pub mod sqlite;

pub use self::postgres::PostgresFlightPersistence;
pub use self::sqlite::SqliteFlightPersistence;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{FlightError, Result};
use crate::flight::{Direction, FlightStatus};
use crate::flight_map::FlightMap;

/// Flight row as stored.
#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct FlightRow {
    pub flight_id: String,
    pub kind: String,
    pub status: String,
    pub direction: String,
    pub step_cursor: i32,
    pub input: serde_json::Value,
    pub working_map: serde_json::Value,
    pub error: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Flight record from the persistence layer.
#[derive(Debug, Clone)]
pub struct FlightRecord {
    pub flight_id: String,
    /// Resolver key the steps are rebuilt from.
    pub kind: String,
    pub status: FlightStatus,
    pub direction: Direction,
    /// Number of steps whose `do_step` has completed and not yet been undone.
    pub cursor: usize,
    pub input: FlightMap,
    pub working_map: FlightMap,
    /// First failure that sent the flight into undo, plus any undo failure.
    pub error: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<FlightRow> for FlightRecord {
    type Error = FlightError;

    fn try_from(row: FlightRow) -> Result<Self> {
        let status = FlightStatus::parse(&row.status).ok_or_else(|| {
            FlightError::InvalidRecord(format!("flight {} has status {}", row.flight_id, row.status))
        })?;
        let direction = Direction::parse(&row.direction).ok_or_else(|| {
            FlightError::InvalidRecord(format!(
                "flight {} has direction {}",
                row.flight_id, row.direction
            ))
        })?;
        let cursor = usize::try_from(row.step_cursor).map_err(|_| {
            FlightError::InvalidRecord(format!(
                "flight {} has cursor {}",
                row.flight_id, row.step_cursor
            ))
        })?;

        Ok(Self {
            status,
            direction,
            cursor,
            input: FlightMap::from_json(row.input)?,
            working_map: FlightMap::from_json(row.working_map)?,
            flight_id: row.flight_id,
            kind: row.kind,
            error: row.error,
            submitted_at: row.submitted_at,
            updated_at: row.updated_at,
            completed_at: row.completed_at,
        })
    }
}

/// One step invocation, as written to the step log.
#[derive(Debug, Clone)]
pub struct StepAttempt<'a> {
    pub flight_id: &'a str,
    pub step_index: usize,
    pub step_name: &'a str,
    pub direction: Direction,
    pub attempt: u32,
    /// `SUCCESS`, `RETRY` or `FATAL`.
    pub outcome: &'static str,
    pub message: Option<&'a str>,
}

/// Step log row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StepLogRecord {
    pub id: i64,
    pub flight_id: String,
    pub step_index: i32,
    pub step_name: String,
    pub direction: String,
    pub attempt: i32,
    pub outcome: String,
    pub message: Option<String>,
    pub logged_at: DateTime<Utc>,
}

/// Storage backend for flights.
#[async_trait]
pub trait FlightPersistence: Send + Sync {
    /// Record a new `RUNNING` flight at cursor 0 with the working map seeded
    /// from `input`.
    async fn create_flight(&self, flight_id: &str, kind: &str, input: &FlightMap) -> Result<()>;

    async fn get_flight(&self, flight_id: &str) -> Result<Option<FlightRecord>>;

    /// Persist cursor, direction and working map of a running flight.
    async fn save_progress(
        &self,
        flight_id: &str,
        cursor: usize,
        direction: Direction,
        working_map: &FlightMap,
        error: Option<&str>,
    ) -> Result<()>;

    /// Move a flight to a terminal status.
    async fn complete_flight(
        &self,
        flight_id: &str,
        status: FlightStatus,
        working_map: &FlightMap,
        error: Option<&str>,
    ) -> Result<()>;

    /// Flights in `status`, oldest first.
    async fn list_flights(&self, status: FlightStatus, limit: i64) -> Result<Vec<FlightRecord>>;

    /// Remove a flight and its step log. Returns false if it did not exist.
    async fn delete_flight(&self, flight_id: &str) -> Result<bool>;

    async fn log_step_attempt(&self, attempt: &StepAttempt<'_>) -> Result<()>;

    /// Step log of one flight in the order it was written.
    async fn list_step_attempts(&self, flight_id: &str) -> Result<Vec<StepLogRecord>>;

    async fn health_check(&self) -> Result<()>;
}

fn cursor_to_db(cursor: usize) -> Result<i32> {
    i32::try_from(cursor)
        .map_err(|_| FlightError::InvalidRecord(format!("cursor {} out of range", cursor)))
}
