// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Durable flight engine.
//!
//! A flight is an ordered list of [`Step`]s executed against a shared
//! [`FlightMap`]. Every step can be retried under its own [`RetryRule`] and
//! undone; a fatal failure undoes the completed steps in reverse order.
//! Progress is persisted after every step through [`FlightPersistence`], so
//! any process can resume a `RUNNING` flight from where it stopped.
//!
//! ```ignore
//! let engine = FlightEngine::builder()
//!     .persistence(Arc::new(PostgresFlightPersistence::new(pool)))
//!     .resolver(resolver)
//!     .build()?;
//! let flight_id = engine.submit(FlightSubmission::new("kind", input)).await?;
//! ```

pub mod engine;
pub mod error;
pub mod flight;
pub mod flight_map;
pub mod migrations;
pub mod persistence;
pub mod retry;
pub mod step;

pub use engine::{EngineConfig, FlightEngine, FlightEngineBuilder};
pub use error::{FlightError, Result};
pub use flight::{Direction, FlightStatus, FlightSubmission, StagedFlight};
pub use flight_map::FlightMap;
pub use persistence::{FlightPersistence, FlightRecord, StepLogRecord};
pub use retry::{RetryRule, RetryStrategy};
pub use step::{FlightContext, FlightResolver, Step, StepEntry, StepResult};
