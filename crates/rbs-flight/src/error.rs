// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for the flight engine.

use thiserror::Error;

/// Flight engine errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FlightError {
    /// No flight with this id is recorded.
    #[error("Flight not found: {0}")]
    FlightNotFound(String),

    /// The flight tables could not be read or written.
    #[error("Persistence error during {operation}: {details}")]
    Persistence { operation: String, details: String },

    /// A flight map value could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The resolver has no step sequence for this flight kind.
    #[error("Unknown flight kind: {0}")]
    UnknownFlightKind(String),

    /// A persisted row holds a value the engine does not understand.
    #[error("Invalid flight record: {0}")]
    InvalidRecord(String),

    /// A required flight map key is absent.
    #[error("Missing flight map key: {0}")]
    MissingKey(String),

    /// Waiting for a terminal status took too long.
    #[error("Timed out waiting for flight {0}")]
    Timeout(String),

    /// A builder was finished without a required component.
    #[error("Missing component: {0}")]
    MissingComponent(&'static str),

    /// The engine no longer accepts work.
    #[error("Flight engine is shutting down")]
    ShuttingDown,
}

impl FlightError {
    /// Wrap a database failure with the operation that caused it.
    pub fn persistence(operation: &str, err: impl std::fmt::Display) -> Self {
        FlightError::Persistence {
            operation: operation.to_string(),
            details: err.to_string(),
        }
    }
}

/// Result type using FlightError.
pub type Result<T> = std::result::Result<T, FlightError>;
