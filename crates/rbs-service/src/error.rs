// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for the resource buffer service.

use thiserror::Error;

use crate::model::{PoolId, ResourceType};
use crate::store::StoreError;

/// Service errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Store operation failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Flight engine operation failed.
    #[error("Flight error: {0}")]
    Flight(#[from] rbs_flight::FlightError),

    /// No flight template is registered for the resource type.
    #[error("Unsupported resource type: {0}")]
    UnsupportedResourceType(ResourceType),

    #[error("Pool not found: {0}")]
    PoolNotFound(PoolId),

    /// A pool definition conflicts with what is stored.
    #[error("Invalid pool config: {0}")]
    InvalidPoolConfig(String),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type using the service Error.
pub type Result<T> = std::result::Result<T, Error>;
