// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Flight steps.
//!
//! `resource` holds the store-side steps every resource type shares;
//! `google_project` holds the cloud steps for Google projects.

pub mod google_project;
pub mod resource;

use rbs_flight::{FlightContext, StepResult};
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::cloud::CloudError;
use crate::store::StoreError;

/// Unwrap a `Result<T, StepResult>` or return the step result.
macro_rules! step_try {
    ($expr:expr) => {
        match $expr {
            Ok(value) => value,
            Err(result) => return result,
        }
    };
}
pub(crate) use step_try;

/// Read a submission parameter. A missing or malformed one is fatal.
pub(crate) fn input<T: DeserializeOwned>(ctx: &FlightContext, key: &str) -> Result<T, StepResult> {
    ctx.input()
        .require(key)
        .map_err(|e| StepResult::fatal(format!("bad flight input {}: {}", key, e)))
}

/// Read a value an earlier step left in the working map.
pub(crate) fn working<T: DeserializeOwned>(
    ctx: &FlightContext,
    key: &str,
) -> Result<Option<T>, StepResult> {
    ctx.working_map()
        .get(key)
        .map_err(|e| StepResult::fatal(format!("bad working map value {}: {}", key, e)))
}

pub(crate) fn put<T: serde::Serialize + ?Sized>(
    ctx: &mut FlightContext,
    key: &str,
    value: &T,
) -> Result<(), StepResult> {
    ctx.working_map_mut()
        .put(key, value)
        .map_err(|e| StepResult::fatal(format!("cannot store {}: {}", key, e)))
}

/// Unavailable stores are retried; anything else ends the forward pass.
pub(crate) fn store_failure(ctx: &FlightContext, operation: &str, err: StoreError) -> StepResult {
    warn!(flight_id = %ctx.flight_id(), operation, error = %err, "Store call failed in step");
    if err.is_retryable() {
        StepResult::retryable(format!("{}: {}", operation, err))
    } else {
        StepResult::fatal(format!("{}: {}", operation, err))
    }
}

/// Transient cloud errors are retried; rejections end the forward pass.
pub(crate) fn cloud_failure(ctx: &FlightContext, operation: &str, err: CloudError) -> StepResult {
    warn!(flight_id = %ctx.flight_id(), operation, error = %err, "Cloud call failed in step");
    match err {
        CloudError::Transient(_) => StepResult::retryable(format!("{}: {}", operation, err)),
        _ => StepResult::fatal(format!("{}: {}", operation, err)),
    }
}
