// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The step abstraction.
//!
//! A step is one idempotent unit of work. The engine may call `do_step` again
//! after its side effect already happened (a lost response, a crash before the
//! cursor was persisted), so implementations must treat "already in the
//! desired state" as success.

use std::sync::Arc;

use async_trait::async_trait;

use crate::flight::Direction;
use crate::flight_map::FlightMap;
use crate::retry::RetryRule;

/// Outcome of one step invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepResult {
    Success,
    /// Try again according to the step's retry rule.
    FailureRetryable(String),
    /// Stop going forward and start undoing.
    FailureFatal(String),
}

impl StepResult {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self::FailureRetryable(message.into())
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::FailureFatal(message.into())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Execution context passed to every step.
#[derive(Debug)]
pub struct FlightContext {
    flight_id: String,
    kind: String,
    input: FlightMap,
    working_map: FlightMap,
    direction: Direction,
}

impl FlightContext {
    pub fn new(
        flight_id: impl Into<String>,
        kind: impl Into<String>,
        input: FlightMap,
        working_map: FlightMap,
        direction: Direction,
    ) -> Self {
        Self {
            flight_id: flight_id.into(),
            kind: kind.into(),
            input,
            working_map,
            direction,
        }
    }

    pub fn flight_id(&self) -> &str {
        &self.flight_id
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Parameters the flight was submitted with. Read-only.
    pub fn input(&self) -> &FlightMap {
        &self.input
    }

    pub fn working_map(&self) -> &FlightMap {
        &self.working_map
    }

    pub fn working_map_mut(&mut self) -> &mut FlightMap {
        &mut self.working_map
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub(crate) fn set_direction(&mut self, direction: Direction) {
        self.direction = direction;
    }
}

#[async_trait]
pub trait Step: Send + Sync {
    /// Stable name, recorded in the step log.
    fn name(&self) -> &'static str;

    async fn do_step(&self, ctx: &mut FlightContext) -> StepResult;

    /// Compensate a completed `do_step`. Best effort, and must also be
    /// idempotent.
    async fn undo_step(&self, ctx: &mut FlightContext) -> StepResult;
}

/// A step paired with its retry rule.
#[derive(Clone)]
pub struct StepEntry {
    pub step: Arc<dyn Step>,
    pub retry: RetryRule,
}

impl StepEntry {
    pub fn new(step: impl Step + 'static, retry: RetryRule) -> Self {
        Self {
            step: Arc::new(step),
            retry,
        }
    }
}

impl std::fmt::Debug for StepEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepEntry")
            .field("step", &self.step.name())
            .field("retry", &self.retry)
            .finish()
    }
}

/// Rebuilds the step list of a flight from its kind and input.
///
/// Steps hold live collaborators (database handles, API clients) and are
/// never persisted; the resolver is the only way the engine obtains them.
pub trait FlightResolver: Send + Sync {
    fn resolve(&self, kind: &str, input: &FlightMap) -> crate::Result<Vec<StepEntry>>;
}
