// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Flight status, direction and submission types.

use crate::flight_map::FlightMap;

/// Lifecycle status of a flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlightStatus {
    /// Steps (or undos) are still being executed.
    Running,
    /// Every step completed.
    Success,
    /// A step failed and every completed step was undone.
    Error,
    /// An undo failed. Needs an operator; never retried automatically.
    Fatal,
}

impl FlightStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "RUNNING",
            Self::Success => "SUCCESS",
            Self::Error => "ERROR",
            Self::Fatal => "FATAL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "RUNNING" => Some(Self::Running),
            "SUCCESS" => Some(Self::Success),
            "ERROR" => Some(Self::Error),
            "FATAL" => Some(Self::Fatal),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl std::fmt::Display for FlightStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which way the cursor is moving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Do,
    Undo,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Do => "DO",
            Self::Undo => "UNDO",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "DO" => Some(Self::Do),
            "UNDO" => Some(Self::Undo),
            _ => None,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A flight ready to be recorded by the engine.
///
/// `kind` is handed back to the [`FlightResolver`](crate::FlightResolver)
/// together with `input` whenever the step list has to be rebuilt, so both
/// must be enough to reconstruct the flight after a restart. The working map
/// starts as a copy of `input`.
#[derive(Debug, Clone)]
pub struct FlightSubmission {
    pub kind: String,
    pub input: FlightMap,
}

impl FlightSubmission {
    pub fn new(kind: impl Into<String>, input: FlightMap) -> Self {
        Self {
            kind: kind.into(),
            input,
        }
    }
}

/// A flight that is durably recorded but not yet handed to a worker.
#[derive(Debug)]
#[must_use = "a staged flight must be launched or discarded"]
pub struct StagedFlight {
    pub(crate) flight_id: String,
}

impl StagedFlight {
    pub fn flight_id(&self) -> &str {
        &self.flight_id
    }
}
