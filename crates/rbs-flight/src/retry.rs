// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-step retry rules.

use std::time::Duration;

/// How the wait between attempts grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStrategy {
    /// Same wait before every retry.
    Fixed { interval: Duration },
    /// initial * 2^(retry-1), capped at `max_interval`.
    ///
    /// First retry: initial * 1
    /// Second retry: initial * 2
    /// Third retry: initial * 4
    ExponentialBackoff {
        initial: Duration,
        max_interval: Duration,
    },
}

/// Retry rule attached to one step.
///
/// `max_attempts` counts every invocation, so `1` means no retries. The same
/// rule governs the step's undo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryRule {
    pub max_attempts: u32,
    pub strategy: RetryStrategy,
}

impl RetryRule {
    /// Run once, never retry.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            strategy: RetryStrategy::Fixed {
                interval: Duration::ZERO,
            },
        }
    }

    pub fn fixed(interval: Duration, max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            strategy: RetryStrategy::Fixed { interval },
        }
    }

    pub fn exponential(initial: Duration, max_interval: Duration, max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            strategy: RetryStrategy::ExponentialBackoff {
                initial,
                max_interval,
            },
        }
    }

    /// Calculate delay for a given retry (1-indexed).
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        match self.strategy {
            RetryStrategy::Fixed { interval } => interval,
            RetryStrategy::ExponentialBackoff {
                initial,
                max_interval,
            } => {
                let multiplier = 2u32.saturating_pow(retry.saturating_sub(1));
                initial.saturating_mul(multiplier).min(max_interval)
            }
        }
    }

    /// Wait before the next attempt, or `None` once `attempt` used the budget.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            None
        } else {
            Some(self.delay_for_retry(attempt))
        }
    }
}

impl Default for RetryRule {
    fn default() -> Self {
        Self::exponential(Duration::from_secs(1), Duration::from_secs(30), 5)
    }
}
