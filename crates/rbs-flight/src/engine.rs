// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Flight executor.
//!
//! Each launched flight gets its own tokio task, gated by a semaphore sized
//! from [`EngineConfig::max_concurrent_flights`]. The task drives a small
//! state machine over the persisted cursor:
//!
//! - `DO`: run the step at `cursor`. Success advances the cursor; a fatal
//!   result (or an exhausted retry budget) flips the direction to `UNDO`.
//!   Running past the last step ends the flight in `SUCCESS`.
//! - `UNDO`: undo the step at `cursor - 1`. Success moves the cursor back;
//!   reaching zero ends the flight in `ERROR`. A failed undo ends it in
//!   `FATAL`.
//!
//! Cursor, direction and working map are written back after every step, so a
//! flight interrupted at any point can be resumed by any process from the
//! last persisted position.

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{Notify, Semaphore, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{FlightError, Result};
use crate::flight::{Direction, FlightStatus, FlightSubmission, StagedFlight};
use crate::flight_map::FlightMap;
use crate::persistence::{FlightPersistence, FlightRecord, StepAttempt};
use crate::retry::RetryRule;
use crate::step::{FlightContext, FlightResolver, StepEntry, StepResult};

/// Engine tuning.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Flights executing at the same time. Launched flights beyond this wait.
    pub max_concurrent_flights: usize,
    /// Fallback poll interval for `await_completion`.
    pub completion_poll_interval: Duration,
    /// Retry rule for the engine's own writes to the flight tables.
    pub persistence_retry: RetryRule,
    /// Maximum number of `RUNNING` flights picked up by one recovery pass.
    pub recovery_batch_size: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_flights: 32,
            completion_poll_interval: Duration::from_millis(500),
            persistence_retry: RetryRule::exponential(
                Duration::from_millis(100),
                Duration::from_secs(5),
                6,
            ),
            recovery_batch_size: 1000,
        }
    }
}

/// Builder for [`FlightEngine`].
#[derive(Default)]
pub struct FlightEngineBuilder {
    persistence: Option<Arc<dyn FlightPersistence>>,
    resolver: Option<Arc<dyn FlightResolver>>,
    config: EngineConfig,
}

impl FlightEngineBuilder {
    pub fn persistence(mut self, persistence: Arc<dyn FlightPersistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn resolver(mut self, resolver: Arc<dyn FlightResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn max_concurrent_flights(mut self, max: usize) -> Self {
        self.config.max_concurrent_flights = max;
        self
    }

    pub fn build(self) -> Result<FlightEngine> {
        let persistence = self
            .persistence
            .ok_or(FlightError::MissingComponent("persistence"))?;
        let resolver = self
            .resolver
            .ok_or(FlightError::MissingComponent("resolver"))?;
        let (shutdown_tx, _) = watch::channel(false);

        Ok(FlightEngine {
            inner: Arc::new(EngineInner {
                persistence,
                resolver,
                permits: Arc::new(Semaphore::new(self.config.max_concurrent_flights.max(1))),
                config: self.config,
                live: Mutex::new(HashSet::new()),
                completed: Notify::new(),
                shutdown_tx,
            }),
        })
    }
}

/// Durable executor of step sequences.
///
/// Cheap to clone; clones share the worker pool and the live-flight set.
#[derive(Clone)]
pub struct FlightEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    persistence: Arc<dyn FlightPersistence>,
    resolver: Arc<dyn FlightResolver>,
    config: EngineConfig,
    permits: Arc<Semaphore>,
    /// Flights that currently have an executor task in this process.
    live: Mutex<HashSet<String>>,
    completed: Notify,
    shutdown_tx: watch::Sender<bool>,
}

enum StepOutcome {
    Completed,
    Failed(String),
    Interrupted,
}

impl FlightEngine {
    pub fn builder() -> FlightEngineBuilder {
        FlightEngineBuilder::default()
    }

    pub fn persistence(&self) -> &Arc<dyn FlightPersistence> {
        &self.inner.persistence
    }

    /// Durably record a flight without starting it.
    ///
    /// Callers that must tie the flight to their own transaction stage it
    /// first, commit, and then [`launch`](Self::launch) or
    /// [`discard`](Self::discard) it.
    pub async fn stage(&self, submission: FlightSubmission) -> Result<StagedFlight> {
        if self.inner.is_shutting_down() {
            return Err(FlightError::ShuttingDown);
        }
        let flight_id = Uuid::new_v4().to_string();
        self.inner
            .persistence
            .create_flight(&flight_id, &submission.kind, &submission.input)
            .await?;
        debug!(flight_id = %flight_id, kind = %submission.kind, "Flight staged");
        Ok(StagedFlight { flight_id })
    }

    /// Hand a staged flight to the worker pool. Returns its id immediately.
    pub fn launch(&self, staged: StagedFlight) -> String {
        let flight_id = staged.flight_id;
        self.spawn_executor(flight_id.clone());
        flight_id
    }

    /// Drop a staged flight that will never be launched.
    pub async fn discard(&self, staged: StagedFlight) -> Result<()> {
        self.inner
            .persistence
            .delete_flight(&staged.flight_id)
            .await?;
        debug!(flight_id = %staged.flight_id, "Staged flight discarded");
        Ok(())
    }

    /// Record and launch a flight in one call.
    pub async fn submit(&self, submission: FlightSubmission) -> Result<String> {
        let staged = self.stage(submission).await?;
        Ok(self.launch(staged))
    }

    /// Start an executor for a persisted `RUNNING` flight.
    ///
    /// Returns false when this process already runs one for the same id.
    pub fn resume(&self, flight_id: &str) -> bool {
        self.spawn_executor(flight_id.to_string())
    }

    /// Resume every persisted `RUNNING` flight that has no executor here.
    pub async fn resume_running_flights(&self) -> Result<usize> {
        let records = self
            .inner
            .persistence
            .list_flights(FlightStatus::Running, self.inner.config.recovery_batch_size)
            .await?;

        let mut resumed = 0;
        for record in records {
            if self.spawn_executor(record.flight_id.clone()) {
                info!(
                    flight_id = %record.flight_id,
                    kind = %record.kind,
                    cursor = record.cursor,
                    direction = %record.direction,
                    "Resuming flight"
                );
                resumed += 1;
            }
        }
        Ok(resumed)
    }

    pub async fn get_flight(&self, flight_id: &str) -> Result<Option<FlightRecord>> {
        self.inner.persistence.get_flight(flight_id).await
    }

    /// Block until the flight reaches a terminal status.
    pub async fn await_completion(&self, flight_id: &str, timeout: Duration) -> Result<FlightRecord> {
        let poll_interval = self.inner.config.completion_poll_interval;
        let wait = async {
            loop {
                let notified = self.inner.completed.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                match self.inner.persistence.get_flight(flight_id).await? {
                    None => return Err(FlightError::FlightNotFound(flight_id.to_string())),
                    Some(record) if record.status.is_terminal() => return Ok(record),
                    Some(_) => {}
                }

                tokio::select! {
                    _ = &mut notified => {}
                    _ = tokio::time::sleep(poll_interval) => {}
                }
            }
        };

        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| FlightError::Timeout(flight_id.to_string()))?
    }

    /// Number of flights with an executor in this process.
    pub fn live_flight_count(&self) -> usize {
        self.inner.live_set().len()
    }

    /// Stop accepting work and wait up to `grace` for executors to park.
    ///
    /// Executors stop between steps or during a retry wait and leave their
    /// flight `RUNNING`, to be resumed on the next start.
    pub async fn shutdown(&self, grace: Duration) {
        self.inner.shutdown_tx.send_replace(true);
        self.inner.permits.close();

        let deadline = tokio::time::Instant::now() + grace;
        while self.live_flight_count() > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let remaining = self.live_flight_count();
        if remaining > 0 {
            warn!(remaining, "Flight engine shut down with executors still running");
        } else {
            info!("Flight engine shut down");
        }
    }

    fn spawn_executor(&self, flight_id: String) -> bool {
        if self.inner.is_shutting_down() {
            debug!(flight_id = %flight_id, "Engine shutting down, flight left for recovery");
            return false;
        }
        if !self.inner.live_set().insert(flight_id.clone()) {
            debug!(flight_id = %flight_id, "Flight already has an executor");
            return false;
        }

        let inner = self.inner.clone();
        tokio::spawn(async move {
            let _guard = LiveGuard {
                inner: inner.clone(),
                flight_id: flight_id.clone(),
            };
            let Ok(_permit) = inner.permits.clone().acquire_owned().await else {
                debug!(flight_id = %flight_id, "Worker pool closed before flight started");
                return;
            };

            match inner.execute(&flight_id).await {
                Ok(status) => debug!(flight_id = %flight_id, status = %status, "Executor finished"),
                Err(e) => error!(
                    flight_id = %flight_id,
                    error = %e,
                    "Flight executor stopped; flight stays RUNNING until resumed"
                ),
            }
        });
        true
    }
}

/// Removes a flight from the live set when its executor task ends.
struct LiveGuard {
    inner: Arc<EngineInner>,
    flight_id: String,
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.inner.live_set().remove(&self.flight_id);
    }
}

impl EngineInner {
    fn live_set(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.live.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    async fn execute(&self, flight_id: &str) -> Result<FlightStatus> {
        let record = self
            .with_retry("get_flight", || self.persistence.get_flight(flight_id))
            .await?
            .ok_or_else(|| FlightError::FlightNotFound(flight_id.to_string()))?;

        if record.status.is_terminal() {
            return Ok(record.status);
        }

        let steps = match self.resolver.resolve(&record.kind, &record.input) {
            Ok(steps) => steps,
            Err(e) => {
                let message = format!("cannot build steps for kind {}: {}", record.kind, e);
                return self
                    .finish(flight_id, FlightStatus::Fatal, &record.working_map, Some(&message))
                    .await;
            }
        };
        if record.cursor > steps.len() {
            let message = format!(
                "cursor {} is past the {} steps of kind {}",
                record.cursor,
                steps.len(),
                record.kind
            );
            return self
                .finish(flight_id, FlightStatus::Fatal, &record.working_map, Some(&message))
                .await;
        }

        let mut ctx = FlightContext::new(
            flight_id,
            record.kind.clone(),
            record.input,
            record.working_map,
            record.direction,
        );
        let mut cursor = record.cursor;
        let mut error = record.error;
        let mut shutdown = self.shutdown_tx.subscribe();

        loop {
            if *shutdown.borrow() {
                info!(flight_id = %flight_id, cursor, "Flight parked for shutdown");
                return Ok(FlightStatus::Running);
            }

            match ctx.direction() {
                Direction::Do => {
                    let Some(entry) = steps.get(cursor) else {
                        info!(flight_id = %flight_id, kind = %record.kind, "Flight succeeded");
                        return self
                            .finish(flight_id, FlightStatus::Success, ctx.working_map(), None)
                            .await;
                    };

                    match self.run_step(entry, cursor, &mut ctx, &mut shutdown).await {
                        StepOutcome::Completed => {
                            cursor += 1;
                            self.save(flight_id, cursor, &ctx, error.as_deref()).await?;
                        }
                        StepOutcome::Failed(message) => {
                            warn!(
                                flight_id = %flight_id,
                                step = entry.step.name(),
                                error = %message,
                                "Step failed, undoing completed steps"
                            );
                            error = Some(format!("{}: {}", entry.step.name(), message));
                            ctx.set_direction(Direction::Undo);
                            self.save(flight_id, cursor, &ctx, error.as_deref()).await?;
                        }
                        StepOutcome::Interrupted => return Ok(FlightStatus::Running),
                    }
                }
                Direction::Undo => {
                    if cursor == 0 {
                        info!(
                            flight_id = %flight_id,
                            kind = %record.kind,
                            error = error.as_deref().unwrap_or_default(),
                            "Flight undone"
                        );
                        return self
                            .finish(flight_id, FlightStatus::Error, ctx.working_map(), error.as_deref())
                            .await;
                    }

                    let index = cursor - 1;
                    let entry = &steps[index];
                    match self.run_step(entry, index, &mut ctx, &mut shutdown).await {
                        StepOutcome::Completed => {
                            cursor = index;
                            self.save(flight_id, cursor, &ctx, error.as_deref()).await?;
                        }
                        StepOutcome::Failed(message) => {
                            let undo_error = format!("undo of {} failed: {}", entry.step.name(), message);
                            let message = match error {
                                Some(original) => format!("{}; {}", original, undo_error),
                                None => undo_error,
                            };
                            error!(
                                flight_id = %flight_id,
                                kind = %record.kind,
                                error = %message,
                                "Flight is FATAL and needs manual cleanup"
                            );
                            return self
                                .finish(flight_id, FlightStatus::Fatal, ctx.working_map(), Some(&message))
                                .await;
                        }
                        StepOutcome::Interrupted => return Ok(FlightStatus::Running),
                    }
                }
            }
        }
    }

    async fn run_step(
        &self,
        entry: &StepEntry,
        index: usize,
        ctx: &mut FlightContext,
        shutdown: &mut watch::Receiver<bool>,
    ) -> StepOutcome {
        let direction = ctx.direction();
        let mut attempt = 1u32;

        loop {
            let result = match direction {
                Direction::Do => entry.step.do_step(ctx).await,
                Direction::Undo => entry.step.undo_step(ctx).await,
            };

            let (outcome, message) = match &result {
                StepResult::Success => ("SUCCESS", None),
                StepResult::FailureRetryable(m) => ("RETRY", Some(m.as_str())),
                StepResult::FailureFatal(m) => ("FATAL", Some(m.as_str())),
            };
            let logged = self
                .persistence
                .log_step_attempt(&StepAttempt {
                    flight_id: ctx.flight_id(),
                    step_index: index,
                    step_name: entry.step.name(),
                    direction,
                    attempt,
                    outcome,
                    message,
                })
                .await;
            if let Err(e) = logged {
                warn!(flight_id = %ctx.flight_id(), error = %e, "Failed to write step log");
            }

            match result {
                StepResult::Success => return StepOutcome::Completed,
                StepResult::FailureFatal(message) => return StepOutcome::Failed(message),
                StepResult::FailureRetryable(message) => {
                    let Some(delay) = entry.retry.next_delay(attempt) else {
                        return StepOutcome::Failed(format!(
                            "retries exhausted after {} attempts: {}",
                            attempt, message
                        ));
                    };
                    debug!(
                        flight_id = %ctx.flight_id(),
                        step = entry.step.name(),
                        direction = %direction,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %message,
                        "Retrying step"
                    );
                    tokio::select! {
                        _ = shutdown.changed() => return StepOutcome::Interrupted,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
            }
        }
    }

    async fn save(
        &self,
        flight_id: &str,
        cursor: usize,
        ctx: &FlightContext,
        error: Option<&str>,
    ) -> Result<()> {
        self.with_retry("save_progress", || {
            self.persistence
                .save_progress(flight_id, cursor, ctx.direction(), ctx.working_map(), error)
        })
        .await
    }

    async fn finish(
        &self,
        flight_id: &str,
        status: FlightStatus,
        working_map: &FlightMap,
        error: Option<&str>,
    ) -> Result<FlightStatus> {
        self.with_retry("complete_flight", || {
            self.persistence
                .complete_flight(flight_id, status, working_map, error)
        })
        .await?;
        self.completed.notify_waiters();
        Ok(status)
    }

    /// Retry transient persistence failures with the configured backoff.
    async fn with_retry<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let rule = self.config.persistence_retry;
        let mut attempt = 1u32;
        loop {
            match call().await {
                Err(e @ FlightError::Persistence { .. }) => match rule.next_delay(attempt) {
                    Some(delay) => {
                        warn!(operation, attempt, error = %e, "Flight persistence failed, retrying");
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    None => return Err(e),
                },
                other => return other,
            }
        }
    }
}
