// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Reconciliation scheduler.
//!
//! A single background task that periodically compares every pool's target
//! size with the resource counts in the store and submits a bounded number
//! of creation or deletion flights. Cycles never overlap: the next tick is
//! only awaited after the previous cycle returned.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::flight_manager::FlightManager;
use crate::model::{Pool, PoolAndResourceStates, PoolStatus, ResourceState};
use crate::store::BufferStore;

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct FlightSchedulerConfig {
    /// Whether `run` does anything at all.
    pub enabled: bool,
    /// Time between the start of two cycles.
    pub period: Duration,
    /// Creation flights submitted per pool and cycle at most.
    pub creation_limit_per_pool: u32,
    /// Deletion flights submitted per pool and cycle at most.
    pub deletion_limit_per_pool: u32,
}

impl Default for FlightSchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            period: Duration::from_secs(60),
            creation_limit_per_pool: 10,
            deletion_limit_per_pool: 10,
        }
    }
}

/// What one cycle should do for one pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileDecision {
    Idle,
    Create(u32),
    Delete(u32),
}

/// Decide the corrective action for one pool snapshot.
///
/// CREATING resources count toward the target but are never deleted; a pool
/// that shrank below its CREATING count overshoots until they settle.
pub fn decide(entry: &PoolAndResourceStates, config: &FlightSchedulerConfig) -> ReconcileDecision {
    let ready = entry.counts.get(ResourceState::Ready);

    let wanted = match entry.pool.status {
        PoolStatus::Active => {
            let size = entry.pool.size;
            let live = entry.counts.get(ResourceState::Creating).saturating_add(ready);
            if size > live {
                let count = (size - live).min(config.creation_limit_per_pool);
                return if count > 0 {
                    ReconcileDecision::Create(count)
                } else {
                    ReconcileDecision::Idle
                };
            }
            ready.saturating_sub(size)
        }
        // Drain to zero.
        PoolStatus::Deactivated => ready,
    };

    match wanted.min(config.deletion_limit_per_pool) {
        0 => ReconcileDecision::Idle,
        count => ReconcileDecision::Delete(count),
    }
}

/// Outcome of one cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    /// Ids of the flights submitted in this cycle.
    pub submitted: Vec<String>,
    /// Submissions that failed with an error.
    pub failures: usize,
}

/// Reconciliation scheduler that runs as a background task.
#[derive(Clone)]
pub struct FlightScheduler {
    store: Arc<dyn BufferStore>,
    manager: FlightManager,
    config: FlightSchedulerConfig,
    shutdown: Arc<Notify>,
}

impl FlightScheduler {
    pub fn new(
        store: Arc<dyn BufferStore>,
        manager: FlightManager,
        config: FlightSchedulerConfig,
    ) -> Self {
        Self {
            store,
            manager,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run cycles until shutdown is signalled.
    ///
    /// The first cycle starts immediately. A failing or panicking cycle is
    /// logged and the next one still runs on schedule.
    pub async fn run(self) {
        if !self.config.enabled {
            info!("Flight scheduling disabled");
            return;
        }
        info!(
            period_secs = self.config.period.as_secs(),
            creation_limit_per_pool = self.config.creation_limit_per_pool,
            deletion_limit_per_pool = self.config.deletion_limit_per_pool,
            "Flight scheduler started"
        );

        let mut ticker = tokio::time::interval(self.config.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("Flight scheduler shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let scheduler = self.clone();
                    match tokio::spawn(async move { scheduler.run_cycle().await }).await {
                        Ok(Ok(_)) => {}
                        Ok(Err(e)) => error!(error = %e, "Flight scheduling cycle failed"),
                        Err(e) => error!(error = %e, "Flight scheduling cycle panicked"),
                    }
                }
            }
        }
    }

    /// Run one reconciliation cycle over a single store snapshot.
    ///
    /// Only the snapshot read can fail the cycle; individual submission
    /// failures are counted and the cycle moves on.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let snapshot = self.store.list_pools_with_resource_counts().await?;
        let mut report = CycleReport::default();

        for entry in &snapshot {
            let decision = decide(entry, &self.config);
            debug!(
                pool_id = %entry.pool.id,
                status = entry.pool.status.as_str(),
                size = entry.pool.size,
                creating = entry.counts.get(ResourceState::Creating),
                ready = entry.counts.get(ResourceState::Ready),
                decision = ?decision,
                "Reconciling pool"
            );
            match decision {
                ReconcileDecision::Idle => {}
                ReconcileDecision::Create(count) => {
                    self.schedule_creation_flights(&entry.pool, count, &mut report)
                        .await;
                }
                ReconcileDecision::Delete(count) => {
                    self.schedule_deletion_flights(&entry.pool, count, &mut report)
                        .await;
                }
            }
        }

        info!(
            pools = snapshot.len(),
            submitted = report.submitted.len(),
            failures = report.failures,
            "Flight scheduling cycle finished"
        );
        Ok(report)
    }

    async fn schedule_creation_flights(&self, pool: &Pool, count: u32, report: &mut CycleReport) {
        let mut submitted = 0;
        for _ in 0..count {
            match self.manager.submit_creation_flight(pool).await {
                Ok(Some(flight_id)) => {
                    submitted += 1;
                    report.submitted.push(flight_id);
                }
                Ok(None) => {}
                Err(e) => {
                    report.failures += 1;
                    warn!(pool_id = %pool.id, error = %e, "Failed to submit creation flight");
                }
            }
        }
        info!(pool_id = %pool.id, target = count, submitted, "Submitted creation flights");
    }

    async fn schedule_deletion_flights(&self, pool: &Pool, count: u32, report: &mut CycleReport) {
        let resources = match self
            .store
            .list_resources(&pool.id, ResourceState::Ready, count)
            .await
        {
            Ok(resources) => resources,
            Err(e) => {
                report.failures += 1;
                warn!(pool_id = %pool.id, error = %e, "Failed to list READY resources");
                return;
            }
        };

        let mut submitted = 0;
        for resource in &resources {
            match self
                .manager
                .submit_deletion_flight(resource, pool.resource_type)
                .await
            {
                Ok(Some(flight_id)) => {
                    submitted += 1;
                    report.submitted.push(flight_id);
                }
                Ok(None) => {}
                Err(e) => {
                    report.failures += 1;
                    warn!(
                        pool_id = %pool.id,
                        resource_id = %resource.id,
                        error = %e,
                        "Failed to submit deletion flight"
                    );
                }
            }
        }
        info!(pool_id = %pool.id, target = count, submitted, "Submitted deletion flights");
    }
}
