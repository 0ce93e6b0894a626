// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Flight manager.
//!
//! Pairs the store writes that open a flight with the engine submission.
//! Benign races (pool deactivated meanwhile, resource no longer READY) are
//! reported as `Ok(None)` and logged at debug level only.

use std::sync::Arc;

use rbs_flight::{FlightEngine, StagedFlight};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::flights::FlightSubmissionFactory;
use crate::model::{Pool, PoolStatus, Resource, ResourceId, ResourceState, ResourceType};
use crate::store::BufferStore;

/// Submits creation and deletion flights.
#[derive(Clone)]
pub struct FlightManager {
    store: Arc<dyn BufferStore>,
    factory: Arc<FlightSubmissionFactory>,
    engine: FlightEngine,
}

impl FlightManager {
    pub fn new(
        store: Arc<dyn BufferStore>,
        factory: Arc<FlightSubmissionFactory>,
        engine: FlightEngine,
    ) -> Self {
        Self {
            store,
            factory,
            engine,
        }
    }

    pub fn engine(&self) -> &FlightEngine {
        &self.engine
    }

    /// Create one new resource in `pool`.
    ///
    /// The CREATING row and the flight record are committed together: the
    /// row insert stays open while the flight is staged, and a failed staging
    /// rolls the insert back. Only after the commit is the flight launched.
    pub async fn submit_creation_flight(&self, pool: &Pool) -> Result<Option<String>> {
        if pool.status != PoolStatus::Active {
            debug!(pool_id = %pool.id, "Pool is not active, skipping creation");
            return Ok(None);
        }

        let resource_id = ResourceId::random();
        let submission = self.factory.creation_submission(pool, &resource_id)?;
        let resource = Resource::creating(resource_id, pool.id.clone());

        let Some(pending) = self.store.begin_create_resource(&resource).await? else {
            debug!(pool_id = %pool.id, "Pool was deactivated before creation, skipping");
            return Ok(None);
        };

        let staged = match self.engine.stage(submission).await {
            Ok(staged) => staged,
            Err(e) => {
                if let Err(rollback_err) = pending.rollback().await {
                    warn!(
                        resource_id = %resource_id,
                        error = %rollback_err,
                        "Failed to roll back resource insert"
                    );
                }
                return Err(e.into());
            }
        };

        if let Err(e) = pending.commit().await {
            if let Err(discard_err) = self.engine.discard(staged).await {
                warn!(
                    resource_id = %resource_id,
                    error = %discard_err,
                    "Failed to discard staged flight after commit failure"
                );
            }
            return Err(e.into());
        }

        let flight_id = self.engine.launch(staged);
        info!(
            pool_id = %pool.id,
            resource_id = %resource_id,
            flight_id = %flight_id,
            "Submitted creation flight"
        );
        Ok(Some(flight_id))
    }

    /// Delete a READY `resource`.
    ///
    /// The flight is staged first and then claims the resource with a
    /// conditional READY -> DELETING update under its own id. A lost claim
    /// (handed out, or taken by another deletion) discards the staged flight
    /// and returns `Ok(None)`, so a resource never has two deletion flights.
    pub async fn submit_deletion_flight(
        &self,
        resource: &Resource,
        resource_type: ResourceType,
    ) -> Result<Option<String>> {
        let Some(current) = self.store.get_resource(&resource.id).await? else {
            debug!(resource_id = %resource.id, "Resource vanished, skipping deletion");
            return Ok(None);
        };
        if current.state != ResourceState::Ready {
            debug!(
                resource_id = %resource.id,
                state = %current.state,
                "Resource is not deletable, skipping deletion"
            );
            return Ok(None);
        }

        let submission = self.factory.deletion_submission(&current, resource_type)?;
        let staged = self.engine.stage(submission).await?;

        let claimed = self
            .store
            .mark_resource_deleting(&current.id, staged.flight_id())
            .await;
        match claimed {
            Ok(true) => {}
            Ok(false) => {
                self.discard_staged(staged, &current.id).await;
                debug!(resource_id = %current.id, "Resource claimed meanwhile, skipping deletion");
                return Ok(None);
            }
            Err(e) => {
                self.discard_staged(staged, &current.id).await;
                return Err(e.into());
            }
        }

        let flight_id = self.engine.launch(staged);
        info!(
            pool_id = %current.pool_id,
            resource_id = %current.id,
            flight_id = %flight_id,
            "Submitted deletion flight"
        );
        Ok(Some(flight_id))
    }

    async fn discard_staged(&self, staged: StagedFlight, resource_id: &ResourceId) {
        if let Err(e) = self.engine.discard(staged).await {
            warn!(
                resource_id = %resource_id,
                error = %e,
                "Failed to discard staged deletion flight"
            );
        }
    }
}
