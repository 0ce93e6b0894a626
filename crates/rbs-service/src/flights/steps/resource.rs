// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Store-side steps shared by every resource type.

use std::sync::Arc;

use async_trait::async_trait;
use rbs_flight::{FlightContext, Step, StepResult};
use tracing::{debug, info, warn};

use crate::flights::keys;
use crate::model::{CloudResourceUid, ResourceId, ResourceState};
use crate::store::BufferStore;

use super::{input, step_try, store_failure, working};

/// First creation step. Its undo removes the CREATING row so a failed
/// creation leaves nothing behind in the store.
pub struct UndoCreatingResourceStep {
    store: Arc<dyn BufferStore>,
}

impl UndoCreatingResourceStep {
    pub fn new(store: Arc<dyn BufferStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Step for UndoCreatingResourceStep {
    fn name(&self) -> &'static str {
        "UndoCreatingResource"
    }

    async fn do_step(&self, _ctx: &mut FlightContext) -> StepResult {
        StepResult::Success
    }

    async fn undo_step(&self, ctx: &mut FlightContext) -> StepResult {
        let resource_id: ResourceId = step_try!(input(ctx, keys::RESOURCE_ID));

        let resource = match self.store.get_resource(&resource_id).await {
            Ok(resource) => resource,
            Err(e) => return store_failure(ctx, "get_resource", e),
        };
        match resource.map(|r| r.state) {
            None => StepResult::Success,
            Some(ResourceState::Creating) => match self.store.delete_resource(&resource_id).await {
                Ok(_) => {
                    info!(resource_id = %resource_id, "Removed CREATING resource after failed creation");
                    StepResult::Success
                }
                Err(e) => store_failure(ctx, "delete_resource", e),
            },
            Some(state) => StepResult::fatal(format!(
                "resource {} is {} while its creation is being undone",
                resource_id, state
            )),
        }
    }
}

/// Last creation step: CREATING -> READY with the cloud descriptor.
pub struct FinishResourceCreationStep {
    store: Arc<dyn BufferStore>,
}

impl FinishResourceCreationStep {
    pub fn new(store: Arc<dyn BufferStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Step for FinishResourceCreationStep {
    fn name(&self) -> &'static str {
        "FinishResourceCreation"
    }

    async fn do_step(&self, ctx: &mut FlightContext) -> StepResult {
        let resource_id: ResourceId = step_try!(input(ctx, keys::RESOURCE_ID));
        let Some(uid) = step_try!(working::<CloudResourceUid>(ctx, keys::CLOUD_RESOURCE_UID)) else {
            return StepResult::fatal("no cloud resource descriptor was produced");
        };

        match self.store.mark_resource_ready(&resource_id, &uid).await {
            Ok(true) => {
                info!(resource_id = %resource_id, "Resource is READY");
                return StepResult::Success;
            }
            Ok(false) => {}
            Err(e) => return store_failure(ctx, "mark_resource_ready", e),
        }

        // Lost the conditional update: fine if an earlier attempt already won.
        match self.store.get_resource(&resource_id).await {
            Ok(Some(r))
                if r.state == ResourceState::Ready
                    && r.cloud_resource_uid.as_ref() == Some(&uid) =>
            {
                debug!(resource_id = %resource_id, "Resource already READY");
                StepResult::Success
            }
            Ok(Some(r)) => StepResult::fatal(format!(
                "resource {} is {} and cannot become READY",
                resource_id, r.state
            )),
            Ok(None) => StepResult::fatal(format!("resource {} no longer exists", resource_id)),
            Err(e) => store_failure(ctx, "get_resource", e),
        }
    }

    async fn undo_step(&self, _ctx: &mut FlightContext) -> StepResult {
        StepResult::Success
    }
}

/// First deletion step: confirms this flight owns the DELETING claim.
///
/// Submission normally makes the claim. A flight resumed after a crash
/// between staging and claiming makes it here instead.
pub struct InitialResourceDeletionStep {
    store: Arc<dyn BufferStore>,
}

impl InitialResourceDeletionStep {
    pub fn new(store: Arc<dyn BufferStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Step for InitialResourceDeletionStep {
    fn name(&self) -> &'static str {
        "InitialResourceDeletion"
    }

    async fn do_step(&self, ctx: &mut FlightContext) -> StepResult {
        let resource_id: ResourceId = step_try!(input(ctx, keys::RESOURCE_ID));

        match self.store.deleting_flight_id(&resource_id).await {
            Ok(Some(owner)) if owner == ctx.flight_id() => return StepResult::Success,
            Ok(_) => {}
            Err(e) => return store_failure(ctx, "deleting_flight_id", e),
        }

        match self.store.mark_resource_deleting(&resource_id, ctx.flight_id()).await {
            Ok(true) => StepResult::Success,
            Ok(false) => {
                // Handed out or claimed by another deletion in the meantime.
                debug!(resource_id = %resource_id, "Resource no longer deletable");
                StepResult::fatal(format!("resource {} is no longer READY", resource_id))
            }
            Err(e) => store_failure(ctx, "mark_resource_deleting", e),
        }
    }

    async fn undo_step(&self, ctx: &mut FlightContext) -> StepResult {
        let resource_id: ResourceId = step_try!(input(ctx, keys::RESOURCE_ID));
        match self
            .store
            .revert_resource_to_ready(&resource_id, ctx.flight_id())
            .await
        {
            Ok(true) => {
                warn!(resource_id = %resource_id, "Deletion failed, resource back to READY");
                StepResult::Success
            }
            Ok(false) => StepResult::Success,
            Err(e) => store_failure(ctx, "revert_resource_to_ready", e),
        }
    }
}

/// Last deletion step: DELETING -> DELETED.
pub struct UpdateResourceAsDeletedStep {
    store: Arc<dyn BufferStore>,
}

impl UpdateResourceAsDeletedStep {
    pub fn new(store: Arc<dyn BufferStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Step for UpdateResourceAsDeletedStep {
    fn name(&self) -> &'static str {
        "UpdateResourceAsDeleted"
    }

    async fn do_step(&self, ctx: &mut FlightContext) -> StepResult {
        let resource_id: ResourceId = step_try!(input(ctx, keys::RESOURCE_ID));

        match self.store.mark_resource_deleted(&resource_id).await {
            Ok(true) => {
                info!(resource_id = %resource_id, "Resource DELETED");
                return StepResult::Success;
            }
            Ok(false) => {}
            Err(e) => return store_failure(ctx, "mark_resource_deleted", e),
        }

        match self.store.get_resource(&resource_id).await {
            Ok(Some(r)) if r.state == ResourceState::Deleted => StepResult::Success,
            Ok(Some(r)) => StepResult::fatal(format!(
                "resource {} is {} and cannot become DELETED",
                resource_id, r.state
            )),
            Ok(None) => StepResult::fatal(format!("resource {} no longer exists", resource_id)),
            Err(e) => store_failure(ctx, "get_resource", e),
        }
    }

    async fn undo_step(&self, _ctx: &mut FlightContext) -> StepResult {
        StepResult::Success
    }
}
