// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Flight shapes for `GOOGLE_PROJECT` pools.

use std::sync::Arc;
use std::time::Duration;

use rbs_flight::{RetryRule, Step, StepEntry};

use crate::cloud::CloudClient;
use crate::model::{ResourceConfig, ResourceSpec};
use crate::store::BufferStore;

use super::FlightTemplate;
use super::steps::google_project::{
    CreateFirewallRulesStep, CreateNetworkStep, CreateProjectStep, CreateStorageLogsBucketStep,
    DeleteProjectStep, EnableServicesStep, GenerateProjectIdStep, SetBillingInfoStep,
};
use super::steps::resource::{
    FinishResourceCreationStep, InitialResourceDeletionStep, UndoCreatingResourceStep,
    UpdateResourceAsDeletedStep,
};

/// Timing for cloud steps.
#[derive(Debug, Clone)]
pub struct ProjectStepSettings {
    pub operation_poll_interval: Duration,
    pub operation_timeout: Duration,
    /// Retry rule for steps that call the cloud.
    pub cloud_retry: RetryRule,
    /// Retry rule for steps that only touch the store.
    pub store_retry: RetryRule,
}

impl Default for ProjectStepSettings {
    fn default() -> Self {
        Self {
            operation_poll_interval: Duration::from_secs(5),
            operation_timeout: Duration::from_secs(300),
            cloud_retry: RetryRule::exponential(Duration::from_secs(10), Duration::from_secs(300), 10),
            store_retry: RetryRule::exponential(Duration::from_secs(1), Duration::from_secs(30), 5),
        }
    }
}

pub struct GoogleProjectFlights {
    store: Arc<dyn BufferStore>,
    cloud: Arc<dyn CloudClient>,
    settings: ProjectStepSettings,
}

impl GoogleProjectFlights {
    pub fn new(
        store: Arc<dyn BufferStore>,
        cloud: Arc<dyn CloudClient>,
        settings: ProjectStepSettings,
    ) -> Self {
        Self {
            store,
            cloud,
            settings,
        }
    }

    fn store_step(&self, step: impl Step + 'static) -> StepEntry {
        StepEntry::new(step, self.settings.store_retry)
    }

    fn cloud_step(&self, step: impl Step + 'static) -> StepEntry {
        StepEntry::new(step, self.settings.cloud_retry)
    }
}

impl FlightTemplate for GoogleProjectFlights {
    fn creation_steps(&self, config: &ResourceConfig) -> rbs_flight::Result<Vec<StepEntry>> {
        let ResourceSpec::GcpProjectConfig(gcp) = &config.spec;
        let cloud = &self.cloud;
        let settings = &self.settings;

        Ok(vec![
            self.store_step(UndoCreatingResourceStep::new(self.store.clone())),
            self.cloud_step(GenerateProjectIdStep::new(cloud.clone(), gcp.clone())),
            self.cloud_step(CreateProjectStep::new(
                cloud.clone(),
                gcp.clone(),
                settings.clone(),
            )),
            self.cloud_step(SetBillingInfoStep::new(cloud.clone(), gcp.clone())),
            self.cloud_step(EnableServicesStep::new(cloud.clone(), gcp.clone())),
            self.cloud_step(CreateStorageLogsBucketStep::new(cloud.clone())),
            self.cloud_step(CreateNetworkStep::new(
                cloud.clone(),
                gcp.clone(),
                settings.clone(),
            )),
            self.cloud_step(CreateFirewallRulesStep::new(cloud.clone(), gcp.clone())),
            self.store_step(FinishResourceCreationStep::new(self.store.clone())),
        ])
    }

    fn deletion_steps(&self) -> rbs_flight::Result<Vec<StepEntry>> {
        Ok(vec![
            self.store_step(InitialResourceDeletionStep::new(self.store.clone())),
            self.cloud_step(DeleteProjectStep::new(self.cloud.clone())),
            self.store_step(UpdateResourceAsDeletedStep::new(self.store.clone())),
        ])
    }
}
