// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cloud steps for Google project resources.
//!
//! Every `do_step` first checks whether its target already exists, so a step
//! re-run after a lost response or a restart converges instead of failing.

use std::sync::Arc;

use async_trait::async_trait;
use rbs_flight::{FlightContext, Step, StepResult};
use tracing::{debug, info};
use uuid::Uuid;

use crate::cloud::{
    BucketInfo, CloudClient, CloudError, FirewallRule, ProjectLifecycle, wait_for_operation,
};
use crate::flights::google_project::ProjectStepSettings;
use crate::flights::keys;
use crate::model::{CloudResourceUid, GcpProjectConfig};

use super::{cloud_failure, input, put, step_try, working};

const MAX_PROJECT_ID_LEN: usize = 30;
const SUFFIX_LEN: usize = 12;

/// Group that writes storage access logs.
pub const STORAGE_LOGS_WRITER: &str = "cloud-storage-analytics@google.com";
pub const STORAGE_LOGS_RETENTION_DAYS: u32 = 180;

/// Rule names created in every project network.
pub const ALLOW_INTERNAL_RULE: &str = "allow-internal";
pub const LEONARDO_SSL_RULE: &str = "leonardo-ssl";

/// Build a project id: lowercase prefix, a hyphen and a random hex suffix,
/// at most 30 characters.
pub fn generate_project_id(prefix: &str) -> String {
    let prefix: String = prefix
        .to_ascii_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
        .take(MAX_PROJECT_ID_LEN - SUFFIX_LEN - 1)
        .collect();
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", prefix, &suffix[..SUFFIX_LEN])
}

fn project_id(ctx: &FlightContext) -> Result<String, StepResult> {
    working::<String>(ctx, keys::GOOGLE_PROJECT_ID)?
        .ok_or_else(|| StepResult::fatal("no project id was generated"))
}

/// Picks the project id and records the cloud descriptor. Its undo deletes
/// whatever project exists under that id.
pub struct GenerateProjectIdStep {
    cloud: Arc<dyn CloudClient>,
    config: GcpProjectConfig,
}

impl GenerateProjectIdStep {
    pub fn new(cloud: Arc<dyn CloudClient>, config: GcpProjectConfig) -> Self {
        Self { cloud, config }
    }
}

#[async_trait]
impl Step for GenerateProjectIdStep {
    fn name(&self) -> &'static str {
        "GenerateProjectId"
    }

    async fn do_step(&self, ctx: &mut FlightContext) -> StepResult {
        if step_try!(working::<String>(ctx, keys::GOOGLE_PROJECT_ID)).is_some() {
            return StepResult::Success;
        }
        let project_id = generate_project_id(&self.config.project_id_prefix);
        let uid = CloudResourceUid::GoogleProjectUid {
            project_id: project_id.clone(),
        };
        step_try!(put(ctx, keys::GOOGLE_PROJECT_ID, &project_id));
        step_try!(put(ctx, keys::CLOUD_RESOURCE_UID, &uid));
        debug!(flight_id = %ctx.flight_id(), project_id = %project_id, "Generated project id");
        StepResult::Success
    }

    async fn undo_step(&self, ctx: &mut FlightContext) -> StepResult {
        let Some(project_id) = step_try!(working::<String>(ctx, keys::GOOGLE_PROJECT_ID)) else {
            return StepResult::Success;
        };
        delete_project_if_present(self.cloud.as_ref(), ctx, &project_id).await
    }
}

async fn delete_project_if_present(
    cloud: &dyn CloudClient,
    ctx: &FlightContext,
    project_id: &str,
) -> StepResult {
    match cloud.get_project(project_id).await {
        Ok(None) => return StepResult::Success,
        Ok(Some(p)) if p.lifecycle == ProjectLifecycle::DeleteRequested => {
            return StepResult::Success;
        }
        Ok(Some(_)) => {}
        Err(e) => return cloud_failure(ctx, "get_project", e),
    }
    match cloud.delete_project(project_id).await {
        Ok(()) | Err(CloudError::NotFound(_)) => {
            info!(flight_id = %ctx.flight_id(), project_id, "Project deleted");
            StepResult::Success
        }
        Err(e) => cloud_failure(ctx, "delete_project", e),
    }
}

pub struct CreateProjectStep {
    cloud: Arc<dyn CloudClient>,
    config: GcpProjectConfig,
    settings: ProjectStepSettings,
}

impl CreateProjectStep {
    pub fn new(
        cloud: Arc<dyn CloudClient>,
        config: GcpProjectConfig,
        settings: ProjectStepSettings,
    ) -> Self {
        Self {
            cloud,
            config,
            settings,
        }
    }
}

#[async_trait]
impl Step for CreateProjectStep {
    fn name(&self) -> &'static str {
        "CreateProject"
    }

    async fn do_step(&self, ctx: &mut FlightContext) -> StepResult {
        let project_id = step_try!(project_id(ctx));

        match self.cloud.get_project(&project_id).await {
            Ok(Some(p)) if p.lifecycle == ProjectLifecycle::Active => return StepResult::Success,
            Ok(Some(_)) => {
                return StepResult::fatal(format!("project {} is being deleted", project_id));
            }
            Ok(None) => {}
            Err(e) => return cloud_failure(ctx, "get_project", e),
        }

        let operation = match self
            .cloud
            .create_project(&project_id, &self.config.parent_folder_id, &self.config.labels)
            .await
        {
            Ok(operation) => operation,
            Err(CloudError::AlreadyExists(_)) => return StepResult::Success,
            Err(e) => return cloud_failure(ctx, "create_project", e),
        };

        match wait_for_operation(
            self.cloud.as_ref(),
            &operation,
            self.settings.operation_poll_interval,
            self.settings.operation_timeout,
        )
        .await
        {
            Ok(()) => {
                info!(flight_id = %ctx.flight_id(), project_id = %project_id, "Project created");
                StepResult::Success
            }
            Err(e) => cloud_failure(ctx, "create_project", e),
        }
    }

    async fn undo_step(&self, _ctx: &mut FlightContext) -> StepResult {
        // GenerateProjectId's undo deletes the project.
        StepResult::Success
    }
}

pub struct SetBillingInfoStep {
    cloud: Arc<dyn CloudClient>,
    config: GcpProjectConfig,
}

impl SetBillingInfoStep {
    pub fn new(cloud: Arc<dyn CloudClient>, config: GcpProjectConfig) -> Self {
        Self { cloud, config }
    }
}

#[async_trait]
impl Step for SetBillingInfoStep {
    fn name(&self) -> &'static str {
        "SetBillingInfo"
    }

    async fn do_step(&self, ctx: &mut FlightContext) -> StepResult {
        let project_id = step_try!(project_id(ctx));
        match self
            .cloud
            .set_billing_account(&project_id, &self.config.billing_account)
            .await
        {
            Ok(()) => StepResult::Success,
            // A fresh project can take a moment to become visible.
            Err(e @ CloudError::NotFound(_)) => StepResult::retryable(e.to_string()),
            Err(e) => cloud_failure(ctx, "set_billing_account", e),
        }
    }

    async fn undo_step(&self, _ctx: &mut FlightContext) -> StepResult {
        StepResult::Success
    }
}

pub struct EnableServicesStep {
    cloud: Arc<dyn CloudClient>,
    config: GcpProjectConfig,
}

impl EnableServicesStep {
    pub fn new(cloud: Arc<dyn CloudClient>, config: GcpProjectConfig) -> Self {
        Self { cloud, config }
    }
}

#[async_trait]
impl Step for EnableServicesStep {
    fn name(&self) -> &'static str {
        "EnableServices"
    }

    async fn do_step(&self, ctx: &mut FlightContext) -> StepResult {
        if self.config.enabled_apis.is_empty() {
            return StepResult::Success;
        }
        let project_id = step_try!(project_id(ctx));
        match self
            .cloud
            .enable_services(&project_id, &self.config.enabled_apis)
            .await
        {
            Ok(()) => StepResult::Success,
            Err(e @ CloudError::NotFound(_)) => StepResult::retryable(e.to_string()),
            Err(e) => cloud_failure(ctx, "enable_services", e),
        }
    }

    async fn undo_step(&self, _ctx: &mut FlightContext) -> StepResult {
        StepResult::Success
    }
}

/// Name of the bucket that receives the project's storage access logs.
pub fn storage_logs_bucket_name(project_id: &str) -> String {
    format!("storage-logs-{}", project_id)
}

/// Creates the storage-logs bucket: objects expire after 180 days and the
/// log writer group gets WRITER.
pub struct CreateStorageLogsBucketStep {
    cloud: Arc<dyn CloudClient>,
}

impl CreateStorageLogsBucketStep {
    pub fn new(cloud: Arc<dyn CloudClient>) -> Self {
        Self { cloud }
    }
}

#[async_trait]
impl Step for CreateStorageLogsBucketStep {
    fn name(&self) -> &'static str {
        "CreateStorageLogsBucket"
    }

    async fn do_step(&self, ctx: &mut FlightContext) -> StepResult {
        let project_id = step_try!(project_id(ctx));
        let bucket = BucketInfo {
            name: storage_logs_bucket_name(&project_id),
            delete_after_days: Some(STORAGE_LOGS_RETENTION_DAYS),
            writer_groups: vec![STORAGE_LOGS_WRITER.to_string()],
        };

        match self.cloud.bucket_exists(&project_id, &bucket.name).await {
            Ok(true) => return StepResult::Success,
            Ok(false) => {}
            Err(e) => return cloud_failure(ctx, "bucket_exists", e),
        }
        match self.cloud.create_bucket(&project_id, &bucket).await {
            Ok(()) | Err(CloudError::AlreadyExists(_)) => StepResult::Success,
            Err(e) => cloud_failure(ctx, "create_bucket", e),
        }
    }

    // Deleting the project removes the bucket.
    async fn undo_step(&self, _ctx: &mut FlightContext) -> StepResult {
        StepResult::Success
    }
}

pub struct CreateNetworkStep {
    cloud: Arc<dyn CloudClient>,
    config: GcpProjectConfig,
    settings: ProjectStepSettings,
}

impl CreateNetworkStep {
    pub fn new(
        cloud: Arc<dyn CloudClient>,
        config: GcpProjectConfig,
        settings: ProjectStepSettings,
    ) -> Self {
        Self {
            cloud,
            config,
            settings,
        }
    }
}

#[async_trait]
impl Step for CreateNetworkStep {
    fn name(&self) -> &'static str {
        "CreateNetwork"
    }

    async fn do_step(&self, ctx: &mut FlightContext) -> StepResult {
        let project_id = step_try!(project_id(ctx));
        let network = &self.config.network.name;

        match self.cloud.network_exists(&project_id, network).await {
            Ok(true) => return StepResult::Success,
            Ok(false) => {}
            Err(e) => return cloud_failure(ctx, "network_exists", e),
        }

        let operation = match self.cloud.create_network(&project_id, network).await {
            Ok(operation) => operation,
            Err(CloudError::AlreadyExists(_)) => return StepResult::Success,
            Err(e) => return cloud_failure(ctx, "create_network", e),
        };
        match wait_for_operation(
            self.cloud.as_ref(),
            &operation,
            self.settings.operation_poll_interval,
            self.settings.operation_timeout,
        )
        .await
        {
            Ok(()) => StepResult::Success,
            Err(e) => cloud_failure(ctx, "create_network", e),
        }
    }

    async fn undo_step(&self, _ctx: &mut FlightContext) -> StepResult {
        StepResult::Success
    }
}

pub struct CreateFirewallRulesStep {
    cloud: Arc<dyn CloudClient>,
    config: GcpProjectConfig,
}

impl CreateFirewallRulesStep {
    pub fn new(cloud: Arc<dyn CloudClient>, config: GcpProjectConfig) -> Self {
        Self { cloud, config }
    }

    fn rules(&self) -> Vec<FirewallRule> {
        let network = &self.config.network.name;
        vec![
            FirewallRule {
                name: ALLOW_INTERNAL_RULE.to_string(),
                network: network.clone(),
                source_ranges: self.config.network.internal_source_ranges.clone(),
                allowed_protocols: vec!["tcp".to_string(), "udp".to_string(), "icmp".to_string()],
                allowed_ports: Vec::new(),
                target_tags: Vec::new(),
            },
            // HTTPS into notebook VMs tagged "leonardo".
            FirewallRule {
                name: LEONARDO_SSL_RULE.to_string(),
                network: network.clone(),
                source_ranges: vec!["0.0.0.0/0".to_string()],
                allowed_protocols: vec!["tcp".to_string()],
                allowed_ports: vec!["443".to_string()],
                target_tags: vec!["leonardo".to_string()],
            },
        ]
    }
}

#[async_trait]
impl Step for CreateFirewallRulesStep {
    fn name(&self) -> &'static str {
        "CreateFirewallRules"
    }

    async fn do_step(&self, ctx: &mut FlightContext) -> StepResult {
        let project_id = step_try!(project_id(ctx));
        for rule in self.rules() {
            match self.cloud.insert_firewall_rule(&project_id, &rule).await {
                Ok(()) | Err(CloudError::AlreadyExists(_)) => {}
                Err(e) => return cloud_failure(ctx, "insert_firewall_rule", e),
            }
        }
        StepResult::Success
    }

    async fn undo_step(&self, _ctx: &mut FlightContext) -> StepResult {
        StepResult::Success
    }
}

/// Deletes the project named by the resource's cloud descriptor.
pub struct DeleteProjectStep {
    cloud: Arc<dyn CloudClient>,
}

impl DeleteProjectStep {
    pub fn new(cloud: Arc<dyn CloudClient>) -> Self {
        Self { cloud }
    }
}

#[async_trait]
impl Step for DeleteProjectStep {
    fn name(&self) -> &'static str {
        "DeleteProject"
    }

    async fn do_step(&self, ctx: &mut FlightContext) -> StepResult {
        let uid: CloudResourceUid = step_try!(input(ctx, keys::CLOUD_RESOURCE_UID));
        let CloudResourceUid::GoogleProjectUid { project_id } = uid;
        delete_project_if_present(self.cloud.as_ref(), ctx, &project_id).await
    }

    async fn undo_step(&self, _ctx: &mut FlightContext) -> StepResult {
        // A deleted project cannot be brought back.
        StepResult::Success
    }
}
