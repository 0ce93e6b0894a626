// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cloud API seam used by the provisioning steps.
//!
//! Calls are slow and may fail transiently. Long-running mutations return an
//! [`Operation`] that the caller polls with [`wait_for_operation`].

pub mod mock;

pub use mock::MockCloud;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Cloud API errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CloudError {
    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Timeouts, 429s, 5xx. Worth retrying.
    #[error("transient cloud failure: {0}")]
    Transient(String),

    /// Quota, permission or validation failures.
    #[error("cloud request rejected: {0}")]
    Permanent(String),
}

pub type CloudResult<T> = std::result::Result<T, CloudError>;

/// Handle to a long-running cloud operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationStatus {
    Pending,
    Done,
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectLifecycle {
    Active,
    DeleteRequested,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectInfo {
    pub project_id: String,
    pub parent_folder_id: String,
    pub lifecycle: ProjectLifecycle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirewallRule {
    pub name: String,
    pub network: String,
    pub source_ranges: Vec<String>,
    pub allowed_protocols: Vec<String>,
    /// Empty means every port.
    pub allowed_ports: Vec<String>,
    /// Empty means every instance in the network.
    pub target_tags: Vec<String>,
}

/// Storage bucket to create in a project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketInfo {
    pub name: String,
    /// Objects older than this are deleted.
    pub delete_after_days: Option<u32>,
    /// Groups granted WRITER on the bucket.
    pub writer_groups: Vec<String>,
}

#[async_trait]
pub trait CloudClient: Send + Sync {
    async fn create_project(
        &self,
        project_id: &str,
        parent_folder_id: &str,
        labels: &BTreeMap<String, String>,
    ) -> CloudResult<Operation>;

    async fn get_project(&self, project_id: &str) -> CloudResult<Option<ProjectInfo>>;

    /// Request deletion. The project moves to `DeleteRequested`.
    async fn delete_project(&self, project_id: &str) -> CloudResult<()>;

    async fn set_billing_account(&self, project_id: &str, billing_account: &str)
    -> CloudResult<()>;

    /// Enabling an already enabled service is a no-op.
    async fn enable_services(&self, project_id: &str, services: &[String]) -> CloudResult<()>;

    async fn create_network(&self, project_id: &str, network: &str) -> CloudResult<Operation>;

    async fn network_exists(&self, project_id: &str, network: &str) -> CloudResult<bool>;

    async fn insert_firewall_rule(&self, project_id: &str, rule: &FirewallRule)
    -> CloudResult<()>;

    async fn bucket_exists(&self, project_id: &str, bucket: &str) -> CloudResult<bool>;

    async fn create_bucket(&self, project_id: &str, bucket: &BucketInfo) -> CloudResult<()>;

    async fn poll_operation(&self, operation: &Operation) -> CloudResult<OperationStatus>;
}

/// Poll an operation until it finishes or `timeout` elapses.
///
/// A timeout is reported as [`CloudError::Transient`]: the operation may
/// still complete, and the retried step will find its result.
pub async fn wait_for_operation(
    cloud: &dyn CloudClient,
    operation: &Operation,
    poll_interval: Duration,
    timeout: Duration,
) -> CloudResult<()> {
    let poll = async {
        loop {
            match cloud.poll_operation(operation).await? {
                OperationStatus::Done => return Ok(()),
                OperationStatus::Failed(message) => return Err(CloudError::Permanent(message)),
                OperationStatus::Pending => tokio::time::sleep(poll_interval).await,
            }
        }
    };

    tokio::time::timeout(timeout, poll).await.map_err(|_| {
        CloudError::Transient(format!(
            "operation {} still pending after {:?}",
            operation.name, timeout
        ))
    })?
}
