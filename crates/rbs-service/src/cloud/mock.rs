// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory cloud for tests and local runs.
//!
//! Failures are injected per API method with [`MockCloud::fail_next`]; each
//! injected error is returned once, in order.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use super::{
    BucketInfo, CloudClient, CloudError, CloudResult, FirewallRule, Operation,
    OperationStatus, ProjectInfo, ProjectLifecycle,
};

#[derive(Debug, Default)]
struct MockState {
    projects: HashMap<String, ProjectInfo>,
    billing: HashMap<String, String>,
    services: HashMap<String, HashSet<String>>,
    networks: HashSet<(String, String)>,
    firewall_rules: HashMap<String, Vec<FirewallRule>>,
    /// Bucket name -> (project id, bucket). Bucket names are global.
    buckets: HashMap<String, (String, BucketInfo)>,
    /// Operation name -> polls left before it reports done.
    operations: HashMap<String, u32>,
    failures: HashMap<&'static str, VecDeque<CloudError>>,
    calls: HashMap<&'static str, u32>,
}

/// Mock cloud for testing.
#[derive(Debug, Default)]
pub struct MockCloud {
    state: Mutex<MockState>,
    /// Polls an operation reports `Pending` before `Done`.
    pub operation_polls: u32,
}

impl MockCloud {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make operations stay pending for `polls` polls.
    pub fn with_operation_polls(mut self, polls: u32) -> Self {
        self.operation_polls = polls;
        self
    }

    /// Queue an error for the next call of `method` (e.g. `"create_project"`).
    pub fn fail_next(&self, method: &'static str, error: CloudError) {
        self.lock().failures.entry(method).or_default().push_back(error);
    }

    /// How many times `method` was called, failed calls included.
    pub fn call_count(&self, method: &'static str) -> u32 {
        self.lock().calls.get(method).copied().unwrap_or(0)
    }

    pub fn project(&self, project_id: &str) -> Option<ProjectInfo> {
        self.lock().projects.get(project_id).cloned()
    }

    /// Projects that exist and are not being deleted.
    pub fn active_projects(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .lock()
            .projects
            .values()
            .filter(|p| p.lifecycle == ProjectLifecycle::Active)
            .map(|p| p.project_id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn billing_account(&self, project_id: &str) -> Option<String> {
        self.lock().billing.get(project_id).cloned()
    }

    pub fn enabled_services(&self, project_id: &str) -> Vec<String> {
        let mut services: Vec<String> = self
            .lock()
            .services
            .get(project_id)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        services.sort();
        services
    }

    pub fn firewall_rules(&self, project_id: &str) -> Vec<FirewallRule> {
        self.lock()
            .firewall_rules
            .get(project_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn bucket(&self, bucket: &str) -> Option<BucketInfo> {
        self.lock().buckets.get(bucket).map(|(_, info)| info.clone())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Count the call and pop an injected failure, if any.
    fn enter(&self, method: &'static str) -> CloudResult<std::sync::MutexGuard<'_, MockState>> {
        let mut state = self.lock();
        *state.calls.entry(method).or_default() += 1;
        if let Some(error) = state.failures.get_mut(method).and_then(|q| q.pop_front()) {
            return Err(error);
        }
        Ok(state)
    }

    fn start_operation(&self, state: &mut MockState, kind: &str) -> Operation {
        let name = format!("operations/{}-{}", kind, Uuid::new_v4());
        state.operations.insert(name.clone(), self.operation_polls);
        Operation { name }
    }
}

fn require_active(state: &MockState, project_id: &str) -> CloudResult<()> {
    match state.projects.get(project_id) {
        Some(p) if p.lifecycle == ProjectLifecycle::Active => Ok(()),
        _ => Err(CloudError::NotFound(format!("projects/{}", project_id))),
    }
}

#[async_trait]
impl CloudClient for MockCloud {
    async fn create_project(
        &self,
        project_id: &str,
        parent_folder_id: &str,
        _labels: &BTreeMap<String, String>,
    ) -> CloudResult<Operation> {
        let mut state = self.enter("create_project")?;
        if state.projects.contains_key(project_id) {
            return Err(CloudError::AlreadyExists(format!("projects/{}", project_id)));
        }
        state.projects.insert(
            project_id.to_string(),
            ProjectInfo {
                project_id: project_id.to_string(),
                parent_folder_id: parent_folder_id.to_string(),
                lifecycle: ProjectLifecycle::Active,
            },
        );
        Ok(self.start_operation(&mut state, "create-project"))
    }

    async fn get_project(&self, project_id: &str) -> CloudResult<Option<ProjectInfo>> {
        let state = self.enter("get_project")?;
        Ok(state.projects.get(project_id).cloned())
    }

    async fn delete_project(&self, project_id: &str) -> CloudResult<()> {
        let mut state = self.enter("delete_project")?;
        match state.projects.get_mut(project_id) {
            Some(p) => {
                p.lifecycle = ProjectLifecycle::DeleteRequested;
                Ok(())
            }
            None => Err(CloudError::NotFound(format!("projects/{}", project_id))),
        }
    }

    async fn set_billing_account(
        &self,
        project_id: &str,
        billing_account: &str,
    ) -> CloudResult<()> {
        let mut state = self.enter("set_billing_account")?;
        require_active(&state, project_id)?;
        state
            .billing
            .insert(project_id.to_string(), billing_account.to_string());
        Ok(())
    }

    async fn enable_services(&self, project_id: &str, services: &[String]) -> CloudResult<()> {
        let mut state = self.enter("enable_services")?;
        require_active(&state, project_id)?;
        state
            .services
            .entry(project_id.to_string())
            .or_default()
            .extend(services.iter().cloned());
        Ok(())
    }

    async fn create_network(&self, project_id: &str, network: &str) -> CloudResult<Operation> {
        let mut state = self.enter("create_network")?;
        require_active(&state, project_id)?;
        let key = (project_id.to_string(), network.to_string());
        if state.networks.contains(&key) {
            return Err(CloudError::AlreadyExists(format!(
                "projects/{}/networks/{}",
                project_id, network
            )));
        }
        state.networks.insert(key);
        Ok(self.start_operation(&mut state, "create-network"))
    }

    async fn network_exists(&self, project_id: &str, network: &str) -> CloudResult<bool> {
        let state = self.enter("network_exists")?;
        Ok(state
            .networks
            .contains(&(project_id.to_string(), network.to_string())))
    }

    async fn insert_firewall_rule(
        &self,
        project_id: &str,
        rule: &FirewallRule,
    ) -> CloudResult<()> {
        let mut state = self.enter("insert_firewall_rule")?;
        require_active(&state, project_id)?;
        let rules = state
            .firewall_rules
            .entry(project_id.to_string())
            .or_default();
        if rules.iter().any(|r| r.name == rule.name) {
            return Err(CloudError::AlreadyExists(format!(
                "projects/{}/firewalls/{}",
                project_id, rule.name
            )));
        }
        rules.push(rule.clone());
        Ok(())
    }

    async fn bucket_exists(&self, project_id: &str, bucket: &str) -> CloudResult<bool> {
        let state = self.enter("bucket_exists")?;
        require_active(&state, project_id)?;
        Ok(state
            .buckets
            .get(bucket)
            .is_some_and(|(owner, _)| owner == project_id))
    }

    async fn create_bucket(&self, project_id: &str, bucket: &BucketInfo) -> CloudResult<()> {
        let mut state = self.enter("create_bucket")?;
        require_active(&state, project_id)?;
        if state.buckets.contains_key(&bucket.name) {
            return Err(CloudError::AlreadyExists(format!("b/{}", bucket.name)));
        }
        state
            .buckets
            .insert(bucket.name.clone(), (project_id.to_string(), bucket.clone()));
        Ok(())
    }

    async fn poll_operation(&self, operation: &Operation) -> CloudResult<OperationStatus> {
        let mut state = self.enter("poll_operation")?;
        match state.operations.get_mut(&operation.name) {
            Some(0) => Ok(OperationStatus::Done),
            Some(left) => {
                *left -= 1;
                Ok(OperationStatus::Pending)
            }
            None => Err(CloudError::NotFound(operation.name.clone())),
        }
    }
}
