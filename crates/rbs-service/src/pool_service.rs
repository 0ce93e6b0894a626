// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Pool administration.
//!
//! Pools come from static configuration and are reconciled into the store
//! once at startup. Sizes may change between deployments; resource configs
//! may not, because existing resources were built from them.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::info;

use crate::config::PoolConfig;
use crate::error::{Error, Result};
use crate::model::{
    GcpProjectConfig, Pool, PoolAndResourceStates, PoolId, PoolStatus, ResourceConfig,
    ResourceSpec, ResourceState,
};
use crate::store::BufferStore;

/// Services a project needs for the network and storage-logs steps.
const REQUIRED_GCP_SERVICES: &[&str] = &[
    "compute.googleapis.com",
    "storage-component.googleapis.com",
];

/// What `initialize` changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolChanges {
    pub created: Vec<PoolId>,
    pub resized: Vec<PoolId>,
    pub deactivated: Vec<PoolId>,
}

#[derive(Clone)]
pub struct PoolService {
    store: Arc<dyn BufferStore>,
}

impl PoolService {
    pub fn new(store: Arc<dyn BufferStore>) -> Self {
        Self { store }
    }

    /// Bring the stored pools in line with `configs`.
    ///
    /// New ids are created, changed sizes are updated and ACTIVE pools absent
    /// from `configs` are deactivated. A config whose resource config differs
    /// from the stored one, or that names a deactivated pool, is rejected
    /// before anything is written.
    pub async fn initialize(&self, configs: &[PoolConfig]) -> Result<PoolChanges> {
        let mut seen = HashSet::new();
        for config in configs {
            if !seen.insert(&config.pool_id) {
                return Err(Error::InvalidPoolConfig(format!(
                    "duplicate pool id {}",
                    config.pool_id
                )));
            }
            validate_resource_config(&config.resource_config)?;
        }

        let existing: HashMap<PoolId, Pool> = self
            .store
            .list_pools()
            .await?
            .into_iter()
            .map(|p| (p.id.clone(), p))
            .collect();

        let mut to_create = Vec::new();
        let mut to_resize = Vec::new();
        for config in configs {
            match existing.get(&config.pool_id) {
                None => to_create.push(Pool::new(
                    config.pool_id.clone(),
                    config.resource_config.clone(),
                    config.size,
                )),
                Some(pool) if pool.status == PoolStatus::Deactivated => {
                    return Err(Error::InvalidPoolConfig(format!(
                        "pool {} was deactivated and cannot be reused",
                        pool.id
                    )));
                }
                Some(pool) if pool.resource_config != config.resource_config => {
                    return Err(Error::InvalidPoolConfig(format!(
                        "resource config of pool {} changed",
                        pool.id
                    )));
                }
                Some(pool) if pool.size != config.size => {
                    to_resize.push((pool.id.clone(), config.size));
                }
                Some(_) => {}
            }
        }

        let mut changes = PoolChanges::default();

        if !to_create.is_empty() {
            self.store.create_pools(&to_create).await?;
            changes.created = to_create.into_iter().map(|p| p.id).collect();
        }

        for (pool_id, size) in to_resize {
            if self.store.update_pool_size(&pool_id, size).await? {
                changes.resized.push(pool_id);
            }
        }

        for pool in existing.values() {
            if pool.status == PoolStatus::Active
                && !seen.contains(&pool.id)
                && self.store.deactivate_pool(&pool.id).await?
            {
                changes.deactivated.push(pool.id.clone());
            }
        }

        info!(
            created = changes.created.len(),
            resized = changes.resized.len(),
            deactivated = changes.deactivated.len(),
            "Pools initialized"
        );
        Ok(changes)
    }

    /// Pool configuration with its resource counts per state.
    ///
    /// Definition and counts come from the same snapshot row.
    pub async fn pool_info(&self, pool_id: &PoolId) -> Result<PoolAndResourceStates> {
        self.store
            .list_pools_with_resource_counts()
            .await?
            .into_iter()
            .find(|entry| entry.pool.id == *pool_id)
            .ok_or_else(|| Error::PoolNotFound(pool_id.clone()))
    }

    pub async fn update_pool_size(&self, pool_id: &PoolId, size: u32) -> Result<()> {
        if !self.store.update_pool_size(pool_id, size).await? {
            return Err(Error::PoolNotFound(pool_id.clone()));
        }
        info!(pool_id = %pool_id, size, "Pool size updated");
        Ok(())
    }

    /// Deactivate a pool. Its READY resources are drained by the scheduler.
    ///
    /// Returns false if the pool was already deactivated.
    pub async fn deactivate_pool(&self, pool_id: &PoolId) -> Result<bool> {
        if self.store.deactivate_pool(pool_id).await? {
            info!(pool_id = %pool_id, "Pool deactivated");
            return Ok(true);
        }
        match self.store.get_pool(pool_id).await? {
            Some(_) => Ok(false),
            None => Err(Error::PoolNotFound(pool_id.clone())),
        }
    }

    /// Number of READY resources in a pool.
    pub async fn ready_count(&self, pool_id: &PoolId) -> Result<u32> {
        Ok(self.pool_info(pool_id).await?.counts.get(ResourceState::Ready))
    }
}

fn validate_resource_config(config: &ResourceConfig) -> Result<()> {
    match &config.spec {
        ResourceSpec::GcpProjectConfig(gcp) => validate_gcp_project_config(&config.config_name, gcp),
    }
}

fn validate_gcp_project_config(config_name: &str, gcp: &GcpProjectConfig) -> Result<()> {
    if gcp.billing_account.is_empty() {
        return Err(Error::InvalidPoolConfig(format!(
            "missing billing account for config {}",
            config_name
        )));
    }
    if gcp.project_id_prefix.is_empty() {
        return Err(Error::InvalidPoolConfig(format!(
            "missing project id prefix for config {}",
            config_name
        )));
    }
    for service in REQUIRED_GCP_SERVICES {
        if !gcp.enabled_apis.iter().any(|api| api == service) {
            return Err(Error::InvalidPoolConfig(format!(
                "config {} must enable {}",
                config_name, service
            )));
        }
    }
    Ok(())
}
