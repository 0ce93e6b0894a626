// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Flight submission factory.
//!
//! Maps a resource type and an operation to the step sequence that performs
//! it. The mapping lives in a [`FlightRegistry`] built once at startup and
//! never mutated. The factory also acts as the engine's
//! [`FlightResolver`], so a resumed flight gets the same steps it was
//! submitted with.

pub mod google_project;
pub mod steps;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use rbs_flight::{FlightError, FlightMap, FlightResolver, FlightSubmission, StepEntry};

use crate::cloud::CloudClient;
use crate::error::{Error, Result};
use crate::model::{Pool, Resource, ResourceConfig, ResourceId, ResourceType};
use crate::store::{BufferStore, StoreError};

pub use google_project::{GoogleProjectFlights, ProjectStepSettings};

/// Flight map keys shared by the factory and the steps.
pub mod keys {
    pub const RESOURCE_ID: &str = "ResourceId";
    pub const POOL_ID: &str = "PoolId";
    pub const RESOURCE_TYPE: &str = "ResourceType";
    pub const RESOURCE_CONFIG: &str = "ResourceConfig";
    pub const CLOUD_RESOURCE_UID: &str = "CloudResourceUid";
    pub const GOOGLE_PROJECT_ID: &str = "GoogleProjectId";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlightOperation {
    Create,
    Delete,
}

impl FlightOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Delete => "delete",
        }
    }
}

/// Engine-level flight kind, e.g. `GOOGLE_PROJECT.create`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlightKind {
    pub resource_type: ResourceType,
    pub operation: FlightOperation,
}

impl FlightKind {
    pub fn parse(s: &str) -> Option<Self> {
        let (resource_type, operation) = s.split_once('.')?;
        let operation = match operation {
            "create" => FlightOperation::Create,
            "delete" => FlightOperation::Delete,
            _ => return None,
        };
        Some(Self {
            resource_type: ResourceType::parse(resource_type)?,
            operation,
        })
    }
}

impl fmt::Display for FlightKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.resource_type, self.operation.as_str())
    }
}

/// Step sequences for one resource type.
pub trait FlightTemplate: Send + Sync {
    /// Steps that provision one resource of a pool with `config`.
    fn creation_steps(&self, config: &ResourceConfig) -> rbs_flight::Result<Vec<StepEntry>>;

    /// Steps that tear down one READY resource.
    fn deletion_steps(&self) -> rbs_flight::Result<Vec<StepEntry>>;
}

/// Immutable resource type -> template table.
#[derive(Clone, Default)]
pub struct FlightRegistry {
    templates: HashMap<ResourceType, Arc<dyn FlightTemplate>>,
}

impl FlightRegistry {
    pub fn builder() -> FlightRegistryBuilder {
        FlightRegistryBuilder::default()
    }

    /// Registry with a template for every resource type.
    pub fn standard(
        store: Arc<dyn BufferStore>,
        cloud: Arc<dyn CloudClient>,
        settings: ProjectStepSettings,
    ) -> Self {
        let mut builder = Self::builder();
        for resource_type in ResourceType::ALL {
            let template: Arc<dyn FlightTemplate> = match resource_type {
                ResourceType::GoogleProject => Arc::new(GoogleProjectFlights::new(
                    store.clone(),
                    cloud.clone(),
                    settings.clone(),
                )),
            };
            builder = builder.register(resource_type, template);
        }
        builder.build()
    }

    pub fn template(&self, resource_type: ResourceType) -> Option<&Arc<dyn FlightTemplate>> {
        self.templates.get(&resource_type)
    }
}

#[derive(Default)]
pub struct FlightRegistryBuilder {
    templates: HashMap<ResourceType, Arc<dyn FlightTemplate>>,
}

impl FlightRegistryBuilder {
    pub fn register(mut self, resource_type: ResourceType, template: Arc<dyn FlightTemplate>) -> Self {
        self.templates.insert(resource_type, template);
        self
    }

    pub fn build(self) -> FlightRegistry {
        FlightRegistry {
            templates: self.templates,
        }
    }
}

/// Builds flight submissions and resolves their steps.
pub struct FlightSubmissionFactory {
    registry: FlightRegistry,
}

impl FlightSubmissionFactory {
    pub fn new(registry: FlightRegistry) -> Self {
        Self { registry }
    }

    /// Submission that creates `resource_id` in `pool`.
    pub fn creation_submission(
        &self,
        pool: &Pool,
        resource_id: &ResourceId,
    ) -> Result<FlightSubmission> {
        self.require_template(pool.resource_type)?;
        let kind = FlightKind {
            resource_type: pool.resource_type,
            operation: FlightOperation::Create,
        };
        let input = FlightMap::new()
            .with(keys::RESOURCE_ID, resource_id)?
            .with(keys::POOL_ID, &pool.id)?
            .with(keys::RESOURCE_TYPE, &pool.resource_type)?
            .with(keys::RESOURCE_CONFIG, &pool.resource_config)?;
        Ok(FlightSubmission::new(kind.to_string(), input))
    }

    /// Submission that deletes a READY `resource`.
    pub fn deletion_submission(
        &self,
        resource: &Resource,
        resource_type: ResourceType,
    ) -> Result<FlightSubmission> {
        self.require_template(resource_type)?;
        let uid = resource.cloud_resource_uid.as_ref().ok_or_else(|| {
            Error::Store(StoreError::InvalidRecord(format!(
                "resource {} has no cloud descriptor",
                resource.id
            )))
        })?;
        let kind = FlightKind {
            resource_type,
            operation: FlightOperation::Delete,
        };
        let input = FlightMap::new()
            .with(keys::RESOURCE_ID, &resource.id)?
            .with(keys::POOL_ID, &resource.pool_id)?
            .with(keys::RESOURCE_TYPE, &resource_type)?
            .with(keys::CLOUD_RESOURCE_UID, uid)?;
        Ok(FlightSubmission::new(kind.to_string(), input))
    }

    /// Ordered steps for a flight kind, parameterized from its input.
    pub fn steps(&self, kind: FlightKind, input: &FlightMap) -> rbs_flight::Result<Vec<StepEntry>> {
        let template = self
            .registry
            .template(kind.resource_type)
            .ok_or_else(|| FlightError::UnknownFlightKind(kind.to_string()))?;
        match kind.operation {
            FlightOperation::Create => {
                let config: ResourceConfig = input.require(keys::RESOURCE_CONFIG)?;
                template.creation_steps(&config)
            }
            FlightOperation::Delete => template.deletion_steps(),
        }
    }

    fn require_template(&self, resource_type: ResourceType) -> Result<()> {
        match self.registry.template(resource_type) {
            Some(_) => Ok(()),
            None => Err(Error::UnsupportedResourceType(resource_type)),
        }
    }
}

impl FlightResolver for FlightSubmissionFactory {
    fn resolve(&self, kind: &str, input: &FlightMap) -> rbs_flight::Result<Vec<StepEntry>> {
        let kind =
            FlightKind::parse(kind).ok_or_else(|| FlightError::UnknownFlightKind(kind.to_string()))?;
        self.steps(kind, input)
    }
}
