// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Pools, resources and their lifecycle states.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Pool identifier, chosen by whoever defines the pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PoolId(String);

impl PoolId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(Uuid);

impl ResourceId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn uuid(&self) -> Uuid {
        self.0
    }

    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl From<Uuid> for ResourceId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Client-supplied idempotency key for a handout.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestHandoutId(String);

impl RequestHandoutId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestHandoutId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PoolStatus {
    Active,
    /// Terminal. The pool is drained and never refilled.
    Deactivated,
}

impl PoolStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Deactivated => "DEACTIVATED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ACTIVE" => Some(Self::Active),
            "DEACTIVATED" => Some(Self::Deactivated),
            _ => None,
        }
    }
}

/// Resource lifecycle.
///
/// ```text
/// CREATING -> READY -> HANDED_OUT
/// CREATING -> (row deleted on rollback)
/// READY -> DELETING -> DELETED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceState {
    Creating,
    Ready,
    HandedOut,
    Deleting,
    Deleted,
}

impl ResourceState {
    pub const ALL: [ResourceState; 5] = [
        Self::Creating,
        Self::Ready,
        Self::HandedOut,
        Self::Deleting,
        Self::Deleted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Creating => "CREATING",
            Self::Ready => "READY",
            Self::HandedOut => "HANDED_OUT",
            Self::Deleting => "DELETING",
            Self::Deleted => "DELETED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CREATING" => Some(Self::Creating),
            "READY" => Some(Self::Ready),
            "HANDED_OUT" => Some(Self::HandedOut),
            "DELETING" => Some(Self::Deleting),
            "DELETED" => Some(Self::Deleted),
            _ => None,
        }
    }
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of cloud resource a pool holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceType {
    GoogleProject,
}

impl ResourceType {
    pub const ALL: [ResourceType; 1] = [Self::GoogleProject];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GoogleProject => "GOOGLE_PROJECT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "GOOGLE_PROJECT" => Some(Self::GoogleProject),
            _ => None,
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provisioning settings for a Google project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GcpProjectConfig {
    /// Generated project ids start with this prefix.
    pub project_id_prefix: String,
    /// Folder the projects are created under.
    pub parent_folder_id: String,
    pub billing_account: String,
    #[serde(default)]
    pub enabled_apis: Vec<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub network: NetworkConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfig {
    pub name: String,
    /// Source ranges allowed in by the internal firewall rule.
    pub internal_source_ranges: Vec<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            name: "network".to_string(),
            internal_source_ranges: vec!["10.128.0.0/9".to_string()],
        }
    }
}

/// Type-specific provisioning spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResourceSpec {
    GcpProjectConfig(GcpProjectConfig),
}

/// Immutable provisioning configuration of a pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceConfig {
    pub config_name: String,
    #[serde(flatten)]
    pub spec: ResourceSpec,
}

impl ResourceConfig {
    pub fn resource_type(&self) -> ResourceType {
        match self.spec {
            ResourceSpec::GcpProjectConfig(_) => ResourceType::GoogleProject,
        }
    }
}

/// Describes the cloud object a READY resource stands for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CloudResourceUid {
    #[serde(rename_all = "camelCase")]
    GoogleProjectUid { project_id: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pool {
    pub id: PoolId,
    pub resource_type: ResourceType,
    pub resource_config: ResourceConfig,
    pub size: u32,
    pub status: PoolStatus,
    pub creation: DateTime<Utc>,
    /// Set when the pool is deactivated.
    pub expiration: Option<DateTime<Utc>>,
}

impl Pool {
    /// A new ACTIVE pool whose type follows its config.
    pub fn new(id: PoolId, resource_config: ResourceConfig, size: u32) -> Self {
        Self {
            id,
            resource_type: resource_config.resource_type(),
            resource_config,
            size,
            status: PoolStatus::Active,
            creation: Utc::now(),
            expiration: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub id: ResourceId,
    pub pool_id: PoolId,
    pub state: ResourceState,
    pub creation: DateTime<Utc>,
    pub handout_time: Option<DateTime<Utc>>,
    pub deletion: Option<DateTime<Utc>>,
    pub request_handout_id: Option<RequestHandoutId>,
    pub cloud_resource_uid: Option<CloudResourceUid>,
}

impl Resource {
    /// A fresh CREATING resource with no cloud descriptor.
    pub fn creating(id: ResourceId, pool_id: PoolId) -> Self {
        Self {
            id,
            pool_id,
            state: ResourceState::Creating,
            creation: Utc::now(),
            handout_time: None,
            deletion: None,
            request_handout_id: None,
            cloud_resource_uid: None,
        }
    }
}

/// Resource counts per state. Missing states count as zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceStateCounts(BTreeMap<ResourceState, u32>);

impl ResourceStateCounts {
    pub fn get(&self, state: ResourceState) -> u32 {
        self.0.get(&state).copied().unwrap_or(0)
    }

    pub fn set(&mut self, state: ResourceState, count: u32) {
        self.0.insert(state, count);
    }

    pub fn iter(&self) -> impl Iterator<Item = (ResourceState, u32)> + '_ {
        self.0.iter().map(|(s, c)| (*s, *c))
    }
}

impl FromIterator<(ResourceState, u32)> for ResourceStateCounts {
    fn from_iter<I: IntoIterator<Item = (ResourceState, u32)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A pool together with its resource counts, read in one snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolAndResourceStates {
    pub pool: Pool,
    pub counts: ResourceStateCounts,
}
