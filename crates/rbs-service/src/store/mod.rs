// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Resource/pool store.
//!
//! The store is the single source of truth for pool and resource state.
//! Every state transition is a single conditional `UPDATE` whose row count
//! tells the caller whether it won; losing such a race is reported as
//! `false`, never as an error.

pub mod postgres;
pub mod sqlite;

pub use self::postgres::PostgresStore;
pub use self::sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::{
    CloudResourceUid, Pool, PoolAndResourceStates, PoolId, PoolStatus, RequestHandoutId,
    Resource, ResourceConfig, ResourceId, ResourceState, ResourceStateCounts, ResourceType,
};

/// Store errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// A unique key already exists.
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// A foreign key, not-null or check constraint rejected the write.
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// The database could not be reached or the statement failed. Retry
    /// with backoff.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A stored row could not be decoded.
    #[error("Invalid record: {0}")]
    InvalidRecord(String),
}

impl StoreError {
    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, Self::DuplicateKey(_) | Self::ConstraintViolation(_))
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) => match db.kind() {
                sqlx::error::ErrorKind::UniqueViolation => StoreError::DuplicateKey(db.to_string()),
                sqlx::error::ErrorKind::ForeignKeyViolation
                | sqlx::error::ErrorKind::NotNullViolation
                | sqlx::error::ErrorKind::CheckViolation => {
                    StoreError::ConstraintViolation(db.to_string())
                }
                _ => StoreError::Unavailable(err.to_string()),
            },
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                StoreError::InvalidRecord(err.to_string())
            }
            _ => StoreError::Unavailable(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::InvalidRecord(err.to_string())
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// A CREATING resource inserted inside an open transaction.
///
/// Dropping it without calling either method rolls the insert back.
#[async_trait]
pub trait PendingResourceInsert: Send {
    async fn commit(self: Box<Self>) -> StoreResult<()>;
    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}

#[async_trait]
pub trait BufferStore: Send + Sync {
    /// Insert pools in one transaction. Any existing id fails the whole batch
    /// with `DuplicateKey`.
    async fn create_pools(&self, pools: &[Pool]) -> StoreResult<()>;

    async fn get_pool(&self, pool_id: &PoolId) -> StoreResult<Option<Pool>>;

    async fn list_pools(&self) -> StoreResult<Vec<Pool>>;

    /// Every pool with its resource counts per state, from one statement.
    async fn list_pools_with_resource_counts(&self) -> StoreResult<Vec<PoolAndResourceStates>>;

    /// Returns false if the pool does not exist.
    async fn update_pool_size(&self, pool_id: &PoolId, size: u32) -> StoreResult<bool>;

    /// ACTIVE -> DEACTIVATED. Returns false if the pool is missing or was
    /// already deactivated.
    async fn deactivate_pool(&self, pool_id: &PoolId) -> StoreResult<bool>;

    /// Insert a CREATING resource and keep the transaction open.
    ///
    /// The insert only happens while the owning pool is ACTIVE; `None` means
    /// the pool is gone or deactivated and nothing was written.
    async fn begin_create_resource(
        &self,
        resource: &Resource,
    ) -> StoreResult<Option<Box<dyn PendingResourceInsert>>>;

    /// Insert a CREATING resource and commit.
    async fn create_resource(&self, resource: &Resource) -> StoreResult<()> {
        match self.begin_create_resource(resource).await? {
            Some(pending) => pending.commit().await,
            None => Err(StoreError::ConstraintViolation(format!(
                "pool {} is not active",
                resource.pool_id
            ))),
        }
    }

    async fn get_resource(&self, id: &ResourceId) -> StoreResult<Option<Resource>>;

    /// De-duplication lookup for handouts.
    async fn get_resource_by_handout_id(
        &self,
        pool_id: &PoolId,
        request_handout_id: &RequestHandoutId,
    ) -> StoreResult<Option<Resource>>;

    /// Up to `limit` resources of a pool in `state`, in no particular order.
    ///
    /// This is a plain read. Callers claim what they pick through one of the
    /// conditional transitions below.
    async fn list_resources(
        &self,
        pool_id: &PoolId,
        state: ResourceState,
        limit: u32,
    ) -> StoreResult<Vec<Resource>>;

    /// Atomically pick one READY resource of the pool and hand it out under
    /// `request_handout_id`. `None` when no READY resource is left.
    async fn claim_ready_resource(
        &self,
        pool_id: &PoolId,
        request_handout_id: &RequestHandoutId,
    ) -> StoreResult<Option<Resource>>;

    /// CREATING -> READY, attaching the cloud descriptor.
    async fn mark_resource_ready(
        &self,
        id: &ResourceId,
        cloud_resource_uid: &CloudResourceUid,
    ) -> StoreResult<bool>;

    /// READY -> HANDED_OUT.
    async fn mark_resource_handed_out(
        &self,
        id: &ResourceId,
        request_handout_id: &RequestHandoutId,
    ) -> StoreResult<bool>;

    /// READY -> DELETING, recording the deleting flight as owner.
    async fn mark_resource_deleting(&self, id: &ResourceId, flight_id: &str) -> StoreResult<bool>;

    /// DELETING -> READY, only for the owning flight.
    async fn revert_resource_to_ready(&self, id: &ResourceId, flight_id: &str) -> StoreResult<bool>;

    /// DELETING -> DELETED.
    async fn mark_resource_deleted(&self, id: &ResourceId) -> StoreResult<bool>;

    /// Flight currently holding a DELETING resource.
    async fn deleting_flight_id(&self, id: &ResourceId) -> StoreResult<Option<String>>;

    /// Hard delete.
    async fn delete_resource(&self, id: &ResourceId) -> StoreResult<bool>;

    async fn health_check(&self) -> StoreResult<()>;
}

// Row shapes shared by both backends.

const POOL_COLUMNS: &str = "id, resource_type, resource_config, size, status, creation, expiration";

const RESOURCE_COLUMNS: &str = "id, pool_id, state, creation, handout_time, deletion, \
     request_handout_id, cloud_resource_uid";

#[derive(Debug, sqlx::FromRow)]
struct PoolRow {
    id: String,
    resource_type: String,
    resource_config: serde_json::Value,
    size: i32,
    status: String,
    creation: DateTime<Utc>,
    expiration: Option<DateTime<Utc>>,
}

impl TryFrom<PoolRow> for Pool {
    type Error = StoreError;

    fn try_from(row: PoolRow) -> StoreResult<Self> {
        let resource_type = ResourceType::parse(&row.resource_type).ok_or_else(|| {
            StoreError::InvalidRecord(format!("pool {} has type {}", row.id, row.resource_type))
        })?;
        let status = PoolStatus::parse(&row.status).ok_or_else(|| {
            StoreError::InvalidRecord(format!("pool {} has status {}", row.id, row.status))
        })?;
        let resource_config: ResourceConfig = serde_json::from_value(row.resource_config)?;

        Ok(Pool {
            id: PoolId::new(row.id),
            resource_type,
            resource_config,
            size: u32::try_from(row.size).unwrap_or(0),
            status,
            creation: row.creation,
            expiration: row.expiration,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PoolCountRow {
    #[sqlx(flatten)]
    pool: PoolRow,
    state: Option<String>,
    resource_count: i64,
}

/// Fold `pool LEFT JOIN resource GROUP BY pool, state` rows, ordered by pool
/// id, into one entry per pool.
fn fold_pool_counts(rows: Vec<PoolCountRow>) -> StoreResult<Vec<PoolAndResourceStates>> {
    let mut result: Vec<PoolAndResourceStates> = Vec::new();
    for row in rows {
        let state = match row.state.as_deref() {
            Some(s) => Some(ResourceState::parse(s).ok_or_else(|| {
                StoreError::InvalidRecord(format!("resource state {} in pool {}", s, row.pool.id))
            })?),
            None => None,
        };
        let count = u32::try_from(row.resource_count).unwrap_or(u32::MAX);

        let same_pool = result
            .last()
            .is_some_and(|last| last.pool.id.as_str() == row.pool.id);
        if !same_pool {
            result.push(PoolAndResourceStates {
                pool: Pool::try_from(row.pool)?,
                counts: ResourceStateCounts::default(),
            });
        }
        if let (Some(state), Some(entry)) = (state, result.last_mut()) {
            entry.counts.set(state, count);
        }
    }
    Ok(result)
}

#[derive(Debug, sqlx::FromRow)]
struct ResourceRow {
    id: String,
    pool_id: String,
    state: String,
    creation: DateTime<Utc>,
    handout_time: Option<DateTime<Utc>>,
    deletion: Option<DateTime<Utc>>,
    request_handout_id: Option<String>,
    cloud_resource_uid: Option<serde_json::Value>,
}

impl TryFrom<ResourceRow> for Resource {
    type Error = StoreError;

    fn try_from(row: ResourceRow) -> StoreResult<Self> {
        let id = ResourceId::parse(&row.id)
            .ok_or_else(|| StoreError::InvalidRecord(format!("resource id {}", row.id)))?;
        let state = ResourceState::parse(&row.state).ok_or_else(|| {
            StoreError::InvalidRecord(format!("resource {} has state {}", row.id, row.state))
        })?;
        let cloud_resource_uid = row
            .cloud_resource_uid
            .map(serde_json::from_value::<CloudResourceUid>)
            .transpose()?;

        Ok(Resource {
            id,
            pool_id: PoolId::new(row.pool_id),
            state,
            creation: row.creation,
            handout_time: row.handout_time,
            deletion: row.deletion,
            request_handout_id: row.request_handout_id.map(RequestHandoutId::new),
            cloud_resource_uid,
        })
    }
}

fn size_to_db(size: u32) -> StoreResult<i32> {
    i32::try_from(size).map_err(|_| StoreError::ConstraintViolation(format!("pool size {}", size)))
}

fn limit_to_db(limit: u32) -> i64 {
    i64::from(limit)
}

fn ensure_creating(resource: &Resource) -> StoreResult<()> {
    if resource.state != ResourceState::Creating || resource.cloud_resource_uid.is_some() {
        return Err(StoreError::ConstraintViolation(format!(
            "resource {} must be inserted as CREATING without a cloud descriptor",
            resource.id
        )));
    }
    Ok(())
}

fn uid_to_json(uid: &CloudResourceUid) -> StoreResult<serde_json::Value> {
    Ok(serde_json::to_value(uid)?)
}

fn config_to_json(config: &ResourceConfig) -> StoreResult<serde_json::Value> {
    Ok(serde_json::to_value(config)?)
}
