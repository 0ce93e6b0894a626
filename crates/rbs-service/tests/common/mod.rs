// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared test harness: in-memory SQLite store and flight databases, the
//! mock cloud and fast retry settings.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rbs_flight::persistence::SqliteFlightPersistence;
use rbs_flight::{EngineConfig, FlightEngine, FlightRecord, FlightStatus, RetryRule};
use rbs_service::cloud::MockCloud;
use rbs_service::flights::{FlightRegistry, FlightSubmissionFactory, ProjectStepSettings};
use rbs_service::model::{
    CloudResourceUid, GcpProjectConfig, NetworkConfig, Pool, PoolAndResourceStates, PoolId,
    RequestHandoutId, Resource, ResourceConfig, ResourceId, ResourceSpec, ResourceState,
};
use rbs_service::store::{
    BufferStore, PendingResourceInsert, SqliteStore, StoreError, StoreResult,
};
use rbs_service::{
    FlightManager, FlightScheduler, FlightSchedulerConfig, HandoutService, PoolService,
};
use sqlx::sqlite::SqlitePoolOptions;

pub const WAIT: Duration = Duration::from_secs(10);

pub async fn sqlite_store() -> Arc<SqliteStore> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to open in-memory SQLite");
    rbs_service::migrations::run_sqlite(&pool)
        .await
        .expect("Failed to run store migrations");
    Arc::new(SqliteStore::new(pool))
}

pub async fn sqlite_flights() -> Arc<SqliteFlightPersistence> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to open in-memory SQLite");
    rbs_flight::migrations::run_sqlite(&pool)
        .await
        .expect("Failed to run flight migrations");
    Arc::new(SqliteFlightPersistence::new(pool))
}

pub fn gcp_config(prefix: &str) -> ResourceConfig {
    ResourceConfig {
        config_name: format!("{}_v1", prefix),
        spec: ResourceSpec::GcpProjectConfig(GcpProjectConfig {
            project_id_prefix: prefix.to_string(),
            parent_folder_id: "637868962543".to_string(),
            billing_account: "01A82E-CA8A14-367457".to_string(),
            enabled_apis: vec![
                "compute.googleapis.com".to_string(),
                "storage-component.googleapis.com".to_string(),
            ],
            labels: [("env".to_string(), "test".to_string())].into_iter().collect(),
            network: NetworkConfig::default(),
        }),
    }
}

pub fn fast_step_settings() -> ProjectStepSettings {
    ProjectStepSettings {
        operation_poll_interval: Duration::from_millis(5),
        operation_timeout: Duration::from_secs(2),
        cloud_retry: RetryRule::fixed(Duration::from_millis(10), 3),
        store_retry: RetryRule::fixed(Duration::from_millis(10), 3),
    }
}

pub fn fast_engine_config() -> EngineConfig {
    EngineConfig {
        max_concurrent_flights: 8,
        completion_poll_interval: Duration::from_millis(20),
        persistence_retry: RetryRule::fixed(Duration::from_millis(10), 3),
        ..Default::default()
    }
}

pub struct Harness {
    pub store: Arc<dyn BufferStore>,
    pub cloud: Arc<MockCloud>,
    pub engine: FlightEngine,
    pub manager: FlightManager,
    pub handout: HandoutService,
    pub pools: PoolService,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_store(sqlite_store().await, MockCloud::new()).await
    }

    pub async fn with_store(store: Arc<dyn BufferStore>, cloud: MockCloud) -> Self {
        Self::with_engine_config(store, cloud, fast_engine_config()).await
    }

    pub async fn with_engine_config(
        store: Arc<dyn BufferStore>,
        cloud: MockCloud,
        engine_config: EngineConfig,
    ) -> Self {
        let cloud = Arc::new(cloud);
        let registry = FlightRegistry::standard(store.clone(), cloud.clone(), fast_step_settings());
        let factory = Arc::new(FlightSubmissionFactory::new(registry));
        let engine = FlightEngine::builder()
            .persistence(sqlite_flights().await)
            .resolver(factory.clone())
            .config(engine_config)
            .build()
            .expect("Failed to build engine");
        let manager = FlightManager::new(store.clone(), factory, engine.clone());

        Self {
            handout: HandoutService::new(store.clone()),
            pools: PoolService::new(store.clone()),
            store,
            cloud,
            engine,
            manager,
        }
    }

    pub fn scheduler(&self, creation_limit: u32, deletion_limit: u32) -> FlightScheduler {
        FlightScheduler::new(
            self.store.clone(),
            self.manager.clone(),
            FlightSchedulerConfig {
                enabled: true,
                period: Duration::from_millis(50),
                creation_limit_per_pool: creation_limit,
                deletion_limit_per_pool: deletion_limit,
            },
        )
    }

    pub async fn create_pool(&self, id: &str, size: u32) -> Pool {
        let pool = Pool::new(PoolId::new(id), gcp_config("aou-rb"), size);
        self.store
            .create_pools(std::slice::from_ref(&pool))
            .await
            .expect("Failed to create pool");
        pool
    }

    pub async fn await_flight(&self, flight_id: &str) -> FlightRecord {
        self.engine
            .await_completion(flight_id, WAIT)
            .await
            .expect("Flight did not finish")
    }

    /// Run creation flights to completion and return the READY resources.
    pub async fn create_ready_resources(&self, pool: &Pool, count: usize) -> Vec<Resource> {
        let mut resources = Vec::new();
        for _ in 0..count {
            let flight_id = self
                .manager
                .submit_creation_flight(pool)
                .await
                .expect("Failed to submit creation flight")
                .expect("Creation flight was skipped");
            let record = self.await_flight(&flight_id).await;
            assert_eq!(record.status, FlightStatus::Success, "{:?}", record.error);
            let resource_id: ResourceId = record.input.require("ResourceId").unwrap();
            resources.push(self.store.get_resource(&resource_id).await.unwrap().unwrap());
        }
        resources
    }

    pub async fn counts(&self, pool_id: &PoolId) -> PoolAndResourceStates {
        self.pools.pool_info(pool_id).await.expect("Failed to read pool")
    }

    pub async fn state_count(&self, pool_id: &PoolId, state: ResourceState) -> u32 {
        self.counts(pool_id).await.counts.get(state)
    }
}

pub fn project_id(resource: &Resource) -> String {
    match resource.cloud_resource_uid.as_ref().expect("no cloud descriptor") {
        CloudResourceUid::GoogleProjectUid { project_id } => project_id.clone(),
    }
}

/// Store wrapper that fails selected calls a set number of times.
pub struct FlakyStore {
    inner: Arc<dyn BufferStore>,
    mark_deleted_failures: AtomicU32,
    snapshot_failures: AtomicU32,
    begin_create_failures: AtomicU32,
    get_pool_failures: AtomicU32,
}

impl FlakyStore {
    pub fn new(inner: Arc<dyn BufferStore>) -> Self {
        Self {
            inner,
            mark_deleted_failures: AtomicU32::new(0),
            snapshot_failures: AtomicU32::new(0),
            begin_create_failures: AtomicU32::new(0),
            get_pool_failures: AtomicU32::new(0),
        }
    }

    /// `mark_resource_deleted` fails with a non-retryable error.
    pub fn fail_mark_deleted(self, times: u32) -> Self {
        self.mark_deleted_failures.store(times, Ordering::SeqCst);
        self
    }

    /// `list_pools_with_resource_counts` reports the store as unavailable.
    pub fn fail_snapshot(self, times: u32) -> Self {
        self.snapshot_failures.store(times, Ordering::SeqCst);
        self
    }

    /// `begin_create_resource` reports the store as unavailable.
    pub fn fail_begin_create(self, times: u32) -> Self {
        self.begin_create_failures.store(times, Ordering::SeqCst);
        self
    }

    pub fn snapshot_failures_left(&self) -> u32 {
        self.snapshot_failures.load(Ordering::SeqCst)
    }

    /// `get_pool` reports the store as unavailable.
    pub fn fail_get_pool(self, times: u32) -> Self {
        self.get_pool_failures.store(times, Ordering::SeqCst);
        self
    }
}

fn take_failure(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
        .is_ok()
}

fn unavailable(call: &str) -> StoreError {
    StoreError::Unavailable(format!("injected {} failure", call))
}

#[async_trait]
impl BufferStore for FlakyStore {
    async fn create_pools(&self, pools: &[Pool]) -> StoreResult<()> {
        self.inner.create_pools(pools).await
    }

    async fn get_pool(&self, pool_id: &PoolId) -> StoreResult<Option<Pool>> {
        if take_failure(&self.get_pool_failures) {
            return Err(unavailable("get_pool"));
        }
        self.inner.get_pool(pool_id).await
    }

    async fn list_pools(&self) -> StoreResult<Vec<Pool>> {
        self.inner.list_pools().await
    }

    async fn list_pools_with_resource_counts(&self) -> StoreResult<Vec<PoolAndResourceStates>> {
        if take_failure(&self.snapshot_failures) {
            return Err(unavailable("list_pools_with_resource_counts"));
        }
        self.inner.list_pools_with_resource_counts().await
    }

    async fn update_pool_size(&self, pool_id: &PoolId, size: u32) -> StoreResult<bool> {
        self.inner.update_pool_size(pool_id, size).await
    }

    async fn deactivate_pool(&self, pool_id: &PoolId) -> StoreResult<bool> {
        self.inner.deactivate_pool(pool_id).await
    }

    async fn begin_create_resource(
        &self,
        resource: &Resource,
    ) -> StoreResult<Option<Box<dyn PendingResourceInsert>>> {
        if take_failure(&self.begin_create_failures) {
            return Err(unavailable("begin_create_resource"));
        }
        self.inner.begin_create_resource(resource).await
    }

    async fn get_resource(&self, id: &ResourceId) -> StoreResult<Option<Resource>> {
        self.inner.get_resource(id).await
    }

    async fn get_resource_by_handout_id(
        &self,
        pool_id: &PoolId,
        request_handout_id: &RequestHandoutId,
    ) -> StoreResult<Option<Resource>> {
        self.inner
            .get_resource_by_handout_id(pool_id, request_handout_id)
            .await
    }

    async fn list_resources(
        &self,
        pool_id: &PoolId,
        state: ResourceState,
        limit: u32,
    ) -> StoreResult<Vec<Resource>> {
        self.inner.list_resources(pool_id, state, limit).await
    }

    async fn claim_ready_resource(
        &self,
        pool_id: &PoolId,
        request_handout_id: &RequestHandoutId,
    ) -> StoreResult<Option<Resource>> {
        self.inner.claim_ready_resource(pool_id, request_handout_id).await
    }

    async fn mark_resource_ready(
        &self,
        id: &ResourceId,
        cloud_resource_uid: &CloudResourceUid,
    ) -> StoreResult<bool> {
        self.inner.mark_resource_ready(id, cloud_resource_uid).await
    }

    async fn mark_resource_handed_out(
        &self,
        id: &ResourceId,
        request_handout_id: &RequestHandoutId,
    ) -> StoreResult<bool> {
        self.inner.mark_resource_handed_out(id, request_handout_id).await
    }

    async fn mark_resource_deleting(&self, id: &ResourceId, flight_id: &str) -> StoreResult<bool> {
        self.inner.mark_resource_deleting(id, flight_id).await
    }

    async fn revert_resource_to_ready(&self, id: &ResourceId, flight_id: &str) -> StoreResult<bool> {
        self.inner.revert_resource_to_ready(id, flight_id).await
    }

    async fn mark_resource_deleted(&self, id: &ResourceId) -> StoreResult<bool> {
        if take_failure(&self.mark_deleted_failures) {
            return Err(StoreError::ConstraintViolation(
                "injected mark_resource_deleted failure".to_string(),
            ));
        }
        self.inner.mark_resource_deleted(id).await
    }

    async fn deleting_flight_id(&self, id: &ResourceId) -> StoreResult<Option<String>> {
        self.inner.deleting_flight_id(id).await
    }

    async fn delete_resource(&self, id: &ResourceId) -> StoreResult<bool> {
        self.inner.delete_resource(id).await
    }

    async fn health_check(&self) -> StoreResult<()> {
        self.inner.health_check().await
    }
}
