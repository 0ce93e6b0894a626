// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for the resource buffer service.
//!
//! [`BufferRuntime`] wires the store, the flight engine and the scheduler
//! together so the service can run inside an existing tokio application.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use rbs_service::cloud::MockCloud;
//! use rbs_service::runtime::BufferRuntime;
//! use rbs_service::store::PostgresStore;
//! use rbs_flight::persistence::PostgresFlightPersistence;
//!
//! let runtime = BufferRuntime::builder()
//!     .store(Arc::new(PostgresStore::new(pool.clone())))
//!     .flight_persistence(Arc::new(PostgresFlightPersistence::new(pool)))
//!     .cloud(Arc::new(MockCloud::new()))
//!     .pool_configs(pool_configs)
//!     .build()?
//!     .start()
//!     .await?;
//!
//! let resource = runtime.handout().handout_resource(&pool_id, &request_id).await?;
//!
//! runtime.shutdown().await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use rbs_flight::{EngineConfig, FlightEngine, FlightPersistence};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::cloud::CloudClient;
use crate::config::PoolConfig;
use crate::flight_manager::FlightManager;
use crate::flights::{FlightRegistry, FlightSubmissionFactory, ProjectStepSettings};
use crate::handout::HandoutService;
use crate::pool_service::PoolService;
use crate::scheduler::{FlightScheduler, FlightSchedulerConfig};
use crate::store::BufferStore;

/// Builder for [`BufferRuntime`].
#[derive(Default)]
pub struct BufferRuntimeBuilder {
    store: Option<Arc<dyn BufferStore>>,
    flight_persistence: Option<Arc<dyn FlightPersistence>>,
    cloud: Option<Arc<dyn CloudClient>>,
    pool_configs: Vec<PoolConfig>,
    scheduler_config: FlightSchedulerConfig,
    engine_config: EngineConfig,
    step_settings: ProjectStepSettings,
    shutdown_grace: Option<Duration>,
}

impl BufferRuntimeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the pool/resource store (required).
    pub fn store(mut self, store: Arc<dyn BufferStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the flight persistence backend (required).
    pub fn flight_persistence(mut self, persistence: Arc<dyn FlightPersistence>) -> Self {
        self.flight_persistence = Some(persistence);
        self
    }

    /// Set the cloud client used by the flight steps (required).
    pub fn cloud(mut self, cloud: Arc<dyn CloudClient>) -> Self {
        self.cloud = Some(cloud);
        self
    }

    /// Static pool definitions applied on start.
    ///
    /// Default: none, the stored pools are left as they are.
    pub fn pool_configs(mut self, configs: Vec<PoolConfig>) -> Self {
        self.pool_configs = configs;
        self
    }

    pub fn scheduler_config(mut self, config: FlightSchedulerConfig) -> Self {
        self.scheduler_config = config;
        self
    }

    pub fn engine_config(mut self, config: EngineConfig) -> Self {
        self.engine_config = config;
        self
    }

    pub fn step_settings(mut self, settings: ProjectStepSettings) -> Self {
        self.step_settings = settings;
        self
    }

    /// How long `shutdown` waits for running flights to park.
    ///
    /// Default: 30 seconds.
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = Some(grace);
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<BufferRuntimeConfig> {
        let store = self
            .store
            .ok_or_else(|| anyhow::anyhow!("store is required"))?;
        let flight_persistence = self
            .flight_persistence
            .ok_or_else(|| anyhow::anyhow!("flight_persistence is required"))?;
        let cloud = self
            .cloud
            .ok_or_else(|| anyhow::anyhow!("cloud is required"))?;

        Ok(BufferRuntimeConfig {
            store,
            flight_persistence,
            cloud,
            pool_configs: self.pool_configs,
            scheduler_config: self.scheduler_config,
            engine_config: self.engine_config,
            step_settings: self.step_settings,
            shutdown_grace: self.shutdown_grace.unwrap_or(Duration::from_secs(30)),
        })
    }
}

/// Configuration for a [`BufferRuntime`].
pub struct BufferRuntimeConfig {
    store: Arc<dyn BufferStore>,
    flight_persistence: Arc<dyn FlightPersistence>,
    cloud: Arc<dyn CloudClient>,
    pool_configs: Vec<PoolConfig>,
    scheduler_config: FlightSchedulerConfig,
    engine_config: EngineConfig,
    step_settings: ProjectStepSettings,
    shutdown_grace: Duration,
}

impl BufferRuntimeConfig {
    /// Start the runtime.
    ///
    /// Applies the pool definitions, resumes every RUNNING flight left by a
    /// previous process, then spawns the scheduler.
    pub async fn start(self) -> Result<BufferRuntime> {
        let registry =
            FlightRegistry::standard(self.store.clone(), self.cloud.clone(), self.step_settings);
        let factory = Arc::new(FlightSubmissionFactory::new(registry));

        let engine = FlightEngine::builder()
            .persistence(self.flight_persistence)
            .resolver(factory.clone())
            .config(self.engine_config)
            .build()?;

        let pools = PoolService::new(self.store.clone());
        if !self.pool_configs.is_empty() {
            pools.initialize(&self.pool_configs).await?;
        }

        match engine.resume_running_flights().await {
            Ok(0) => {}
            Ok(count) => info!(count, "Resumed running flights"),
            Err(e) => warn!(error = %e, "Failed to resume running flights"),
        }

        let manager = FlightManager::new(self.store.clone(), factory, engine.clone());
        let scheduler =
            FlightScheduler::new(self.store.clone(), manager.clone(), self.scheduler_config);
        let scheduler_shutdown = scheduler.shutdown_handle();
        let scheduler_handle = tokio::spawn(async move {
            scheduler.run().await;
        });

        info!("BufferRuntime started");

        Ok(BufferRuntime {
            scheduler_handle,
            scheduler_shutdown,
            engine,
            manager,
            handout: HandoutService::new(self.store.clone()),
            pools,
            store: self.store,
            shutdown_grace: self.shutdown_grace,
        })
    }
}

/// A running resource buffer service.
///
/// The runtime manages:
/// - the reconciliation scheduler task
/// - the flight engine and its executors
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct BufferRuntime {
    scheduler_handle: JoinHandle<()>,
    scheduler_shutdown: Arc<Notify>,
    engine: FlightEngine,
    manager: FlightManager,
    handout: HandoutService,
    pools: PoolService,
    store: Arc<dyn BufferStore>,
    shutdown_grace: Duration,
}

impl BufferRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> BufferRuntimeBuilder {
        BufferRuntimeBuilder::new()
    }

    pub fn handout(&self) -> &HandoutService {
        &self.handout
    }

    pub fn pools(&self) -> &PoolService {
        &self.pools
    }

    pub fn flight_manager(&self) -> &FlightManager {
        &self.manager
    }

    pub fn engine(&self) -> &FlightEngine {
        &self.engine
    }

    pub fn store(&self) -> &Arc<dyn BufferStore> {
        &self.store
    }

    /// Gracefully shut down the runtime.
    ///
    /// Stops the scheduler, then lets running flights park at their next
    /// step boundary. Parked flights stay RUNNING and are resumed on the
    /// next start.
    pub async fn shutdown(self) -> Result<()> {
        info!("BufferRuntime shutting down...");

        self.scheduler_shutdown.notify_one();
        if let Err(e) = self.scheduler_handle.await {
            error!("Flight scheduler task panicked: {}", e);
        }

        self.engine.shutdown(self.shutdown_grace).await;

        info!("BufferRuntime shutdown complete");
        Ok(())
    }

    /// Check if the scheduler task is still running.
    pub fn is_running(&self) -> bool {
        !self.scheduler_handle.is_finished()
    }
}
