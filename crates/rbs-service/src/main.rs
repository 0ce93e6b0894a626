// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Resource Buffer Service - pool reconciliation server
//!
//! Loads the static pool definitions, keeps every pool at its target size
//! through creation and deletion flights, and resumes interrupted flights
//! on start.

use std::sync::Arc;
use tracing::{info, warn};

use rbs_flight::persistence::PostgresFlightPersistence;
use rbs_service::cloud::MockCloud;
use rbs_service::config::{Config, load_pool_configs};
use rbs_service::runtime::BufferRuntime;
use rbs_service::store::PostgresStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rbs_service=info,rbs_flight=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let config = Config::from_env()?;

    info!(
        scheduler_enabled = config.scheduler.enabled,
        period_secs = config.scheduler.period.as_secs(),
        max_concurrent_flights = config.max_concurrent_flights,
        "Starting Resource Buffer Service"
    );

    let store_pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;

    let flight_pool = if config.flight_database_url == config.database_url {
        rbs_service::migrations::run(&store_pool).await?;
        store_pool.clone()
    } else {
        let flight_pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.flight_database_url)
            .await?;
        rbs_service::migrations::run_postgres(&store_pool).await?;
        rbs_flight::migrations::run_postgres(&flight_pool).await?;
        flight_pool
    };

    info!("Database schema verified");

    let pool_configs = match &config.pool_config_path {
        Some(path) => load_pool_configs(path)?,
        None => {
            warn!("RBS_POOL_CONFIG_PATH not set, keeping stored pools unchanged");
            Vec::new()
        }
    };

    // No cloud provider client ships with this binary.
    warn!("Using the in-memory cloud client; resources are simulated");
    let cloud = Arc::new(MockCloud::new());

    let engine_config = rbs_flight::EngineConfig {
        max_concurrent_flights: config.max_concurrent_flights,
        ..Default::default()
    };

    let runtime = BufferRuntime::builder()
        .store(Arc::new(PostgresStore::new(store_pool)))
        .flight_persistence(Arc::new(PostgresFlightPersistence::new(flight_pool)))
        .cloud(cloud)
        .pool_configs(pool_configs)
        .scheduler_config(config.scheduler)
        .engine_config(engine_config)
        .build()?
        .start()
        .await?;

    info!("Resource Buffer Service ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    runtime.shutdown().await?;

    info!("Resource Buffer Service shut down");

    Ok(())
}
