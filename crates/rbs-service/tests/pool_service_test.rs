// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Pool initialization from static definitions and pool administration.

mod common;

use std::sync::Arc;

use common::{FlakyStore, gcp_config, sqlite_store};
use rbs_service::PoolService;
use rbs_service::config::PoolConfig;
use rbs_service::error::Error;
use rbs_service::model::{PoolId, PoolStatus, Resource, ResourceId, ResourceSpec, ResourceState};
use rbs_service::pool_service::PoolChanges;
use rbs_service::store::BufferStore;

fn pool_config(id: &str, size: u32) -> PoolConfig {
    PoolConfig {
        pool_id: PoolId::new(id),
        size,
        resource_config: gcp_config("aou-rb"),
    }
}

#[tokio::test]
async fn test_initialize_creates_resizes_and_deactivates() {
    let store = sqlite_store().await;
    let service = PoolService::new(store.clone());

    let changes = service
        .initialize(&[pool_config("a", 2), pool_config("b", 3)])
        .await
        .unwrap();
    assert_eq!(changes.created, vec![PoolId::new("a"), PoolId::new("b")]);

    let changes = service
        .initialize(&[pool_config("a", 5), pool_config("c", 1)])
        .await
        .unwrap();
    assert_eq!(changes.created, vec![PoolId::new("c")]);
    assert_eq!(changes.resized, vec![PoolId::new("a")]);
    assert_eq!(changes.deactivated, vec![PoolId::new("b")]);

    let a = store.get_pool(&PoolId::new("a")).await.unwrap().unwrap();
    assert_eq!(a.size, 5);
    let b = store.get_pool(&PoolId::new("b")).await.unwrap().unwrap();
    assert_eq!(b.status, PoolStatus::Deactivated);
    assert!(b.expiration.is_some());

    // Applying the same definitions again changes nothing.
    let changes = service
        .initialize(&[pool_config("a", 5), pool_config("c", 1)])
        .await
        .unwrap();
    assert_eq!(changes, PoolChanges::default());
}

#[tokio::test]
async fn test_changed_resource_config_is_rejected() {
    let store = sqlite_store().await;
    let service = PoolService::new(store.clone());
    service.initialize(&[pool_config("a", 2)]).await.unwrap();

    let mut changed = pool_config("a", 2);
    let ResourceSpec::GcpProjectConfig(gcp) = &mut changed.resource_config.spec;
    gcp.billing_account = "other-billing".to_string();

    let err = service
        .initialize(&[changed, pool_config("new", 1)])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidPoolConfig(_)));
    // Nothing was written.
    assert!(store.get_pool(&PoolId::new("new")).await.unwrap().is_none());
}

#[tokio::test]
async fn test_invalid_definitions_are_rejected() {
    let service = PoolService::new(sqlite_store().await);

    let err = service
        .initialize(&[pool_config("a", 1), pool_config("a", 2)])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidPoolConfig(_)));

    let mut no_compute = pool_config("b", 1);
    let ResourceSpec::GcpProjectConfig(gcp) = &mut no_compute.resource_config.spec;
    gcp.enabled_apis.clear();
    let err = service.initialize(&[no_compute]).await.unwrap_err();
    assert!(matches!(err, Error::InvalidPoolConfig(_)));
}

#[tokio::test]
async fn test_deactivated_pool_cannot_be_reused() {
    let service = PoolService::new(sqlite_store().await);
    service.initialize(&[pool_config("a", 1)]).await.unwrap();
    assert!(service.deactivate_pool(&PoolId::new("a")).await.unwrap());
    assert!(!service.deactivate_pool(&PoolId::new("a")).await.unwrap());

    let err = service.initialize(&[pool_config("a", 1)]).await.unwrap_err();
    assert!(matches!(err, Error::InvalidPoolConfig(_)));
}

#[tokio::test]
async fn test_admin_operations_on_missing_pool() {
    let service = PoolService::new(sqlite_store().await);
    let missing = PoolId::new("missing");

    assert!(matches!(
        service.pool_info(&missing).await,
        Err(Error::PoolNotFound(_))
    ));
    assert!(matches!(
        service.update_pool_size(&missing, 3).await,
        Err(Error::PoolNotFound(_))
    ));
    assert!(matches!(
        service.deactivate_pool(&missing).await,
        Err(Error::PoolNotFound(_))
    ));
}

#[tokio::test]
async fn test_pool_info_reports_config_and_empty_counts() {
    let service = PoolService::new(sqlite_store().await);
    service.initialize(&[pool_config("a", 4)]).await.unwrap();

    let info = service.pool_info(&PoolId::new("a")).await.unwrap();
    assert_eq!(info.pool.size, 4);
    assert_eq!(info.pool.resource_config, gcp_config("aou-rb"));
    assert_eq!(info.counts.iter().count(), 0);
    assert_eq!(service.ready_count(&PoolId::new("a")).await.unwrap(), 0);
}

#[tokio::test]
async fn test_pool_info_reads_definition_and_counts_together() {
    let inner = sqlite_store().await;
    PoolService::new(inner.clone())
        .initialize(&[pool_config("a", 4)])
        .await
        .unwrap();
    let pool_id = PoolId::new("a");
    inner
        .create_resource(&Resource::creating(ResourceId::random(), pool_id.clone()))
        .await
        .unwrap();
    inner.deactivate_pool(&pool_id).await.unwrap();

    // A separate pool lookup would fail here.
    let service = PoolService::new(Arc::new(FlakyStore::new(inner).fail_get_pool(1)));
    let info = service.pool_info(&pool_id).await.unwrap();

    assert_eq!(info.pool.status, PoolStatus::Deactivated);
    assert_eq!(info.pool.size, 4);
    assert_eq!(info.counts.get(ResourceState::Creating), 1);
}
