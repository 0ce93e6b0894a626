// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Reconciliation cycles against a live engine and the mock cloud.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{FlakyStore, Harness, WAIT, fast_engine_config, sqlite_store};
use rbs_flight::{EngineConfig, FlightStatus};
use rbs_service::cloud::{CloudError, MockCloud};
use rbs_service::model::{PoolId, RequestHandoutId, ResourceState};
use rbs_service::store::BufferStore;

async fn await_all(h: &Harness, flight_ids: &[String]) {
    for flight_id in flight_ids {
        let record = h.await_flight(flight_id).await;
        assert_eq!(record.status, FlightStatus::Success, "{:?}", record.error);
    }
}

#[tokio::test]
async fn test_fills_empty_pool_then_goes_idle() {
    let h = Harness::new().await;
    let pool = h.create_pool("pool-a", 2).await;
    let scheduler = h.scheduler(5, 5);

    let first = scheduler.run_cycle().await.unwrap();
    assert_eq!(first.submitted.len(), 2);
    assert_eq!(first.failures, 0);
    await_all(&h, &first.submitted).await;
    assert_eq!(h.state_count(&pool.id, ResourceState::Ready).await, 2);

    let second = scheduler.run_cycle().await.unwrap();
    assert!(second.submitted.is_empty());
}

#[tokio::test]
async fn test_creation_is_capped_per_cycle() {
    let h = Harness::new().await;
    let pool = h.create_pool("pool-a", 7).await;
    let scheduler = h.scheduler(3, 3);

    let report = scheduler.run_cycle().await.unwrap();
    assert_eq!(report.submitted.len(), 3);

    let counts = h.counts(&pool.id).await.counts;
    let live = counts.get(ResourceState::Creating) + counts.get(ResourceState::Ready);
    assert!(live <= pool.size + 3);
    await_all(&h, &report.submitted).await;

    // Snapshot now shows 3 READY: 4 more are needed, still capped at 3.
    let report = scheduler.run_cycle().await.unwrap();
    assert_eq!(report.submitted.len(), 3);
    await_all(&h, &report.submitted).await;
    let report = scheduler.run_cycle().await.unwrap();
    assert_eq!(report.submitted.len(), 1);
    await_all(&h, &report.submitted).await;
    assert_eq!(h.state_count(&pool.id, ResourceState::Ready).await, 7);
}

#[tokio::test]
async fn test_deactivated_pool_is_drained() {
    let h = Harness::new().await;
    let pool = h.create_pool("pool-a", 3).await;
    h.create_ready_resources(&pool, 3).await;
    assert!(h.pools.deactivate_pool(&pool.id).await.unwrap());

    let report = h.scheduler(5, 10).run_cycle().await.unwrap();
    assert_eq!(report.submitted.len(), 3);
    await_all(&h, &report.submitted).await;

    let counts = h.counts(&pool.id).await.counts;
    assert_eq!(counts.get(ResourceState::Ready), 0);
    assert_eq!(counts.get(ResourceState::Deleted), 3);
    assert!(h.cloud.active_projects().is_empty());
}

#[tokio::test]
async fn test_shrinking_pool_deletes_ready_surplus() {
    let h = Harness::new().await;
    let pool = h.create_pool("pool-a", 4).await;
    h.create_ready_resources(&pool, 4).await;
    h.pools.update_pool_size(&pool.id, 1).await.unwrap();

    let report = h.scheduler(5, 2).run_cycle().await.unwrap();
    assert_eq!(report.submitted.len(), 2);
    await_all(&h, &report.submitted).await;
    assert_eq!(h.state_count(&pool.id, ResourceState::Ready).await, 2);
}

#[tokio::test]
async fn test_handed_out_resources_are_replaced() {
    let h = Harness::new().await;
    let pool = h.create_pool("pool-a", 2).await;
    h.create_ready_resources(&pool, 2).await;
    h.handout
        .handout_resource(&pool.id, &RequestHandoutId::new("req-1"))
        .await
        .unwrap();

    let report = h.scheduler(5, 5).run_cycle().await.unwrap();
    assert_eq!(report.submitted.len(), 1);
}

#[tokio::test]
async fn test_failed_flights_do_not_stop_the_cycle() {
    let h = Harness::new().await;
    let pool_a = h.create_pool("pool-a", 2).await;
    let pool_b = h.create_pool("pool-b", 1).await;
    h.cloud.fail_next(
        "create_project",
        CloudError::Permanent("quota exceeded".to_string()),
    );

    let report = h.scheduler(5, 5).run_cycle().await.unwrap();
    assert_eq!(report.submitted.len(), 3);

    let mut statuses = Vec::new();
    for flight_id in &report.submitted {
        statuses.push(h.await_flight(flight_id).await.status);
    }
    assert_eq!(
        statuses
            .iter()
            .filter(|s| **s == FlightStatus::Error)
            .count(),
        1
    );
    let ready = h.state_count(&pool_a.id, ResourceState::Ready).await
        + h.state_count(&pool_b.id, ResourceState::Ready).await;
    assert_eq!(ready, 2);

    // The failed creation left no CREATING row, so the next cycle retries it.
    let report = h.scheduler(5, 5).run_cycle().await.unwrap();
    assert_eq!(report.submitted.len(), 1);
}

#[tokio::test]
async fn test_run_loop_reconciles_until_shutdown() {
    let h = Harness::new().await;
    let pool = h.create_pool("pool-a", 2).await;
    let scheduler = h.scheduler(5, 5);
    let shutdown = scheduler.shutdown_handle();
    let handle = tokio::spawn(scheduler.run());

    let deadline = tokio::time::Instant::now() + WAIT;
    while h.state_count(&pool.id, ResourceState::Ready).await < 2 {
        assert!(tokio::time::Instant::now() < deadline, "pool never filled");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    shutdown.notify_one();
    tokio::time::timeout(WAIT, handle)
        .await
        .expect("scheduler did not stop")
        .unwrap();
    assert_eq!(h.state_count(&pool.id, ResourceState::Creating).await, 0);
}

#[tokio::test]
async fn test_queued_deletion_is_not_submitted_twice() {
    // One worker, and operations slow enough to keep it busy.
    let h = Harness::with_engine_config(
        sqlite_store().await,
        MockCloud::new().with_operation_polls(40),
        EngineConfig {
            max_concurrent_flights: 1,
            ..fast_engine_config()
        },
    )
    .await;
    let pool = h.create_pool("pool-a", 1).await;
    let resource = h.create_ready_resources(&pool, 1).await.remove(0);

    let busy = h
        .manager
        .submit_creation_flight(&pool)
        .await
        .unwrap()
        .expect("creation submitted");
    let deadline = tokio::time::Instant::now() + WAIT;
    while h.cloud.call_count("create_project") < 2 {
        assert!(tokio::time::Instant::now() < deadline, "creation never started");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    h.pools.update_pool_size(&pool.id, 0).await.unwrap();

    let scheduler = h.scheduler(5, 5);
    let first = scheduler.run_cycle().await.unwrap();
    assert_eq!(first.submitted.len(), 1);
    // Claimed at submission, while the flight still waits for a worker.
    let claimed = h.store.get_resource(&resource.id).await.unwrap().unwrap();
    assert_eq!(claimed.state, ResourceState::Deleting);

    let second = scheduler.run_cycle().await.unwrap();
    assert!(second.submitted.is_empty());
    assert_eq!(second.failures, 0);

    await_all(&h, &[busy]).await;
    await_all(&h, &first.submitted).await;
    assert!(
        h.engine
            .persistence()
            .list_flights(FlightStatus::Error, 10)
            .await
            .unwrap()
            .is_empty()
    );
    assert_eq!(h.cloud.call_count("delete_project"), 1);
}

#[tokio::test]
async fn test_failed_submission_does_not_stop_the_batch() {
    let store = Arc::new(FlakyStore::new(sqlite_store().await).fail_begin_create(1));
    let h = Harness::with_store(store, MockCloud::new()).await;
    let pool_a = h.create_pool("pool-a", 2).await;
    let pool_b = h.create_pool("pool-b", 1).await;

    let report = h.scheduler(5, 5).run_cycle().await.unwrap();
    assert_eq!(report.failures, 1);
    assert_eq!(report.submitted.len(), 2);
    await_all(&h, &report.submitted).await;

    assert_eq!(h.state_count(&pool_a.id, ResourceState::Ready).await, 1);
    assert_eq!(h.state_count(&pool_b.id, ResourceState::Ready).await, 1);
}

#[tokio::test]
async fn test_run_loop_survives_failed_cycles() {
    let store = Arc::new(FlakyStore::new(sqlite_store().await).fail_snapshot(2));
    let h = Harness::with_store(store.clone(), MockCloud::new()).await;
    let pool = h.create_pool("pool-a", 2).await;
    let scheduler = h.scheduler(5, 5);
    let shutdown = scheduler.shutdown_handle();
    let handle = tokio::spawn(scheduler.run());

    // Poll resources directly: the snapshot read is what fails.
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let ready = store
            .list_resources(&PoolId::new("pool-a"), ResourceState::Ready, 10)
            .await
            .unwrap();
        if ready.len() == 2 {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "pool never filled");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(store.snapshot_failures_left(), 0);

    shutdown.notify_one();
    tokio::time::timeout(WAIT, handle)
        .await
        .expect("scheduler did not stop")
        .unwrap();
    assert_eq!(h.state_count(&pool.id, ResourceState::Ready).await, 2);
}
