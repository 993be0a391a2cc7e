//! The periodic worker over in-memory fleet state.

mod common;

use std::time::Duration;

use common::*;
use edgealloc_optimizer::worker::OptimizerWorker;
use tokio::sync::watch;

#[tokio::test]
async fn test_worker_runs_cycles_until_shutdown() {
    init_tracing();
    let (devices, clusters, requirements) = two_device_fleet();
    let h = harness(devices, clusters, requirements, settings());
    let worker = OptimizerWorker::new(h.runner.clone(), Duration::from_millis(50));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move { worker.run(shutdown_rx).await });

    tokio::time::sleep(Duration::from_millis(400)).await;
    shutdown_tx.send(true).unwrap();
    let cycles = tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .unwrap()
        .unwrap();

    assert!(cycles >= 2, "ran {cycles} cycles");
    let assignments = h.store.assignments().await;
    assert_eq!(assignments[&did("d1")], Some(cid(1)));
    assert_eq!(assignments[&did("d2")], Some(cid(2)));
    // Later cycles find nothing to move.
    assert_eq!(h.store.writes(), 2);
    assert_eq!(h.scaling.requests().await.len(), 2);
}

#[tokio::test]
async fn test_worker_survives_aborted_cycles() {
    init_tracing();
    let (devices, clusters, requirements) = two_device_fleet();
    let h = harness(devices, clusters, requirements, settings());
    h.platform.set_unavailable(true);
    let worker = OptimizerWorker::new(h.runner.clone(), Duration::from_millis(50));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move { worker.run(shutdown_rx).await });

    tokio::time::sleep(Duration::from_millis(200)).await;
    h.platform.set_unavailable(false);
    tokio::time::sleep(Duration::from_millis(300)).await;
    shutdown_tx.send(true).unwrap();
    let cycles = tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .unwrap()
        .unwrap();

    assert!(cycles >= 2);
    assert_eq!(h.store.assignments().await[&did("d1")], Some(cid(1)));
}

#[tokio::test]
async fn test_worker_stops_when_shutdown_sender_is_dropped() {
    init_tracing();
    let (devices, clusters, requirements) = two_device_fleet();
    let h = harness(devices, clusters, requirements, settings());
    let worker = OptimizerWorker::new(h.runner.clone(), Duration::from_secs(3600));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move { worker.run(shutdown_rx).await });

    tokio::time::sleep(Duration::from_millis(200)).await;
    drop(shutdown_tx);
    let cycles = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("worker kept running after its shutdown sender was dropped")
        .unwrap();

    // Only the immediate first tick ran.
    assert_eq!(cycles, 1);
}
