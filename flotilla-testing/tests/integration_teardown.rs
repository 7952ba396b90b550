//! Teardown behavior: idempotence, resilience and partial construction

use tempfile::TempDir;

use flotilla_core::Resources;
use flotilla_testing::{init_test_logging, sim_testnet, SimEvent};
use flotilla_testnet::{CleanupReport, TestnetConfig, TestnetState};

const VERSION: &str = "v1.0.0";
const STAKE: i64 = 10_000_000;

#[tokio::test]
async fn test_cleanup_is_idempotent() {
    init_test_logging();
    let staging = TempDir::new().unwrap();
    let (mut testnet, cluster, _chain) =
        sim_testnet(TestnetConfig::new("idempotent").with_staging_dir(staging.path())).unwrap();
    testnet
        .create_genesis_nodes(2, VERSION, STAKE, 0, Resources::default(), false)
        .await
        .unwrap();
    let endpoint = testnet.node(0).unwrap().remote_address_grpc().await.unwrap();
    let spec = testnet.workload_spec("txsim0", VERSION, &endpoint);
    testnet.create_workload_client(spec).await.unwrap();
    testnet.setup(&[]).await.unwrap();
    testnet.start().await.unwrap();

    let first = testnet.cleanup().await;
    assert_eq!(first.destroyed, 3);
    assert!(first.failed.is_empty());
    assert_eq!(testnet.state(), TestnetState::Destroyed);

    let second = testnet.cleanup().await;
    assert_eq!(second, CleanupReport::default());

    for name in ["txsim0", "val0", "val1"] {
        assert_eq!(cluster.count(&SimEvent::Destroyed(name.to_string())), 1);
    }
    assert_eq!(cluster.count(&SimEvent::SessionClosed), 1);
    assert!(cluster.is_closed());
}

/// Clients go down before nodes, and the session closes last
#[tokio::test]
async fn test_cleanup_order() {
    init_test_logging();
    let staging = TempDir::new().unwrap();
    let (mut testnet, cluster, _chain) =
        sim_testnet(TestnetConfig::new("order").with_staging_dir(staging.path())).unwrap();
    testnet
        .create_genesis_node(VERSION, STAKE, 0, Resources::default(), false)
        .await
        .unwrap();
    let endpoint = testnet.node(0).unwrap().remote_address_grpc().await.unwrap();
    let spec = testnet.workload_spec("txsim0", VERSION, &endpoint);
    testnet.create_workload_client(spec).await.unwrap();
    testnet.setup(&[]).await.unwrap();

    testnet.cleanup().await;

    let client = cluster.position(&SimEvent::Destroyed("txsim0".to_string())).unwrap();
    let node = cluster.position(&SimEvent::Destroyed("val0".to_string())).unwrap();
    let closed = cluster.position(&SimEvent::SessionClosed).unwrap();
    assert!(client < node);
    assert!(node < closed);
}

#[tokio::test]
async fn test_cleanup_continues_past_failures() {
    init_test_logging();
    let staging = TempDir::new().unwrap();
    let (mut testnet, cluster, _chain) =
        sim_testnet(TestnetConfig::new("resilient").with_staging_dir(staging.path())).unwrap();
    testnet
        .create_genesis_nodes(3, VERSION, STAKE, 0, Resources::default(), false)
        .await
        .unwrap();
    testnet.setup(&[]).await.unwrap();
    testnet.start().await.unwrap();
    cluster.fail_destroy("val1");

    let report = testnet.cleanup().await;
    assert_eq!(report.destroyed, 2);
    assert_eq!(report.failed, vec!["val1".to_string()]);
    assert_eq!(cluster.live_instances(), vec!["val1".to_string()]);
    assert!(cluster.is_closed());

    // a completed pass is not retried
    assert_eq!(testnet.cleanup().await, CleanupReport::default());
}

#[tokio::test]
async fn test_cleanup_with_no_participants() {
    init_test_logging();
    let staging = TempDir::new().unwrap();
    let (mut testnet, cluster, _chain) =
        sim_testnet(TestnetConfig::new("bare").with_staging_dir(staging.path())).unwrap();

    let report = testnet.cleanup().await;
    assert_eq!(report.destroyed, 0);
    assert!(report.failed.is_empty());
    assert!(cluster.is_closed());
}

/// Nodes created before a construction failure are still released
#[tokio::test]
async fn test_cleanup_after_partial_construction() {
    init_test_logging();
    let staging = TempDir::new().unwrap();
    let (mut testnet, cluster, _chain) =
        sim_testnet(TestnetConfig::new("partial").with_staging_dir(staging.path())).unwrap();
    cluster.fail_create("val2");

    let result = testnet
        .create_genesis_nodes(4, VERSION, STAKE, 0, Resources::default(), false)
        .await;
    assert!(result.is_err());
    assert_eq!(testnet.nodes().len(), 2);
    assert_eq!(cluster.live_instances().len(), 2);

    let report = testnet.cleanup().await;
    assert_eq!(report.destroyed, 2);
    assert!(cluster.live_instances().is_empty());
}

#[tokio::test]
async fn test_skip_cleanup_leaves_resources() {
    init_test_logging();
    let staging = TempDir::new().unwrap();
    let (mut testnet, cluster, _chain) = sim_testnet(
        TestnetConfig::new("skip")
            .with_staging_dir(staging.path())
            .with_skip_cleanup(true),
    )
    .unwrap();
    testnet
        .create_genesis_node(VERSION, STAKE, 0, Resources::default(), false)
        .await
        .unwrap();

    let report = testnet.cleanup().await;
    assert!(report.skipped);
    assert_eq!(report.destroyed, 0);
    assert_eq!(cluster.live_instances(), vec!["val0".to_string()]);
    assert!(!cluster.is_closed());
    assert_ne!(testnet.state(), TestnetState::Destroyed);
}
