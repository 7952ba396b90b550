//! Startup ordering, readiness and start hooks on simulated testnets

use std::time::Duration;
use tempfile::TempDir;

use flotilla_core::{FlotillaError, LatencyParams, Resources, TRACING_PORT};
use flotilla_node::{NodeState, WorkloadState};
use flotilla_testing::{
    init_test_logging, sim_testnet, SimChain, SimCluster, SimEvent, StatusStep,
};
use flotilla_testnet::{
    NetworkConditionsHook, ReadinessPolicy, Testnet, TestnetConfig, TestnetState,
};

const VERSION: &str = "v1.0.0";
const STAKE: i64 = 10_000_000;

async fn initialized_testnet(
    staging: &TempDir,
    config: TestnetConfig,
    validators: usize,
    late_joiners: usize,
    workload: bool,
) -> (Testnet, SimCluster, SimChain) {
    let (mut testnet, cluster, chain) =
        sim_testnet(config.with_staging_dir(staging.path())).unwrap();
    testnet
        .create_genesis_nodes(validators, VERSION, STAKE, 0, Resources::default(), false)
        .await
        .unwrap();
    for _ in 0..late_joiners {
        testnet
            .create_node(VERSION, 10, 0, Resources::default(), false)
            .await
            .unwrap();
    }
    if workload {
        let endpoint = testnet.node(0).unwrap().remote_address_grpc().await.unwrap();
        let spec = testnet.workload_spec("txsim0", VERSION, &endpoint);
        testnet.create_workload_client(spec).await.unwrap();
    }
    testnet.setup(&[]).await.unwrap();
    (testnet, cluster, chain)
}

fn pos(cluster: &SimCluster, event: SimEvent) -> usize {
    cluster
        .position(&event)
        .unwrap_or_else(|| panic!("event {:?} not recorded", event))
}

#[tokio::test]
async fn test_startup_ordering() {
    init_test_logging();
    let staging = TempDir::new().unwrap();
    let (mut testnet, cluster, chain) =
        initialized_testnet(&staging, TestnetConfig::new("ordering"), 3, 1, true).await;

    testnet.start().await.unwrap();
    assert_eq!(testnet.state(), TestnetState::Running);

    let genesis = ["val0", "val1", "val2"];
    let first_running = genesis
        .iter()
        .map(|n| pos(&cluster, SimEvent::Running(n.to_string())))
        .min()
        .unwrap();
    for name in genesis {
        // every genesis node is issued a start before any is waited on
        assert!(pos(&cluster, SimEvent::StartIssued(name.to_string())) < first_running);
    }

    // workload clients start only after every genesis node forwarded ports
    let workload_start = pos(&cluster, SimEvent::StartIssued("txsim0".to_string()));
    for name in genesis {
        let forwarded = pos(
            &cluster,
            SimEvent::HostAdded {
                instance: name.to_string(),
                port: TRACING_PORT,
            },
        );
        assert!(forwarded < workload_start);
    }

    // the late joiner starts after the last readiness poll
    let late_start = pos(&cluster, SimEvent::StartIssued("val3".to_string()));
    let events = cluster.events();
    let last_poll = events
        .iter()
        .rposition(|e| matches!(e, SimEvent::StatusPolled(_)))
        .unwrap();
    assert!(last_poll < late_start);
    assert_eq!(chain.status_polls("val3"), 0);

    for node in &testnet.nodes()[..3] {
        assert_eq!(node.state(), NodeState::Ready);
    }
    assert_eq!(testnet.node(3).unwrap().state(), NodeState::RunningUnverified);
    assert_eq!(testnet.workload_clients()[0].state(), WorkloadState::Running);

    testnet.cleanup().await;
}

#[tokio::test]
async fn test_rpc_endpoints_after_start() {
    init_test_logging();
    let staging = TempDir::new().unwrap();
    let (mut testnet, _cluster, _chain) =
        initialized_testnet(&staging, TestnetConfig::new("endpoints"), 2, 0, false).await;

    assert!(testnet.rpc_endpoints().is_err());
    let remote = testnet.remote_rpc_endpoints().await.unwrap();
    assert_eq!(remote.len(), 2);

    testnet.start().await.unwrap();
    let endpoints = testnet.rpc_endpoints().unwrap();
    assert_eq!(endpoints.len(), 2);
    assert!(endpoints.iter().all(|e| !e.is_empty()));
    assert_ne!(endpoints[0], endpoints[1]);

    testnet.cleanup().await;
}

/// A node stuck at height zero fails startup after the configured attempts
#[tokio::test(start_paused = true)]
async fn test_stalled_node_fails_convergence() {
    init_test_logging();
    let staging = TempDir::new().unwrap();
    let config = TestnetConfig::new("stall")
        .with_readiness(ReadinessPolicy::new(10, Duration::from_secs(1)));
    let (mut testnet, cluster, chain) = initialized_testnet(&staging, config, 3, 0, false).await;
    chain.stall("val1");

    let err = testnet.start().await.unwrap_err();
    match err {
        FlotillaError::Convergence { node } => assert_eq!(node, "val1"),
        other => panic!("expected convergence failure, got {}", other),
    }
    assert_eq!(chain.status_polls("val1"), 10);
    assert_eq!(chain.status_polls("val2"), 0);
    assert_ne!(testnet.state(), TestnetState::Converged);

    let report = testnet.cleanup().await;
    assert_eq!(report.destroyed, 3);
    assert!(cluster.live_instances().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_progress_on_later_attempt() {
    init_test_logging();
    let staging = TempDir::new().unwrap();
    let (mut testnet, _cluster, chain) =
        initialized_testnet(&staging, TestnetConfig::new("progress"), 2, 0, false).await;
    chain.script(
        "val0",
        [
            StatusStep::Height(0),
            StatusStep::Error("connection reset".to_string()),
            StatusStep::Height(0),
            StatusStep::Height(3),
        ],
    );

    testnet.start().await.unwrap();
    assert_eq!(chain.status_polls("val0"), 4);
    assert_eq!(chain.status_polls("val1"), 1);

    testnet.cleanup().await;
}

/// Status errors on every attempt end in a readiness failure
#[tokio::test(start_paused = true)]
async fn test_status_error_on_final_attempt() {
    init_test_logging();
    let staging = TempDir::new().unwrap();
    let config = TestnetConfig::new("unreachable")
        .with_readiness(ReadinessPolicy::new(3, Duration::from_millis(500)));
    let (mut testnet, _cluster, chain) = initialized_testnet(&staging, config, 1, 0, false).await;
    chain.script(
        "val0",
        (0..3).map(|i| StatusStep::Error(format!("refused {}", i))),
    );

    let err = testnet.start().await.unwrap_err();
    match err {
        FlotillaError::Readiness { node, message } => {
            assert_eq!(node, "val0");
            assert!(message.contains("refused 2"));
        }
        other => panic!("expected readiness failure, got {}", other),
    }
    assert_eq!(chain.status_polls("val0"), 3);

    testnet.cleanup().await;
}

#[tokio::test]
async fn test_crash_on_start_is_provisioning_error() {
    init_test_logging();
    let staging = TempDir::new().unwrap();
    let (mut testnet, cluster, _chain) =
        initialized_testnet(&staging, TestnetConfig::new("crash"), 3, 0, false).await;
    cluster.crash_on_start("val1");

    let err = testnet.start().await.unwrap_err();
    match err {
        FlotillaError::Provisioning { node, .. } => assert_eq!(node, "val1"),
        other => panic!("expected provisioning failure, got {}", other),
    }
    // nodes after the crashed one were never waited on
    assert!(cluster.position(&SimEvent::Running("val2".to_string())).is_none());

    let report = testnet.cleanup().await;
    assert_eq!(report.destroyed, 3);
    assert!(cluster.live_instances().is_empty());
}

#[tokio::test]
async fn test_network_conditions_hook_applies_latency() {
    init_test_logging();
    let staging = TempDir::new().unwrap();
    let (mut testnet, cluster, _chain) =
        sim_testnet(TestnetConfig::new("latency").with_staging_dir(staging.path())).unwrap();
    testnet
        .create_genesis_nodes(2, VERSION, STAKE, 0, Resources::default(), false)
        .await
        .unwrap();
    for node in testnet.nodes_mut() {
        node.enable_fault_injection().await.unwrap();
    }
    testnet.setup(&[]).await.unwrap();

    let hook = NetworkConditionsHook::new(Some(LatencyParams::new(100, 10)), Some(1_000));
    testnet.start_with_hook(&hook).await.unwrap();

    for name in ["val0", "val1"] {
        let injector = cluster.fault_injector(name).unwrap();
        assert!(injector.is_started());
        assert_eq!(injector.latency(), Some(LatencyParams::new(100, 10)));
        assert_eq!(injector.bandwidth_kbps(), Some(1_000));
    }

    testnet.cleanup().await;
}

#[tokio::test]
async fn test_hook_without_fault_injection_aborts_start() {
    init_test_logging();
    let staging = TempDir::new().unwrap();
    let (mut testnet, _cluster, chain) =
        initialized_testnet(&staging, TestnetConfig::new("nohook"), 2, 0, false).await;

    let hook = NetworkConditionsHook::new(Some(LatencyParams::new(50, 0)), None);
    let err = testnet.start_with_hook(&hook).await.unwrap_err();
    assert!(err.is_configuration());
    // readiness never ran
    assert_eq!(chain.status_polls("val0"), 0);

    testnet.cleanup().await;
}

#[tokio::test]
async fn test_fault_injector_failing_to_start_aborts_start() {
    init_test_logging();
    let staging = TempDir::new().unwrap();
    let (mut testnet, cluster, _chain) =
        sim_testnet(TestnetConfig::new("sidecar").with_staging_dir(staging.path())).unwrap();
    testnet
        .create_genesis_node(VERSION, STAKE, 0, Resources::default(), false)
        .await
        .unwrap();
    testnet.node_mut(0).unwrap().enable_fault_injection().await.unwrap();
    testnet.setup(&[]).await.unwrap();
    cluster.fault_injector("val0").unwrap().fail_start();

    let hook = NetworkConditionsHook::new(None, Some(500));
    assert!(testnet.start_with_hook(&hook).await.is_err());
    assert_eq!(cluster.fault_injector("val0").unwrap().bandwidth_kbps(), None);

    testnet.cleanup().await;
}

#[tokio::test(start_paused = true)]
async fn test_unresponsive_fault_injector_times_out() {
    init_test_logging();
    let staging = TempDir::new().unwrap();
    let (mut testnet, cluster, chain) =
        sim_testnet(TestnetConfig::new("sidecar-hang").with_staging_dir(staging.path())).unwrap();
    testnet
        .create_genesis_node(VERSION, STAKE, 0, Resources::default(), false)
        .await
        .unwrap();
    testnet.node_mut(0).unwrap().enable_fault_injection().await.unwrap();
    testnet.setup(&[]).await.unwrap();
    let injector = cluster.fault_injector("val0").unwrap();
    injector.hang_start();

    let hook = NetworkConditionsHook::new(Some(LatencyParams::new(100, 0)), None)
        .with_sidecar_timeout(Duration::from_secs(30));
    let err = tokio::time::timeout(Duration::from_secs(3600), testnet.start_with_hook(&hook))
        .await
        .unwrap()
        .unwrap_err();

    assert!(matches!(err, FlotillaError::Timeout { ref operation } if operation.contains("val0")));
    assert_eq!(injector.latency(), None);
    assert_eq!(chain.status_polls("val0"), 0);

    let report = testnet.cleanup().await;
    assert_eq!(report.destroyed, 1);
}

#[tokio::test]
async fn test_upgrade_swaps_image_in_place() {
    init_test_logging();
    let staging = TempDir::new().unwrap();
    let (mut testnet, cluster, _chain) =
        initialized_testnet(&staging, TestnetConfig::new("upgrade"), 1, 0, false).await;
    testnet.start().await.unwrap();

    let node = testnet.node_mut(0).unwrap();
    node.upgrade("v2.0.0").await.unwrap();
    assert_eq!(node.version(), "v2.0.0");
    assert_eq!(node.state(), NodeState::RunningUnverified);
    assert!(cluster
        .events()
        .iter()
        .any(|e| matches!(e, SimEvent::ImageSwapped { instance, image }
            if instance == "val0" && image.ends_with(":v2.0.0"))));

    testnet.cleanup().await;
}
