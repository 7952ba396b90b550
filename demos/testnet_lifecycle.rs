use flotilla_core::{LatencyParams, Resources};
use flotilla_node::ConfigOption;
use flotilla_testing::sim_testnet;
use flotilla_testnet::{NetworkConditionsHook, TestnetConfig};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let (mut testnet, cluster, chain) =
        sim_testnet(TestnetConfig::new("lifecycle").with_chain_id("lifecycle-demo"))?;

    let result = async {
        testnet
            .create_genesis_nodes(3, "v1.0.0", 10_000_000, 0, Resources::default(), false)
            .await?;
        testnet
            .create_node("v1.0.0", 20, 0, Resources::default(), false)
            .await?;
        for node in testnet.nodes_mut() {
            node.enable_fault_injection().await?;
        }
        let grpc = testnet.remote_grpc_endpoints().await?;
        let template = testnet.workload_spec("txsim", "v1.0.0", "");
        testnet.create_workload_clients(&template, &grpc[..1]).await?;

        testnet
            .setup(&[
                ConfigOption::TimeoutCommit(Duration::from_secs(1)),
                ConfigOption::LocalTracing("local".to_string()),
            ])
            .await?;
        println!("Genesis {}", testnet.genesis().map(|g| g.chain_id.clone()).unwrap_or_default());

        let hook = NetworkConditionsHook::new(Some(LatencyParams::new(50, 5)), Some(50_000));
        testnet.start_with_hook(&hook).await?;

        for (node, endpoint) in testnet.nodes().iter().zip(testnet.rpc_endpoints()?) {
            println!("{:>6} {:<18} {}", node.name(), node.state().to_string(), endpoint);
        }

        if let Some(node) = testnet.node_mut(0) {
            node.upgrade("v2.0.0").await?;
            println!("{} upgraded to {}", node.name(), node.version());
        }
        println!("status polls on val0: {}", chain.status_polls("val0"));
        anyhow::Ok(())
    }
    .await;

    let report = testnet.cleanup().await;
    println!(
        "Cleanup destroyed {} participants, {} failed; substrate events recorded: {}",
        report.destroyed,
        report.failed.len(),
        cluster.events().len()
    );
    result
}
