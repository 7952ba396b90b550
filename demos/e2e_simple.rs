use std::sync::Arc;
use std::time::Duration;

use flotilla_bench::E2ESimple;
use flotilla_core::DEFAULT_APP_VERSION;
use flotilla_testing::{SimChain, SimCluster};
use flotilla_testnet::{session_scope, TestnetConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = TestnetConfig::new("E2ESimple").with_seed(42);
    let cluster = SimCluster::init(session_scope(&config.name));
    let chain = SimChain::new(cluster.clone());

    // one block per second, three transactions each
    let producer = {
        let chain = chain.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            loop {
                ticker.tick().await;
                chain.produce_blocks(1, DEFAULT_APP_VERSION, 3);
            }
        })
    };

    let scenario = E2ESimple {
        duration: Duration::from_secs(5),
        ..E2ESimple::default()
    };
    let outcome = scenario
        .run(config, Arc::new(cluster.clone()), Arc::new(chain))
        .await;
    producer.abort();

    let summary = outcome?;
    println!(
        "E2ESimple passed: {} blocks, {} transactions, {} instances left",
        summary.blocks,
        summary.total_txs,
        cluster.live_instances().len()
    );
    Ok(())
}
