//! Runs a manifest against the simulated substrate.
//!
//! Usage: `run_manifest [PRESET | path/to/manifest.json]`. Without an
//! argument the two-node preset is used. Durations are capped so runs stay
//! short.

use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;

use flotilla_bench::{BenchmarkTest, Manifest};
use flotilla_testing::{SimChain, SimCluster};
use flotilla_testnet::{session_scope, TestnetConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

const MAX_DEMO_DURATION: Duration = Duration::from_secs(10);

async fn load_manifest(arg: Option<String>) -> anyhow::Result<Manifest> {
    let Some(arg) = arg else {
        return Ok(Manifest::two_node_simple());
    };
    if arg.ends_with(".json") {
        return Manifest::load(&arg)
            .await
            .with_context(|| format!("loading manifest {}", arg));
    }
    Manifest::preset(&arg).with_context(|| {
        let names: Vec<String> = Manifest::presets().into_iter().map(|m| m.name).collect();
        format!("known presets: {}", names.join(", "))
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut manifest = load_manifest(std::env::args().nth(1)).await?;
    manifest.test_duration = manifest.test_duration.min(MAX_DEMO_DURATION);
    info!(manifest = %manifest.to_json_pretty()?, "Loaded manifest");

    let cluster = SimCluster::init(session_scope(&manifest.name));
    let chain = SimChain::new(cluster.clone());
    let producer = {
        let chain = chain.clone();
        let app_version = manifest.expected_app_version;
        let txs = manifest.tx_clients.max(1);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            loop {
                ticker.tick().await;
                chain.produce_blocks(1, app_version, txs);
            }
        })
    };

    let config = TestnetConfig::new(manifest.name.clone());
    let mut test = BenchmarkTest::new(
        manifest,
        config,
        Arc::new(cluster.clone()),
        Arc::new(chain),
    )?;
    let outcome = test.execute().await;
    producer.abort();

    let summary = outcome?;
    println!(
        "{} passed: {} blocks up to height {}, {} transactions, {} bytes",
        test.manifest().name,
        summary.blocks,
        summary.last_height,
        summary.total_txs,
        summary.total_bytes
    );
    Ok(())
}
