use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use tokio::runtime::Runtime;

use flotilla_core::{GenesisBuilder, GenesisDoc, GenesisValidator, KeyGenerator, KeyType, Resources};
use flotilla_node::{build_address_books, make_config, AddressBookStrategy, ConfigOption};
use flotilla_testing::sim_testnet;
use flotilla_testnet::TestnetConfig;

fn validators(count: usize) -> Vec<GenesisValidator> {
    let mut keygen = KeyGenerator::new(42);
    (0..count)
        .map(|i| GenesisValidator {
            name: format!("val{}", i),
            initial_tokens: 10_000_000,
            stake: 5_000_000,
            consensus_key: keygen.generate(KeyType::Ed25519).public_key(),
            network_key: keygen.generate(KeyType::Ed25519).public_key(),
        })
        .collect()
}

fn addresses(count: usize) -> Vec<String> {
    let mut keygen = KeyGenerator::new(7);
    (0..count)
        .map(|i| {
            let id = keygen.generate(KeyType::Ed25519).public_key().address_hex();
            format!("{}@10.0.{}.{}:26656", id, i / 250, i % 250 + 2)
        })
        .collect()
}

fn benchmark_genesis_export(c: &mut Criterion) {
    let mut group = c.benchmark_group("genesis_export");
    for count in [4usize, 100] {
        let entries = validators(count);
        group.bench_with_input(BenchmarkId::from_parameter(count), &entries, |b, entries| {
            b.iter(|| {
                let mut builder = GenesisBuilder::new().with_chain_id("bench");
                builder
                    .add_modifier(Arc::new(|doc: &mut GenesisDoc| {
                        doc.consensus_params.block_max_bytes = 8 * 1024 * 1024;
                    }))
                    .unwrap();
                for validator in entries {
                    builder.new_validator(validator.clone()).unwrap();
                }
                builder.export().unwrap().to_json_pretty().unwrap()
            })
        });
    }
    group.finish();
}

fn benchmark_address_books(c: &mut Criterion) {
    let addrs = addresses(100);
    let mut group = c.benchmark_group("address_books_100");
    group.bench_function("full_mesh", |b| {
        b.iter(|| build_address_books(AddressBookStrategy::FullMesh, black_box(&addrs)))
    });
    group.bench_function("bounded_fanout_8", |b| {
        b.iter(|| build_address_books(AddressBookStrategy::BoundedFanout(8), black_box(&addrs)))
    });
    group.finish();

    let peers: Vec<String> = addrs[1..].to_vec();
    let options = [
        ConfigOption::PerPeerBandwidth(5 * 1024 * 1024),
        ConfigOption::LocalTracing("local".to_string()),
    ];
    c.bench_function("node_config_toml_99_peers", |b| {
        b.iter(|| {
            make_config("val0", "10.0.0.2:26656", black_box(&peers), &options)
                .to_toml()
                .unwrap()
        })
    });
}

fn benchmark_sim_setup(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let staging = tempfile::TempDir::new().unwrap();

    c.bench_function("sim_setup_4_validators", |b| {
        b.iter(|| {
            rt.block_on(async {
                let config = TestnetConfig::new("bench").with_staging_dir(staging.path());
                let (mut testnet, _cluster, _chain) = sim_testnet(config).unwrap();
                testnet
                    .create_genesis_nodes(4, "v1.0.0", 10_000_000, 0, Resources::default(), false)
                    .await
                    .unwrap();
                testnet.setup(&[]).await.unwrap();
                testnet.cleanup().await
            })
        })
    });
}

criterion_group!(
    benches,
    benchmark_genesis_export,
    benchmark_address_books,
    benchmark_sim_setup
);
criterion_main!(benches);
