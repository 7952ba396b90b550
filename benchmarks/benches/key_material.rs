use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use flotilla_core::{derive_key, KeyGenerator, KeyType};

fn benchmark_key_derivation(c: &mut Criterion) {
    c.bench_function("derive_ed25519", |b| {
        b.iter(|| derive_key(black_box(42), black_box(7), KeyType::Ed25519))
    });

    c.bench_function("derive_secp256k1", |b| {
        b.iter(|| derive_key(black_box(42), black_box(7), KeyType::Secp256k1))
    });

    let mut group = c.benchmark_group("validator_keys");
    for validators in [4usize, 50, 100] {
        group.bench_with_input(
            BenchmarkId::from_parameter(validators),
            &validators,
            |b, &validators| {
                b.iter(|| {
                    let mut keygen = KeyGenerator::new(42);
                    for _ in 0..validators {
                        black_box(keygen.generate(KeyType::Ed25519));
                        black_box(keygen.generate(KeyType::Ed25519));
                    }
                    keygen.draws()
                })
            },
        );
    }
    group.finish();
}

fn benchmark_key_encoding(c: &mut Criterion) {
    let network_key = derive_key(42, 1, KeyType::Ed25519);
    let public = network_key.public_key();

    c.bench_function("node_id", |b| b.iter(|| black_box(&public).address_hex()));

    c.bench_function("encode_private_key", |b| {
        b.iter(|| black_box(&network_key).encode())
    });
}

criterion_group!(benches, benchmark_key_derivation, benchmark_key_encoding);
criterion_main!(benches);
