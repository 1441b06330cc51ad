use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use txnkv::crypto::{sign_batch, verify, Ed25519Signer, Ed25519Verifier, Signer};

const ED25519_SIG_LEN: usize = 64;

fn messages(n: usize) -> Vec<Vec<u8>> {
    (0..n).map(|i| format!("message-{i}").into_bytes()).collect()
}

fn bench_sign_batch(c: &mut Criterion) {
    let signer = Ed25519Signer::generate();
    let mut group = c.benchmark_group("sign_batch");
    for &n in &[1usize, 16, 256, 4096] {
        let batch = messages(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &batch, |b, batch| {
            b.iter(|| sign_batch(&signer, black_box(batch)).unwrap());
        });
    }
    group.finish();
}

fn bench_verify(c: &mut Criterion) {
    let signer = Ed25519Signer::generate();
    let mut group = c.benchmark_group("verify");
    for &n in &[1usize, 16, 256, 4096] {
        let batch = messages(n);
        let sigs = sign_batch(&signer, &batch).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(n), &(batch, sigs), |b, (batch, sigs)| {
            b.iter(|| {
                verify(&Ed25519Verifier, &signer.public_key(), black_box(&batch[0]), black_box(&sigs[0]), ED25519_SIG_LEN)
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_sign_batch, bench_verify);
criterion_main!(benches);
