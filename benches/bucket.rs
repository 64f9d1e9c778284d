use criterion::{black_box, criterion_group, criterion_main, Criterion};

use sockflow::bucket::TokenBucket;

/// The bucket sits on the per-send hot path, so admission and return must
/// stay allocation-free and far below syscall cost.
fn bench_bucket(c: &mut Criterion) {
    let mut tb = TokenBucket::new(8_000_000_000, 1 << 20);
    c.bench_function("bucket_remove_give_back", |b| {
        b.iter(|| {
            let taken = tb.remove(black_box(65536));
            tb.give_back(taken);
        })
    });

    let mut unlimited = TokenBucket::new(0, 1 << 20);
    c.bench_function("bucket_remove_unlimited", |b| {
        b.iter(|| unlimited.remove(black_box(65536)))
    });
}

criterion_group!(benches, bench_bucket);
criterion_main!(benches);
