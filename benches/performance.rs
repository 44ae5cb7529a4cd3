use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use std::time::Duration;
use switchyard::cache::{NoDisposal, SlidingExpirationCache};
use switchyard::sql;
use tokio::runtime::Runtime;

const STATEMENTS: [&str; 6] = [
    "SELECT * FROM orders WHERE id = 42",
    "/* app */ BEGIN; UPDATE orders SET state = 'paid' WHERE id = 42",
    "  commit  ",
    "SET autocommit = 0",
    "insert into audit (event) values ('login'); select 1",
    "START TRANSACTION READ ONLY",
];

/// Statement classifier benchmarks
fn bench_classifier(c: &mut Criterion) {
    let mut group = c.benchmark_group("classifier");

    group.bench_function("classify", |b| {
        b.iter(|| {
            for statement in STATEMENTS.iter() {
                black_box(sql::classify(black_box(statement), false));
            }
        });
    });

    group.bench_function("is_dml", |b| {
        b.iter(|| {
            for statement in STATEMENTS.iter() {
                black_box(sql::is_dml(black_box(statement)));
            }
        });
    });

    group.bench_function("extract_autocommit_value", |b| {
        b.iter(|| black_box(sql::extract_autocommit_value(black_box("SET autocommit = 0"))));
    });

    group.finish();
}

/// Sliding-expiration cache benchmarks
fn bench_cache(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("sliding_expiration_cache");

    for size in [10usize, 100, 1000].iter() {
        let cache: Arc<SlidingExpirationCache<String, usize>> = Arc::new(
            SlidingExpirationCache::new(
                Duration::from_secs(600),
                Duration::from_secs(600),
                Arc::new(NoDisposal),
            ),
        );
        for i in 0..*size {
            cache.put(format!("instance-{}:5432/", i), i);
        }

        group.bench_with_input(BenchmarkId::new("compute_if_absent_hit", size), size, |b, &size| {
            let key = format!("instance-{}:5432/", size / 2);
            b.to_async(&rt).iter(|| {
                let cache = Arc::clone(&cache);
                let key = key.clone();
                async move {
                    let value = cache.compute_if_absent(key, |_| Ok(0)).await;
                    black_box(value).ok();
                }
            });
        });

        group.bench_with_input(BenchmarkId::new("sweep_nothing_expired", size), size, |b, _| {
            b.to_async(&rt).iter(|| {
                let cache = Arc::clone(&cache);
                async move { black_box(cache.sweep().await) }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_classifier, bench_cache);
criterion_main!(benches);
