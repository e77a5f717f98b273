use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use mcp_resilience::{CacheConfig, CacheManager, EvictionPolicy};
use serde_json::json;
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn benchmark_generate_key(c: &mut Criterion) {
    let params = json!({
        "query": "circuit breaker patterns",
        "page": 3,
        "filters": {"year": 2024, "venue": ["icse", "fse"]},
        "lang": null,
    });

    c.bench_function("generate_key", |b| {
        b.iter(|| CacheManager::generate_key("scholar:search", black_box(&params)).unwrap());
    });
}

fn benchmark_get_hit(c: &mut Criterion) {
    let rt = runtime();
    let cache = CacheManager::new(CacheConfig::default());
    rt.block_on(async {
        for i in 0..1_000 {
            cache
                .set(&format!("key{i}"), &json!({"id": i, "title": "cached"}), None)
                .await
                .unwrap();
        }
    });

    c.bench_function("get_hit", |b| {
        b.to_async(&rt)
            .iter(|| async { cache.get::<serde_json::Value>(black_box("key500")).await });
    });
}

fn benchmark_set_with_eviction(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("set_with_eviction");

    for policy in [EvictionPolicy::Lru, EvictionPolicy::Lfu, EvictionPolicy::TtlOldest] {
        for max_entries in [100usize, 1_000, 10_000] {
            let cache = CacheManager::new(CacheConfig {
                max_entries,
                eviction_policy: policy,
                ..CacheConfig::default()
            });
            rt.block_on(async {
                for i in 0..max_entries {
                    cache.set(&format!("warm{i}"), &i, None).await.unwrap();
                }
            });

            let mut next = 0u64;
            group.bench_with_input(
                BenchmarkId::new(policy.to_string(), max_entries),
                &max_entries,
                |b, _| {
                    b.iter(|| {
                        next += 1;
                        rt.block_on(cache.set(&format!("new{next}"), &next, None))
                            .unwrap();
                    });
                },
            );
        }
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_generate_key,
    benchmark_get_hit,
    benchmark_set_with_eviction
);
criterion_main!(benches);
