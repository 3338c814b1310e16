use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use std::sync::Arc;
use tiered_swr::{
    CacheBuilder, CompressionKind, HashMapStore, Lifetime, MokaStore, MokaStoreConfig,
    RecordCodec, RedisStore, RedisStoreConfig, SerializerKind, Store, SwrCache, SwrOptions, Ttl,
};
use tokio::runtime::Runtime;

mod common;
use common::{BenchConfig, BenchUser, FakeDatabase, KeyGenerator};

const USERS: usize = 2_000;

fn swr_options() -> SwrOptions {
    SwrOptions::new(Ttl::Seconds(300), 600, 0)
}

fn moka_store() -> Arc<dyn Store> {
    Arc::new(MokaStore::new(MokaStoreConfig {
        max_capacity: 10_000,
        time_to_idle: None,
    }))
}

fn memory_cache() -> SwrCache {
    CacheBuilder::new()
        .tier(Arc::new(HashMapStore::default()))
        .build()
        .expect("cache")
}

fn moka_cache() -> SwrCache {
    CacheBuilder::new().tier(moka_store()).build().expect("cache")
}

async fn moka_redis_cache(url: &str) -> SwrCache {
    let redis = RedisStore::new(RedisStoreConfig {
        url: url.to_string(),
        prefix: "bench:".to_string(),
    })
    .await
    .expect("Redis connection failed");

    CacheBuilder::new()
        .tier(moka_store())
        .tier(Arc::new(redis))
        .build()
        .expect("cache")
}

async fn warm(cache: &SwrCache, db: &FakeDatabase, keys: &[String]) {
    for key in keys {
        let db = db.clone();
        let owned = key.clone();
        let _: BenchUser = cache
            .get_or_set_swr(key, &swr_options(), move || async move { db.load(&owned).await })
            .await
            .expect("warm");
    }
}

fn caches(rt: &Runtime, config: &BenchConfig) -> Vec<(&'static str, SwrCache)> {
    let mut caches = vec![("hashmap", memory_cache()), ("moka", moka_cache())];
    if let Some(url) = &config.redis_url {
        caches.push(("moka_redis", rt.block_on(moka_redis_cache(url))));
    }
    caches
}

/// Every read is a fresh hit in the first tier.
fn bench_hot_reads(c: &mut Criterion, config: &BenchConfig) {
    let rt = Runtime::new().expect("runtime");
    let mut group = c.benchmark_group("hot_reads");
    group.sample_size(config.sample_size);

    let db = FakeDatabase::new(USERS, 0);
    let keys = KeyGenerator::new(USERS).sequential();
    group.throughput(Throughput::Elements(keys.len() as u64));

    for (name, cache) in caches(&rt, config) {
        rt.block_on(warm(&cache, &db, &keys));

        group.bench_function(BenchmarkId::new("get", name), |b| {
            b.to_async(&rt).iter(|| async {
                for key in &keys {
                    black_box(cache.get::<BenchUser>(key).await.ok());
                }
            });
        });

        group.bench_function(BenchmarkId::new("get_or_set_swr", name), |b| {
            b.to_async(&rt).iter(|| async {
                for key in &keys {
                    let db = db.clone();
                    let owned = key.clone();
                    let user: Result<BenchUser, _> = cache
                        .get_or_set_swr(key, &swr_options(), move || async move {
                            db.load(&owned).await
                        })
                        .await;
                    black_box(user.ok());
                }
            });
        });
    }

    group.finish();
}

/// Mostly hits with a skewed key distribution; misses pay the producer latency.
fn bench_mixed_workload(c: &mut Criterion, config: &BenchConfig) {
    let rt = Runtime::new().expect("runtime");
    let mut group = c.benchmark_group("mixed_workload");
    group.sample_size(config.sample_size.min(30));

    let db = FakeDatabase::new(USERS, config.db_latency_ms);
    let key_gen = KeyGenerator::new(USERS);

    for (name, cache) in caches(&rt, config) {
        rt.block_on(warm(&cache, &db, &key_gen.sequential()[..USERS / 5]));

        group.bench_function(name, |b| {
            b.to_async(&rt).iter(|| {
                let cache = cache.clone();
                let db = db.clone();
                let keys = key_gen.skewed(50);
                async move {
                    for key in &keys {
                        let db = db.clone();
                        let owned = key.clone();
                        let user: Result<BenchUser, _> = cache
                            .get_or_set_swr(key, &swr_options(), move || async move {
                                db.load(&owned).await
                            })
                            .await;
                        black_box(user.ok());
                    }
                }
            });
        });
    }

    eprintln!("mixed_workload producer calls: {}", db.query_count());
    group.finish();
}

/// Writes go through every tier.
fn bench_writes(c: &mut Criterion, config: &BenchConfig) {
    let rt = Runtime::new().expect("runtime");
    let mut group = c.benchmark_group("writes");
    group.sample_size(config.sample_size);

    let users: Vec<(String, BenchUser)> = (0..500u64)
        .map(|i| (format!("user.{}", i), BenchUser::new(i)))
        .collect();
    group.throughput(Throughput::Elements(users.len() as u64));

    for (name, cache) in caches(&rt, config) {
        group.bench_function(name, |b| {
            b.to_async(&rt).iter(|| async {
                for (key, user) in &users {
                    black_box(cache.set(key, user, Ttl::Seconds(60)).await.ok());
                }
            });
        });
    }

    group.finish();
}

/// Envelope cost per serializer and compressor.
fn bench_codec(c: &mut Criterion, config: &BenchConfig) {
    let mut group = c.benchmark_group("codec");
    group.sample_size(config.sample_size);

    let value: Vec<BenchUser> = (0..20).map(BenchUser::new).collect();
    let lifetime = Lifetime {
        expires_at: u32::MAX as u64,
        swr_window: 60,
        stale_if_error_window: 0,
    };

    for serializer in [SerializerKind::Json, SerializerKind::Bincode] {
        for compression in [CompressionKind::None, CompressionKind::Gzip, CompressionKind::Zstd] {
            let codec = RecordCodec::new(serializer, compression.compressor(None));
            let id = format!("{:?}_{:?}", serializer, compression).to_lowercase();
            let bytes = codec.encode(&value, lifetime).expect("encode");

            group.bench_function(BenchmarkId::new("encode", &id), |b| {
                b.iter(|| black_box(codec.encode(black_box(&value), lifetime).ok()));
            });
            group.bench_function(BenchmarkId::new("decode", &id), |b| {
                b.iter(|| black_box(codec.decode::<Vec<BenchUser>>(black_box(&bytes))));
            });
        }
    }

    group.finish();
}

fn run_benchmarks(c: &mut Criterion) {
    let config = BenchConfig::new();

    bench_hot_reads(c, &config);
    bench_mixed_workload(c, &config);
    bench_writes(c, &config);
    bench_codec(c, &config);
}

criterion_group!(benches, run_benchmarks);
criterion_main!(benches);
