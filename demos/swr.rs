//! Stale-while-revalidate over a memory tier and a file tier.
//!
//! Run with `RUST_LOG=tiered_swr=debug cargo run --example swr` to watch
//! backfills and background refreshes.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tiered_swr::{
    CacheBuilder, FileLockProvider, FileStore, FileStoreConfig, HashMapStore, SwrOptions,
    TokioDefer, Ttl,
};
use tracing_subscriber::EnvFilter;

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Report {
    generation: u32,
    rows: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let dir = std::env::temp_dir().join("tiered-swr-demo");
    let files = FileStore::new(FileStoreConfig::new(dir.join("data"))).await?;

    let cache = CacheBuilder::new()
        .tier(Arc::new(HashMapStore::default()))
        .tier(Arc::new(files))
        .lock_provider(Arc::new(FileLockProvider::new(dir.join("locks"))?))
        .defer_hook(Arc::new(TokioDefer))
        .build()?;
    cache.delete("report.daily").await?;

    // Fresh for 1s, then served stale for 10s while a background task refreshes it.
    let options = SwrOptions::new(Ttl::Seconds(1), 10, 0).deferred();
    let generation = Arc::new(AtomicU32::new(0));

    for round in 0..4 {
        let counter = generation.clone();
        let report: Report = cache
            .get_or_set_swr("report.daily", &options, move || async move {
                let generation = counter.fetch_add(1, Ordering::SeqCst) + 1;
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok::<_, std::io::Error>(Report {
                    generation,
                    rows: vec![format!("built by generation {}", generation)],
                })
            })
            .await?;

        println!("round {}: served generation {} {:?}", round, report.generation, report.rows);
        tokio::time::sleep(Duration::from_millis(1500)).await;
    }

    println!("producer ran {} times", generation.load(Ordering::SeqCst));
    cache.clear().await;
    Ok(())
}
