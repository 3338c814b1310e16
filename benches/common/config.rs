use std::env;

/// Benchmark knobs read from the environment.
#[derive(Debug, Clone)]
pub struct BenchConfig {
    /// Redis URL (REDIS_URL). Redis groups only run when it is set.
    pub redis_url: Option<String>,

    /// Simulated producer latency in milliseconds (DB_LATENCY_MS, default 20)
    pub db_latency_ms: u64,

    /// Criterion sample size (BENCH_SAMPLE_SIZE, default 100)
    pub sample_size: usize,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            redis_url: env::var("REDIS_URL").ok().filter(|url| !url.is_empty()),
            db_latency_ms: env::var("DB_LATENCY_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(20),
            sample_size: env::var("BENCH_SAMPLE_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(100),
        }
    }
}

impl BenchConfig {
    pub fn new() -> Self {
        let config = Self::default();
        eprintln!("Benchmark configuration:");
        eprintln!("  Redis URL: {}", config.redis_url.as_deref().unwrap_or("(skipped)"));
        eprintln!("  Producer latency: {}ms", config.db_latency_ms);
        eprintln!("  Sample size: {}", config.sample_size);
        config
    }
}
