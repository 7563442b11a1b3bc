use crate::admission::store::{CounterStore, InMemoryCounterStore, RedisCounterStore};
use crate::admission::AdmissionController;
use crate::completion::{CompletionGenerator, GeneratorConfig};
use crate::config::GatewayConfig;
use crate::metrics::Metrics;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Shared gateway state, cheaply cloneable — one instance per process,
/// handed to every request handler.
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<GatewayConfig>,
    pub metrics: Metrics,
    pub admission: Arc<AdmissionController>,
    pub generator: Arc<CompletionGenerator>,
    pub port: u16,
    request_count: Arc<AtomicU64>,
    started_at: u64,
}

impl GatewayState {
    /// Build gateway state, connecting to Redis with retry and falling back
    /// to the in-memory store if the connection never succeeds — following
    /// the teacher's "degrade rather than fail to start" posture (the
    /// reference Python implementation does the same: see
    /// `original_source/rate_limiter.py::initialize`).
    pub async fn new(config: GatewayConfig, port: u16) -> Self {
        let store: Arc<dyn CounterStore> = match connect_with_retry(&config).await {
            Some(store) => {
                tracing::info!("admission: connected to redis, url={}", config.redis.url);
                store
            }
            None => {
                tracing::warn!("admission: redis unavailable, using in-memory counter store");
                Arc::new(InMemoryCounterStore::new())
            }
        };

        let generator_config = GeneratorConfig {
            min_output_tokens: config.generator.min_output_tokens,
            max_output_tokens: config.generator.max_output_tokens,
            avg_output_tokens: config.generator.avg_output_tokens,
        };

        Self {
            config: Arc::new(config),
            metrics: Metrics::install(),
            admission: Arc::new(AdmissionController::new(store)),
            generator: Arc::new(CompletionGenerator::new(generator_config)),
            port,
            request_count: Arc::new(AtomicU64::new(0)),
            started_at: unix_now(),
        }
    }

    /// Build state against an explicit store, bypassing Redis entirely —
    /// used by tests that want a deterministic in-memory backend.
    pub fn with_store(config: GatewayConfig, store: Arc<dyn CounterStore>, port: u16) -> Self {
        let generator_config = GeneratorConfig {
            min_output_tokens: config.generator.min_output_tokens,
            max_output_tokens: config.generator.max_output_tokens,
            avg_output_tokens: config.generator.avg_output_tokens,
        };
        Self {
            config: Arc::new(config),
            metrics: Metrics::install(),
            admission: Arc::new(AdmissionController::new(store)),
            generator: Arc::new(CompletionGenerator::new(generator_config)),
            port,
            request_count: Arc::new(AtomicU64::new(0)),
            started_at: unix_now(),
        }
    }

    pub fn record_request(&self) -> u64 {
        self.request_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }

    pub fn started_at(&self) -> u64 {
        self.started_at
    }
}

async fn connect_with_retry(config: &GatewayConfig) -> Option<Arc<dyn CounterStore>> {
    let mut delay = std::time::Duration::from_secs(1);
    for attempt in 1..=config.redis.connect_retries.max(1) {
        match RedisCounterStore::connect(&config.redis.url).await {
            Ok(store) => return Some(Arc::new(store)),
            Err(e) => {
                tracing::warn!(
                    "admission: redis connect attempt {}/{} failed, error={}",
                    attempt,
                    config.redis.connect_retries,
                    e
                );
                if attempt < config.redis.connect_retries {
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
    }
    None
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_secs()
}
