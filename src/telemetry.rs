//! Tracing subscriber init and a throughput/latency metrics collector,
//! grounded on the teacher's own `MetricsCollector`/`Metrics` pattern
//! (avg/p99 latency over a growing sample set, printed via `tracing::info!`).

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Initializes the global `tracing` subscriber. `json` selects structured
/// JSON output for production deployments; plain text otherwise.
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter);
    if json {
        let _ = tracing::subscriber::set_global_default(subscriber.json().finish());
    } else {
        let _ = tracing::subscriber::set_global_default(subscriber.finish());
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metrics {
    pub total_events: u64,
    pub events_per_second: f64,
    pub avg_latency_ms: f64,
    pub p99_latency_ms: f64,
    pub error_rate: f64,
}

pub struct MetricsCollector {
    metrics: Arc<RwLock<Metrics>>,
    latencies: Arc<RwLock<Vec<Duration>>>,
    errors: Arc<RwLock<u64>>,
    start_time: Instant,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            metrics: Arc::new(RwLock::new(Metrics {
                total_events: 0,
                events_per_second: 0.0,
                avg_latency_ms: 0.0,
                p99_latency_ms: 0.0,
                error_rate: 0.0,
            })),
            latencies: Arc::new(RwLock::new(Vec::new())),
            errors: Arc::new(RwLock::new(0)),
            start_time: Instant::now(),
        }
    }

    pub async fn record_event(&self, latency: Duration, is_error: bool) {
        let mut metrics = self.metrics.write().await;
        metrics.total_events += 1;

        if is_error {
            *self.errors.write().await += 1;
        }

        let mut latencies = self.latencies.write().await;
        latencies.push(latency);

        let total_ms: f64 = latencies.iter().map(|d| d.as_millis() as f64).sum();
        metrics.avg_latency_ms = total_ms / latencies.len() as f64;

        let mut sorted = latencies.clone();
        sorted.sort();
        let p99_idx = ((sorted.len() as f64 * 0.99) as usize).min(sorted.len().saturating_sub(1));
        if let Some(sample) = sorted.get(p99_idx) {
            metrics.p99_latency_ms = sample.as_millis() as f64;
        }

        let elapsed = self.start_time.elapsed().as_secs_f64().max(1e-6);
        metrics.events_per_second = metrics.total_events as f64 / elapsed;
        metrics.error_rate = *self.errors.read().await as f64 / metrics.total_events as f64;
    }

    pub async fn get_metrics(&self) -> Metrics {
        self.metrics.read().await.clone()
    }

    pub async fn print_metrics(&self) {
        let metrics = self.get_metrics().await;
        info!("=== Metrics ===");
        info!("Total Events: {}", metrics.total_events);
        info!("Events/sec: {:.2}", metrics.events_per_second);
        info!("Avg Latency: {:.2}ms", metrics.avg_latency_ms);
        info!("P99 Latency: {:.2}ms", metrics.p99_latency_ms);
        info!("Error Rate: {:.2}%", metrics.error_rate * 100.0);
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
