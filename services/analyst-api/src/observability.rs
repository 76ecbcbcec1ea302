//! Observability: in-process metrics served by `/monitoring/metrics`

use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

/// Latency samples kept per series
const SAMPLE_WINDOW: usize = 500;

#[derive(Default)]
struct Registry {
    counters: HashMap<&'static str, u64>,
    gauges: HashMap<&'static str, f64>,
    samples: HashMap<&'static str, VecDeque<f64>>,
}

/// Counters, gauges and recent latency samples, shared by all handlers
#[derive(Clone)]
pub struct MetricsCollector {
    registry: Arc<RwLock<Registry>>,
    started: Instant,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(RwLock::new(Registry::default())),
            started: Instant::now(),
        }
    }

    pub async fn increment(&self, name: &'static str, by: u64) {
        let mut registry = self.registry.write().await;
        *registry.counters.entry(name).or_default() += by;
    }

    pub async fn gauge(&self, name: &'static str, value: f64) {
        self.registry.write().await.gauges.insert(name, value);
    }

    /// Record a sample; only the latest `SAMPLE_WINDOW` are kept
    pub async fn histogram(&self, name: &'static str, value: f64) {
        let mut registry = self.registry.write().await;
        let samples = registry.samples.entry(name).or_default();
        if samples.len() == SAMPLE_WINDOW {
            samples.pop_front();
        }
        samples.push_back(value);
    }

    pub async fn counter(&self, name: &str) -> u64 {
        self.registry
            .read()
            .await
            .counters
            .get(name)
            .copied()
            .unwrap_or(0)
    }

    pub async fn snapshot(&self) -> MetricsSnapshot {
        let registry = self.registry.read().await;

        let latencies = registry
            .samples
            .iter()
            .filter(|(_, samples)| !samples.is_empty())
            .map(|(name, samples)| {
                let count = samples.len();
                let mean = samples.iter().sum::<f64>() / count as f64;
                let max = samples.iter().copied().fold(f64::MIN, f64::max);
                (name.to_string(), SampleSummary { count, mean, max })
            })
            .collect();

        MetricsSnapshot {
            counters: registry
                .counters
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
            gauges: registry
                .gauges
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
            latencies,
            uptime_secs: self.started.elapsed().as_secs(),
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SampleSummary {
    pub count: usize,
    pub mean: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub counters: HashMap<String, u64>,
    pub gauges: HashMap<String, f64>,
    pub latencies: HashMap<String, SampleSummary>,
    pub uptime_secs: u64,
}

/// Metric names
pub mod metrics {
    pub const MARKET_DATA_REQUESTS: &str = "market_data_requests_total";
    pub const MARKET_DATA_ERRORS: &str = "market_data_errors_total";
    pub const CANDLES_FETCHED: &str = "candles_fetched_total";

    pub const ANALYSIS_RUNS: &str = "analysis_runs_total";
    pub const OTE_ZONES_FOUND: &str = "ote_zones_found_total";

    pub const LLM_REQUESTS: &str = "llm_requests_total";
    pub const LLM_ERRORS: &str = "llm_errors_total";
    pub const LLM_LATENCY_MS: &str = "llm_latency_ms";

    pub const TASKS_STARTED: &str = "analysis_tasks_started_total";
    pub const TASKS_FAILED: &str = "analysis_tasks_failed_total";
    pub const TASKS_PENDING: &str = "analysis_tasks_pending";

    pub const RATE_LIMITED: &str = "rate_limited_total";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_snapshot() {
        let collector = MetricsCollector::new();
        collector.increment(metrics::LLM_REQUESTS, 1).await;
        collector.increment(metrics::LLM_REQUESTS, 2).await;
        collector.gauge(metrics::TASKS_PENDING, 4.0).await;
        collector.histogram(metrics::LLM_LATENCY_MS, 100.0).await;
        collector.histogram(metrics::LLM_LATENCY_MS, 300.0).await;

        let snapshot = collector.snapshot().await;
        assert_eq!(snapshot.counters[metrics::LLM_REQUESTS], 3);
        assert_eq!(snapshot.gauges[metrics::TASKS_PENDING], 4.0);

        let latency = &snapshot.latencies[metrics::LLM_LATENCY_MS];
        assert_eq!(latency.count, 2);
        assert_eq!(latency.mean, 200.0);
        assert_eq!(latency.max, 300.0);

        assert_eq!(collector.counter("missing").await, 0);
    }

    #[tokio::test]
    async fn test_samples_are_bounded() {
        let collector = MetricsCollector::new();
        for i in 0..(SAMPLE_WINDOW + 10) {
            collector.histogram(metrics::LLM_LATENCY_MS, i as f64).await;
        }

        let snapshot = collector.snapshot().await;
        let latency = &snapshot.latencies[metrics::LLM_LATENCY_MS];
        assert_eq!(latency.count, SAMPLE_WINDOW);
        assert_eq!(latency.max, (SAMPLE_WINDOW + 9) as f64);
    }
}
