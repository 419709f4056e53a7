//! Metrics module for the stream analyzer
//!
//! Provides the run-wide metrics snapshot published at every health check,
//! plus system metrics, with JSON serialization support.

use crate::supervisor::{HealthCounters, StreamHealth};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;
use uuid::Uuid;

/// System-level metrics for resource monitoring
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SystemMetrics {
    pub cpu_usage_percent: f32,
    pub mem_usage_percent: f32,
    pub load_avg_1: f32,
    pub load_avg_5: f32,
    pub load_avg_15: f32,
}

/// Complete metrics snapshot of one analyzer run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsSnapshot {
    pub timestamp_unix_ms: i64,
    /// Random id of this run
    pub session_id: String,
    pub stream_url: String,
    pub model: String,
    pub executors: usize,
    pub queue_capacity: usize,
    /// Throughput of the last completed window
    pub fps: f64,
    /// Lifetime counters
    pub totals: HealthCounters,
    pub retries: u32,
    pub windows_checked: u64,
    /// Number of pause-and-reopen cycles performed
    pub retry_cycles: u64,
    pub last_stream_health: Option<StreamHealth>,
    pub pipeline_healthy: bool,
    pub aborted: bool,
    pub system: SystemMetrics,
}

/// Shared metrics state for concurrent access between the analyzer and the server
pub type SharedMetrics = Arc<RwLock<MetricsSnapshot>>;

impl Default for MetricsSnapshot {
    fn default() -> Self {
        Self {
            timestamp_unix_ms: 0,
            session_id: Uuid::new_v4().to_string(),
            stream_url: String::new(),
            model: String::new(),
            executors: 0,
            queue_capacity: 0,
            fps: 0.0,
            totals: HealthCounters::default(),
            retries: 0,
            windows_checked: 0,
            retry_cycles: 0,
            last_stream_health: None,
            pipeline_healthy: true,
            aborted: false,
            system: SystemMetrics::default(),
        }
    }
}

/// Creates a new SharedMetrics instance with default values and a fresh session id
pub fn new_shared_metrics() -> SharedMetrics {
    Arc::new(RwLock::new(MetricsSnapshot::default()))
}

pub fn now_unix_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Samples system metrics using sysinfo
///
/// CPU usage is a delta between two refreshes, so the sampler keeps its
/// `System` alive and primes it on construction.
pub struct SystemSampler {
    sys: sysinfo::System,
}

impl SystemSampler {
    pub fn new() -> Self {
        let mut sys = sysinfo::System::new();
        sys.refresh_cpu_usage();
        Self { sys }
    }

    /// Usage since the previous sample
    pub fn sample(&mut self) -> SystemMetrics {
        self.sys.refresh_cpu_usage();
        self.sys.refresh_memory();

        let total_memory = self.sys.total_memory();
        let used_memory = self.sys.used_memory();
        let mem_usage = if total_memory > 0 {
            (used_memory as f64 / total_memory as f64 * 100.0) as f32
        } else {
            0.0
        };

        let load_avg = sysinfo::System::load_average();

        SystemMetrics {
            cpu_usage_percent: self.sys.global_cpu_usage(),
            mem_usage_percent: mem_usage,
            load_avg_1: load_avg.one as f32,
            load_avg_5: load_avg.five as f32,
            load_avg_15: load_avg.fifteen as f32,
        }
    }
}

impl Default for SystemSampler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_each_run_gets_its_own_session() {
        let a = MetricsSnapshot::default();
        let b = MetricsSnapshot::default();
        assert_ne!(a.session_id, b.session_id);
        assert!(Uuid::parse_str(&a.session_id).is_ok());
    }

    #[test]
    fn test_snapshot_serializes_health_verdict() {
        let snapshot = MetricsSnapshot {
            last_stream_health: Some(StreamHealth::Retry),
            retry_cycles: 1,
            ..MetricsSnapshot::default()
        };

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["last_stream_health"], "RETRY");
        assert_eq!(json["totals"]["frames_processed"], 0);

        let back: MetricsSnapshot = serde_json::from_value(json).unwrap();
        assert_eq!(back, snapshot);
    }

    #[test]
    fn test_system_metrics_are_percentages() {
        let mut sampler = SystemSampler::new();
        let system = sampler.sample();
        assert!(system.mem_usage_percent >= 0.0 && system.mem_usage_percent <= 100.0);
        assert!(system.cpu_usage_percent >= 0.0);
    }

    #[test]
    fn test_cpu_usage_measured_between_samples() {
        let mut sampler = SystemSampler::new();
        let deadline = std::time::Instant::now() + sysinfo::MINIMUM_CPU_UPDATE_INTERVAL;
        // Keep a core busy so the delta has something to measure
        let mut spin = 0u64;
        while std::time::Instant::now() < deadline {
            spin = std::hint::black_box(spin.wrapping_add(1));
        }

        let system = sampler.sample();
        assert!(system.cpu_usage_percent > 0.0);
        assert!(system.cpu_usage_percent <= 100.0);
    }

    #[test]
    fn test_timestamp_is_after_epoch() {
        assert!(now_unix_ms() > 0);
    }
}
