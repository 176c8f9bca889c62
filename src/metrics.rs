//! Inference performance metrics.
//!
//! Two layers:
//!
//! - [`MetricsWindow`] keeps the last [`METRICS_WINDOW`] inference latencies
//!   of one model and derives average/min/max from them. Snapshots
//!   ([`PerformanceMetrics`]) are read by the registry and by dashboards.
//! - The `record_*` functions forward the same measurements to the `metrics`
//!   facade so a host application that installs a recorder (Prometheus,
//!   StatsD, ...) gets `mlcore_*` series for free. Without a recorder they
//!   are no-ops.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Number of latency samples kept per model.
pub const METRICS_WINDOW: usize = 100;

/// Snapshot of a model's rolling performance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
  /// Mean latency over the window, in milliseconds.
  pub average_ms: f64,
  /// Fastest latency in the window.
  pub min_ms: f64,
  /// Slowest latency in the window.
  pub max_ms: f64,
  /// Latency of the most recent inference.
  pub last_ms: f64,
  /// Completed inferences since the model was created.
  pub total_count: u64,
  /// Samples currently held in the window.
  pub window_len: usize,
  /// Backend memory usage at the last sample, in megabytes.
  pub memory_usage_mb: f64,
}

/// Capped rolling window of latency samples; the oldest sample is dropped first.
#[derive(Debug, Clone)]
pub struct MetricsWindow {
  samples: VecDeque<f64>,
  capacity: usize,
  total_count: u64,
  memory_usage_mb: f64,
}

impl Default for MetricsWindow {
  fn default() -> Self {
    Self::new(METRICS_WINDOW)
  }
}

impl MetricsWindow {
  /// Creates a window holding at most `capacity` samples.
  pub fn new(capacity: usize) -> Self {
    Self {
      samples: VecDeque::with_capacity(capacity),
      capacity: capacity.max(1),
      total_count: 0,
      memory_usage_mb: 0.0,
    }
  }

  /// Appends a sample and returns the updated snapshot.
  pub fn record(&mut self, latency_ms: f64, memory_usage_mb: f64) -> PerformanceMetrics {
    if self.samples.len() == self.capacity {
      self.samples.pop_front();
    }
    self.samples.push_back(latency_ms);
    self.total_count += 1;
    self.memory_usage_mb = memory_usage_mb;
    self.snapshot()
  }

  /// Updates the memory sample without adding a latency.
  pub fn set_memory(&mut self, memory_usage_mb: f64) {
    self.memory_usage_mb = memory_usage_mb;
  }

  /// Current snapshot.
  pub fn snapshot(&self) -> PerformanceMetrics {
    if self.samples.is_empty() {
      return PerformanceMetrics {
        memory_usage_mb: self.memory_usage_mb,
        total_count: self.total_count,
        ..PerformanceMetrics::default()
      };
    }
    let sum: f64 = self.samples.iter().sum();
    let min = self.samples.iter().copied().fold(f64::INFINITY, f64::min);
    let max = self.samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    PerformanceMetrics {
      average_ms: sum / self.samples.len() as f64,
      min_ms: min,
      max_ms: max,
      last_ms: self.samples.back().copied().unwrap_or_default(),
      total_count: self.total_count,
      window_len: self.samples.len(),
      memory_usage_mb: self.memory_usage_mb,
    }
  }
}

/// Records one inference in `mlcore_inference_duration_ms` and `mlcore_inferences_total`.
pub fn record_inference(model: &str, latency_ms: f64) {
  ::metrics::histogram!("mlcore_inference_duration_ms", "model" => model.to_string())
    .record(latency_ms);
  ::metrics::counter!("mlcore_inferences_total", "model" => model.to_string()).increment(1);
}

/// Records a completed load in `mlcore_model_loads_total`.
pub fn record_model_load(model: &str, device: &str, duration_ms: f64) {
  ::metrics::counter!(
    "mlcore_model_loads_total",
    "model" => model.to_string(),
    "device" => device.to_string()
  )
  .increment(1);
  ::metrics::histogram!("mlcore_model_load_duration_ms", "model" => model.to_string())
    .record(duration_ms);
}

/// Records a failure in `mlcore_model_errors_total`.
pub fn record_model_error(model: &str, context: &str) {
  ::metrics::counter!(
    "mlcore_model_errors_total",
    "model" => model.to_string(),
    "context" => context.to_string()
  )
  .increment(1);
}

/// Sets the `mlcore_registry_models` gauge.
pub fn record_registry_size(count: usize) {
  ::metrics::gauge!("mlcore_registry_models").set(count as f64);
}
