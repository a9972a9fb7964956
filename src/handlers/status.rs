//! Status and health check handlers.
//!
//! - `/status` - Detailed service status with runtime metrics
//! - `/health` - Simple health check for systemd/load balancers
//!
//! The counters here are observability only; the store remains the source
//! of truth for ledger state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use hdrhistogram::Histogram;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::{debug, instrument};

use crate::handlers::AppState;
use crate::webhook::{DeliveryOutcome, DeliveryResult};

/// Health check response for simple liveness probes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Health status (always "healthy" if responding)
    pub status: String,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "healthy".to_string(),
        }
    }
}

/// Detailed service status response with runtime metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Service version (from Cargo.toml)
    pub version: String,

    /// Service name
    pub name: String,

    /// Uptime in seconds
    pub uptime_seconds: u64,

    /// Ledger and side-effect counters
    pub counters: CounterSnapshot,

    /// Memory usage metrics
    pub memory: MemoryMetrics,

    /// Webhook delivery latency percentiles
    pub delivery_latency: LatencyMetrics,

    /// Service status (always "running" if responding)
    pub status: String,

    /// ISO8601 timestamp of when status was generated
    pub timestamp: String,
}

/// Point-in-time snapshot of the service counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CounterSnapshot {
    /// Transactions created since startup
    pub transactions_created: u64,
    /// Transactions that reached `completed`
    pub transactions_completed: u64,
    /// Disputes raised
    pub disputes_opened: u64,
    /// Disputes moved out of `pending`
    pub disputes_decided: u64,
    /// Invoice artifacts ensured
    pub invoices_generated: u64,
    /// Webhook targets that acknowledged a delivery
    pub webhooks_delivered: u64,
    /// Webhook targets skipped by the SSRF guard
    pub webhooks_skipped: u64,
    /// Webhook targets that failed
    pub webhooks_failed: u64,
}

/// Memory usage metrics collected from sysinfo.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryMetrics {
    /// Resident Set Size - actual physical memory used (bytes)
    pub rss_bytes: u64,

    /// Virtual memory size (bytes)
    pub virtual_bytes: u64,
}

/// Latency percentile metrics in milliseconds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LatencyMetrics {
    /// 50th percentile (median)
    pub p50_ms: f64,
    /// 95th percentile
    pub p95_ms: f64,
    /// 99th percentile
    pub p99_ms: f64,
    /// Total samples recorded
    pub total_samples: u64,
    /// Mean latency
    pub mean_ms: f64,
    /// Maximum recorded latency
    pub max_ms: f64,
}

// ============================================================================
// Latency Histogram
// ============================================================================

/// Thread-safe latency histogram for recording delivery timings.
///
/// Tracks latencies from 1us to 60 seconds with 3 significant figures.
#[derive(Debug)]
pub struct LatencyHistogram {
    inner: RwLock<Histogram<u64>>,
}

impl LatencyHistogram {
    /// Create a new latency histogram.
    pub fn new() -> Self {
        let histogram =
            Histogram::new_with_bounds(1, 60_000_000, 3).expect("Failed to create histogram");
        Self {
            inner: RwLock::new(histogram),
        }
    }

    /// Record a latency value in microseconds.
    ///
    /// Values outside the histogram bounds are silently ignored.
    pub fn record(&self, latency_us: u64) {
        let mut hist = self.inner.write();
        let _ = hist.record(latency_us);
    }

    /// Record a latency duration.
    pub fn record_duration(&self, duration: std::time::Duration) {
        self.record(duration.as_micros() as u64);
    }

    /// Get complete latency metrics, converted to milliseconds.
    pub fn metrics(&self) -> LatencyMetrics {
        let hist = self.inner.read();
        LatencyMetrics {
            p50_ms: hist.value_at_percentile(50.0) as f64 / 1000.0,
            p95_ms: hist.value_at_percentile(95.0) as f64 / 1000.0,
            p99_ms: hist.value_at_percentile(99.0) as f64 / 1000.0,
            total_samples: hist.len(),
            mean_ms: hist.mean() / 1000.0,
            max_ms: hist.max() as f64 / 1000.0,
        }
    }
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Service Stats
// ============================================================================

/// Shared counters and delivery latency tracking.
///
/// All fields are lock-free or read-mostly; handlers and the outbox worker
/// update them concurrently.
#[derive(Debug, Default)]
pub struct ServiceStats {
    transactions_created: AtomicU64,
    transactions_completed: AtomicU64,
    disputes_opened: AtomicU64,
    disputes_decided: AtomicU64,
    invoices_generated: AtomicU64,
    webhooks_delivered: AtomicU64,
    webhooks_skipped: AtomicU64,
    webhooks_failed: AtomicU64,
    delivery_latency: LatencyHistogram,
}

impl ServiceStats {
    /// Create zeroed stats
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a created transaction
    #[inline]
    pub fn record_transaction_created(&self) {
        self.transactions_created.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a transaction reaching `completed`
    #[inline]
    pub fn record_transaction_completed(&self) {
        self.transactions_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a raised dispute
    #[inline]
    pub fn record_dispute_opened(&self) {
        self.disputes_opened.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a dispute status decision
    #[inline]
    pub fn record_dispute_decided(&self) {
        self.disputes_decided.fetch_add(1, Ordering::Relaxed);
    }

    /// Count an ensured invoice artifact
    #[inline]
    pub fn record_invoice(&self) {
        self.invoices_generated.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the wall time of one fan-out call
    #[inline]
    pub fn record_delivery_latency(&self, duration: std::time::Duration) {
        self.delivery_latency.record_duration(duration);
    }

    /// Count a per-target delivery outcome
    pub fn record_delivery_outcome(&self, outcome: &DeliveryOutcome) {
        let counter = match outcome.result {
            DeliveryResult::Delivered { .. } => &self.webhooks_delivered,
            DeliveryResult::SkippedUnsafe { .. } => &self.webhooks_skipped,
            DeliveryResult::Failed { .. } => &self.webhooks_failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot the counters
    pub fn counters(&self) -> CounterSnapshot {
        CounterSnapshot {
            transactions_created: self.transactions_created.load(Ordering::Relaxed),
            transactions_completed: self.transactions_completed.load(Ordering::Relaxed),
            disputes_opened: self.disputes_opened.load(Ordering::Relaxed),
            disputes_decided: self.disputes_decided.load(Ordering::Relaxed),
            invoices_generated: self.invoices_generated.load(Ordering::Relaxed),
            webhooks_delivered: self.webhooks_delivered.load(Ordering::Relaxed),
            webhooks_skipped: self.webhooks_skipped.load(Ordering::Relaxed),
            webhooks_failed: self.webhooks_failed.load(Ordering::Relaxed),
        }
    }

    /// Delivery latency percentiles
    pub fn delivery_latency_metrics(&self) -> LatencyMetrics {
        self.delivery_latency.metrics()
    }
}

// ============================================================================
// System Metrics Collection
// ============================================================================

/// Collect memory metrics for the current process using sysinfo.
fn collect_memory_metrics() -> MemoryMetrics {
    let pid = Pid::from_u32(std::process::id());
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);

    match system.process(pid) {
        Some(process) => MemoryMetrics {
            rss_bytes: process.memory(),
            virtual_bytes: process.virtual_memory(),
        },
        None => {
            debug!("Could not find current process in sysinfo");
            MemoryMetrics::default()
        }
    }
}

// ============================================================================
// HTTP Handlers
// ============================================================================

/// `GET /health` - liveness probe.
#[instrument(skip_all)]
pub async fn health_handler() -> impl IntoResponse {
    debug!("Health check requested");
    (StatusCode::OK, Json(HealthResponse::default()))
}

/// `GET /status` - detailed service status.
#[instrument(skip_all)]
pub async fn status_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let response = StatusResponse {
        version: crate::VERSION.to_string(),
        name: crate::NAME.to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        counters: state.stats.counters(),
        memory: collect_memory_metrics(),
        delivery_latency: state.stats.delivery_latency_metrics(),
        status: "running".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    };
    (StatusCode::OK, Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_latency_histogram_percentiles() {
        let histogram = LatencyHistogram::new();
        for i in 1..=100u64 {
            histogram.record(i * 1000); // 1ms .. 100ms
        }
        let metrics = histogram.metrics();
        assert_eq!(metrics.total_samples, 100);
        assert!(metrics.p50_ms >= 40.0 && metrics.p50_ms <= 60.0);
        assert!(metrics.p99_ms >= 90.0);
        assert!(metrics.max_ms >= metrics.p99_ms);
    }

    #[test]
    fn test_stats_counters() {
        let stats = ServiceStats::new();
        stats.record_transaction_created();
        stats.record_transaction_created();
        stats.record_transaction_completed();
        stats.record_invoice();

        let snapshot = stats.counters();
        assert_eq!(snapshot.transactions_created, 2);
        assert_eq!(snapshot.transactions_completed, 1);
        assert_eq!(snapshot.invoices_generated, 1);
        assert_eq!(snapshot.webhooks_delivered, 0);
    }

    #[test]
    fn test_stats_delivery_outcomes() {
        let stats = ServiceStats::new();
        let outcome = |result| DeliveryOutcome {
            subscription_id: Uuid::new_v4(),
            target_url: "https://example.com/hook".to_string(),
            result,
        };
        stats.record_delivery_outcome(&outcome(DeliveryResult::Delivered { code: 200 }));
        stats.record_delivery_outcome(&outcome(DeliveryResult::SkippedUnsafe {
            reason: "loopback".to_string(),
        }));
        stats.record_delivery_outcome(&outcome(DeliveryResult::Failed {
            reason: "timeout".to_string(),
        }));

        let snapshot = stats.counters();
        assert_eq!(snapshot.webhooks_delivered, 1);
        assert_eq!(snapshot.webhooks_skipped, 1);
        assert_eq!(snapshot.webhooks_failed, 1);
    }

    #[test]
    fn test_health_response_shape() {
        let json = serde_json::to_value(HealthResponse::default()).unwrap();
        assert_eq!(json["status"], "healthy");
    }
}
