//! Thread-safe metrics collection system
//!
//! Provides atomic counters and a mutex-protected latency window for tracking
//! connection churn, publish outcomes and request settlement.

use once_cell::sync::Lazy;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Latency samples kept for percentile calculation
const MAX_LATENCY_SAMPLES: usize = 1000;

/// Global metrics collector instance
pub static METRICS: Lazy<MetricsCollector> = Lazy::new(MetricsCollector::new);

/// Get reference to global metrics collector
pub fn metrics() -> &'static MetricsCollector {
    &METRICS
}

/// Thread-safe metrics collector using atomics and mutexes
pub struct MetricsCollector {
    // Connection metrics
    connected: AtomicBool,
    current_generation: AtomicU64,
    connection_attempts: AtomicU64,
    connections_established: AtomicU64,
    connection_failures: AtomicU64,
    connections_lost: AtomicU64,
    connection_start_time: AtomicU64,

    // Publish metrics
    publishes_succeeded: AtomicU64,
    publishes_rejected: AtomicU64,

    // Request metrics
    requests_issued: AtomicU64,
    requests_resolved: AtomicU64,
    requests_timed_out: AtomicU64,
    requests_faulted: AtomicU64,
    late_responses: AtomicU64,
    request_latencies: Mutex<Vec<u64>>, // in milliseconds

    uptime_start: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            current_generation: AtomicU64::new(0),
            connection_attempts: AtomicU64::new(0),
            connections_established: AtomicU64::new(0),
            connection_failures: AtomicU64::new(0),
            connections_lost: AtomicU64::new(0),
            connection_start_time: AtomicU64::new(0),
            publishes_succeeded: AtomicU64::new(0),
            publishes_rejected: AtomicU64::new(0),
            requests_issued: AtomicU64::new(0),
            requests_resolved: AtomicU64::new(0),
            requests_timed_out: AtomicU64::new(0),
            requests_faulted: AtomicU64::new(0),
            late_responses: AtomicU64::new(0),
            request_latencies: Mutex::new(Vec::new()),
            uptime_start: AtomicU64::new(current_timestamp()),
        }
    }

    // Connection metrics
    pub fn record_connection_attempt(&self) {
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection_established(&self, generation: u64) {
        self.connections_established.fetch_add(1, Ordering::Relaxed);
        self.connected.store(true, Ordering::Relaxed);
        self.current_generation.store(generation, Ordering::Relaxed);
        self.connection_start_time
            .store(current_timestamp(), Ordering::Relaxed);
    }

    pub fn record_connection_failure(&self) {
        self.connection_failures.fetch_add(1, Ordering::Relaxed);
        self.connected.store(false, Ordering::Relaxed);
        self.connection_start_time.store(0, Ordering::Relaxed);
    }

    pub fn record_connection_lost(&self) {
        self.connections_lost.fetch_add(1, Ordering::Relaxed);
        self.connected.store(false, Ordering::Relaxed);
        self.connection_start_time.store(0, Ordering::Relaxed);
    }

    // Publish metrics
    pub fn record_publish_succeeded(&self) {
        self.publishes_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_publish_rejected(&self) {
        self.publishes_rejected.fetch_add(1, Ordering::Relaxed);
    }

    // Request metrics
    pub fn record_request_issued(&self) {
        self.requests_issued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_request_resolved(&self, latency: Duration) {
        self.requests_resolved.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut latencies) = self.request_latencies.lock() {
            latencies.push(latency.as_millis() as u64);
            if latencies.len() > MAX_LATENCY_SAMPLES {
                latencies.remove(0);
            }
        }
    }

    pub fn record_request_timed_out(&self) {
        self.requests_timed_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_request_faulted(&self) {
        self.requests_faulted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_late_response(&self) {
        self.late_responses.fetch_add(1, Ordering::Relaxed);
    }

    // Reset all metrics (useful for testing)
    pub fn reset(&self) {
        let now = current_timestamp();
        self.connected.store(false, Ordering::Relaxed);
        self.current_generation.store(0, Ordering::Relaxed);
        self.connection_attempts.store(0, Ordering::Relaxed);
        self.connections_established.store(0, Ordering::Relaxed);
        self.connection_failures.store(0, Ordering::Relaxed);
        self.connections_lost.store(0, Ordering::Relaxed);
        self.connection_start_time.store(0, Ordering::Relaxed);
        self.publishes_succeeded.store(0, Ordering::Relaxed);
        self.publishes_rejected.store(0, Ordering::Relaxed);
        self.requests_issued.store(0, Ordering::Relaxed);
        self.requests_resolved.store(0, Ordering::Relaxed);
        self.requests_timed_out.store(0, Ordering::Relaxed);
        self.requests_faulted.store(0, Ordering::Relaxed);
        self.late_responses.store(0, Ordering::Relaxed);
        self.uptime_start.store(now, Ordering::Relaxed);
        if let Ok(mut latencies) = self.request_latencies.lock() {
            latencies.clear();
        }
    }

    /// Average, p50, p95, p99 of recent request latencies
    fn calculate_latency_statistics(&self) -> (f64, f64, f64, f64) {
        let Ok(latencies) = self.request_latencies.lock() else {
            return (0.0, 0.0, 0.0, 0.0);
        };
        if latencies.is_empty() {
            return (0.0, 0.0, 0.0, 0.0);
        }
        let mut sorted = latencies.clone();
        drop(latencies);
        sorted.sort_unstable();

        let avg = sorted.iter().sum::<u64>() as f64 / sorted.len() as f64;
        (
            avg,
            percentile(&sorted, 50.0),
            percentile(&sorted, 95.0),
            percentile(&sorted, 99.0),
        )
    }

    fn calculate_connection_duration(&self, now: u64) -> u64 {
        if !self.connected.load(Ordering::Relaxed) {
            return 0;
        }
        match self.connection_start_time.load(Ordering::Relaxed) {
            0 => 0,
            start_time => now.saturating_sub(start_time),
        }
    }

    /// Get complete metrics snapshot
    pub fn get_metrics(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        let (avg_latency_ms, p50, p95, p99) = self.calculate_latency_statistics();

        MetricsSnapshot {
            connection: ConnectionMetrics {
                connected: self.connected.load(Ordering::Relaxed),
                current_generation: self.current_generation.load(Ordering::Relaxed),
                connection_attempts: self.connection_attempts.load(Ordering::Relaxed),
                connections_established: self.connections_established.load(Ordering::Relaxed),
                connection_failures: self.connection_failures.load(Ordering::Relaxed),
                connections_lost: self.connections_lost.load(Ordering::Relaxed),
                connection_duration_seconds: self.calculate_connection_duration(now),
            },
            publish: PublishMetrics {
                publishes_succeeded: self.publishes_succeeded.load(Ordering::Relaxed),
                publishes_rejected: self.publishes_rejected.load(Ordering::Relaxed),
            },
            requests: RequestMetrics {
                requests_issued: self.requests_issued.load(Ordering::Relaxed),
                requests_resolved: self.requests_resolved.load(Ordering::Relaxed),
                requests_timed_out: self.requests_timed_out.load(Ordering::Relaxed),
                requests_faulted: self.requests_faulted.load(Ordering::Relaxed),
                late_responses: self.late_responses.load(Ordering::Relaxed),
                avg_latency_ms,
                latency_p50_ms: p50,
                latency_p95_ms: p95,
                latency_p99_ms: p99,
            },
            uptime_seconds: now.saturating_sub(self.uptime_start.load(Ordering::Relaxed)),
            timestamp: now,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

// Public metrics structures
#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub connection: ConnectionMetrics,
    pub publish: PublishMetrics,
    pub requests: RequestMetrics,
    pub uptime_seconds: u64,
    pub timestamp: u64,
}

#[derive(Debug, Serialize)]
pub struct ConnectionMetrics {
    pub connected: bool,
    pub current_generation: u64,
    pub connection_attempts: u64,
    pub connections_established: u64,
    pub connection_failures: u64,
    pub connections_lost: u64,
    pub connection_duration_seconds: u64,
}

#[derive(Debug, Serialize)]
pub struct PublishMetrics {
    pub publishes_succeeded: u64,
    pub publishes_rejected: u64,
}

#[derive(Debug, Serialize)]
pub struct RequestMetrics {
    pub requests_issued: u64,
    pub requests_resolved: u64,
    pub requests_timed_out: u64,
    pub requests_faulted: u64,
    pub late_responses: u64,
    pub avg_latency_ms: f64,
    pub latency_p50_ms: f64,
    pub latency_p95_ms: f64,
    pub latency_p99_ms: f64,
}

// Helper functions
fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn percentile(sorted_data: &[u64], percentile: f64) -> f64 {
    if sorted_data.is_empty() {
        return 0.0;
    }

    let len = sorted_data.len();
    let index = (percentile / 100.0) * (len - 1) as f64;

    if index.fract() == 0.0 {
        sorted_data[index as usize] as f64
    } else {
        let lower_value = sorted_data[index.floor() as usize] as f64;
        let upper_value = sorted_data[index.ceil() as usize] as f64;
        lower_value + (upper_value - lower_value) * index.fract()
    }
}
