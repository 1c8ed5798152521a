//! Thread-safe metrics collection
//!
//! Atomic counters for the control channel: exchanges, connections, cache
//! invalidations, commands and status changes. Exchange durations are kept in
//! a bounded window for percentile statistics.

use crate::agent::status::{last_status, OnlineStatus};
use chrono::{DateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

const MAX_EXCHANGE_SAMPLES: usize = 1000;

/// Global metrics collector instance
pub static METRICS: Lazy<ConnectMetrics> = Lazy::new(ConnectMetrics::new);

/// Get reference to global metrics collector
pub fn metrics() -> &'static ConnectMetrics {
    &METRICS
}

/// Counters updated by the loop, readable from anywhere
pub struct ConnectMetrics {
    exchanges_attempted: AtomicU64,
    exchanges_succeeded: AtomicU64,
    exchanges_failed: AtomicU64,
    connections_established: AtomicU64,
    connection_failures: AtomicU64,
    cache_invalidations: AtomicU64,
    commands_received: AtomicU64,
    status_changes: AtomicU64,
    // Milliseconds since the epoch, 0 when unset
    last_exchange: AtomicI64,
    started: AtomicI64,
    exchange_times: Mutex<VecDeque<u64>>,
}

impl ConnectMetrics {
    pub fn new() -> Self {
        Self {
            exchanges_attempted: AtomicU64::new(0),
            exchanges_succeeded: AtomicU64::new(0),
            exchanges_failed: AtomicU64::new(0),
            connections_established: AtomicU64::new(0),
            connection_failures: AtomicU64::new(0),
            cache_invalidations: AtomicU64::new(0),
            commands_received: AtomicU64::new(0),
            status_changes: AtomicU64::new(0),
            last_exchange: AtomicI64::new(0),
            started: AtomicI64::new(Utc::now().timestamp_millis()),
            exchange_times: Mutex::new(VecDeque::with_capacity(MAX_EXCHANGE_SAMPLES)),
        }
    }

    pub fn record_exchange_attempt(&self) {
        self.exchanges_attempted.fetch_add(1, Ordering::Relaxed);
    }

    /// An exchange ended with an `Ok` status
    pub fn record_exchange_success(&self, duration: Duration) {
        self.exchanges_succeeded.fetch_add(1, Ordering::Relaxed);
        self.finish_exchange(duration);
    }

    /// An exchange ended with any other status
    pub fn record_exchange_failure(&self, duration: Duration) {
        self.exchanges_failed.fetch_add(1, Ordering::Relaxed);
        self.finish_exchange(duration);
    }

    fn finish_exchange(&self, duration: Duration) {
        self.last_exchange
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
        if let Ok(mut times) = self.exchange_times.lock() {
            if times.len() == MAX_EXCHANGE_SAMPLES {
                times.pop_front();
            }
            times.push_back(duration.as_millis() as u64);
        }
    }

    pub fn record_connection(&self, established: bool) {
        if established {
            self.connections_established.fetch_add(1, Ordering::Relaxed);
        } else {
            self.connection_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_invalidation(&self) {
        self.cache_invalidations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_command(&self) {
        self.commands_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_status_change(&self) {
        self.status_changes.fetch_add(1, Ordering::Relaxed);
    }

    fn exchange_time_statistics(&self) -> (f64, f64, f64) {
        let Ok(times) = self.exchange_times.lock() else {
            return (0.0, 0.0, 0.0);
        };
        if times.is_empty() {
            return (0.0, 0.0, 0.0);
        }
        let mut sorted: Vec<u64> = times.iter().copied().collect();
        sorted.sort_unstable();
        let avg = sorted.iter().sum::<u64>() as f64 / sorted.len() as f64;
        (avg, percentile(&sorted, 50.0), percentile(&sorted, 95.0))
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let now = Utc::now();
        let started = self.started.load(Ordering::Relaxed);
        let (avg, p50, p95) = self.exchange_time_statistics();

        MetricsSnapshot {
            exchanges: ExchangeMetrics {
                attempted: self.exchanges_attempted.load(Ordering::Relaxed),
                succeeded: self.exchanges_succeeded.load(Ordering::Relaxed),
                failed: self.exchanges_failed.load(Ordering::Relaxed),
                avg_duration_ms: avg,
                duration_p50_ms: p50,
                duration_p95_ms: p95,
                last_exchange: millis_to_time(self.last_exchange.load(Ordering::Relaxed)),
            },
            connections: ConnectionMetrics {
                established: self.connections_established.load(Ordering::Relaxed),
                failures: self.connection_failures.load(Ordering::Relaxed),
                invalidations: self.cache_invalidations.load(Ordering::Relaxed),
            },
            commands_received: self.commands_received.load(Ordering::Relaxed),
            status_changes: self.status_changes.load(Ordering::Relaxed),
            status: last_status(),
            uptime_seconds: ((now.timestamp_millis() - started).max(0) / 1000) as u64,
            timestamp: now,
        }
    }

    /// Zero all counters (useful for testing)
    pub fn reset(&self) {
        for counter in [
            &self.exchanges_attempted,
            &self.exchanges_succeeded,
            &self.exchanges_failed,
            &self.connections_established,
            &self.connection_failures,
            &self.cache_invalidations,
            &self.commands_received,
            &self.status_changes,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.last_exchange.store(0, Ordering::Relaxed);
        if let Ok(mut times) = self.exchange_times.lock() {
            times.clear();
        }
    }
}

impl Default for ConnectMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub exchanges: ExchangeMetrics,
    pub connections: ConnectionMetrics,
    pub commands_received: u64,
    pub status_changes: u64,
    pub status: OnlineStatus,
    pub uptime_seconds: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ExchangeMetrics {
    pub attempted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub avg_duration_ms: f64,
    pub duration_p50_ms: f64,
    pub duration_p95_ms: f64,
    pub last_exchange: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct ConnectionMetrics {
    pub established: u64,
    pub failures: u64,
    pub invalidations: u64,
}

fn millis_to_time(millis: i64) -> Option<DateTime<Utc>> {
    if millis == 0 {
        return None;
    }
    Utc.timestamp_millis_opt(millis).single()
}

fn percentile(sorted_data: &[u64], percentile: f64) -> f64 {
    if sorted_data.is_empty() {
        return 0.0;
    }

    let index = (percentile / 100.0) * (sorted_data.len() - 1) as f64;
    let lower = sorted_data[index.floor() as usize] as f64;
    let upper = sorted_data[index.ceil() as usize] as f64;
    lower + (upper - lower) * index.fract()
}
