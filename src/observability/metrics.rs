//! Relay counters
//!
//! Atomic counters for record intake, publishing and connection churn. Runtime
//! failures (dropped publishes, overflowing payloads, skipped fields) surface
//! here and in the log, never as errors on the decode path.

use once_cell::sync::Lazy;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Global metrics collector instance
pub static METRICS: Lazy<RelayMetrics> = Lazy::new(RelayMetrics::default);

/// Get reference to global metrics collector
pub fn metrics() -> &'static RelayMetrics {
    &METRICS
}

#[derive(Debug, Default)]
pub struct RelayMetrics {
    records_received: AtomicU64,
    messages_published: AtomicU64,
    messages_dropped: AtomicU64,
    payload_overflows: AtomicU64,
    fields_skipped: AtomicU64,
    connections_established: AtomicU64,
    reconnect_attempts: AtomicU64,
    mqtt_connected: AtomicBool,
}

/// Point-in-time copy of all counters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub records_received: u64,
    pub messages_published: u64,
    pub messages_dropped: u64,
    pub payload_overflows: u64,
    pub fields_skipped: u64,
    pub connections_established: u64,
    pub reconnect_attempts: u64,
    pub mqtt_connected: bool,
}

impl RelayMetrics {
    pub fn record_received(&self) {
        self.records_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_published(&self) {
        self.messages_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self, count: u64) {
        self.messages_dropped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_payload_overflow(&self) {
        self.payload_overflows.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_field_skipped(&self) {
        self.fields_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connected(&self) {
        self.connections_established.fetch_add(1, Ordering::Relaxed);
        self.mqtt_connected.store(true, Ordering::Relaxed);
    }

    pub fn record_disconnected(&self) {
        self.mqtt_connected.store(false, Ordering::Relaxed);
    }

    pub fn record_reconnect_attempt(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            records_received: self.records_received.load(Ordering::Relaxed),
            messages_published: self.messages_published.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            payload_overflows: self.payload_overflows.load(Ordering::Relaxed),
            fields_skipped: self.fields_skipped.load(Ordering::Relaxed),
            connections_established: self.connections_established.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            mqtt_connected: self.mqtt_connected.load(Ordering::Relaxed),
        }
    }
}
