//! Global atomic counters for recovery observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    flows_started: AtomicU64,
    flows_recovered: AtomicU64,
    flows_failed: AtomicU64,
    flows_aborted: AtomicU64,
    events_published: AtomicU64,
    breaker_trips: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            flows_started: AtomicU64::new(0),
            flows_recovered: AtomicU64::new(0),
            flows_failed: AtomicU64::new(0),
            flows_aborted: AtomicU64::new(0),
            events_published: AtomicU64::new(0),
            breaker_trips: AtomicU64::new(0),
        }
    }

    pub fn inc_flows_started(&self) {
        self.flows_started.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "flows_started", "counter incremented");
    }

    pub fn inc_flows_recovered(&self) {
        self.flows_recovered.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "flows_recovered", "counter incremented");
    }

    pub fn inc_flows_failed(&self) {
        self.flows_failed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "flows_failed", "counter incremented");
    }

    pub fn inc_flows_aborted(&self) {
        self.flows_aborted.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "flows_aborted", "counter incremented");
    }

    pub fn inc_events_published(&self) {
        self.events_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_breaker_trips(&self) {
        self.breaker_trips.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "breaker_trips", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            flows_started = self.flows_started(),
            flows_recovered = self.flows_recovered(),
            flows_failed = self.flows_failed(),
            flows_aborted = self.flows_aborted(),
            events_published = self.events_published(),
            breaker_trips = self.breaker_trips(),
        );
    }

    pub fn flows_started(&self) -> u64 {
        self.flows_started.load(Ordering::Relaxed)
    }

    pub fn flows_recovered(&self) -> u64 {
        self.flows_recovered.load(Ordering::Relaxed)
    }

    pub fn flows_failed(&self) -> u64 {
        self.flows_failed.load(Ordering::Relaxed)
    }

    pub fn flows_aborted(&self) -> u64 {
        self.flows_aborted.load(Ordering::Relaxed)
    }

    pub fn events_published(&self) -> u64 {
        self.events_published.load(Ordering::Relaxed)
    }

    pub fn breaker_trips(&self) -> u64 {
        self.breaker_trips.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.flows_started.store(0, Ordering::Relaxed);
        self.flows_recovered.store(0, Ordering::Relaxed);
        self.flows_failed.store(0, Ordering::Relaxed);
        self.flows_aborted.store(0, Ordering::Relaxed);
        self.events_published.store(0, Ordering::Relaxed);
        self.breaker_trips.store(0, Ordering::Relaxed);
    }
}
