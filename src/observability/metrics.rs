//! Minimal counters and gauges for diagnostics.
//!
//! Used internally for things like per-connection transmit queue depth
//! (current/peak) and dropped-message counts; surfaced through `tracing`
//! events rather than a pull-based registry, since the core has no
//! metrics-exporter Non-goal to satisfy.

use core::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// A monotonically increasing counter.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn increment(&self, amount: u64) {
        self.0.fetch_add(amount, Ordering::Relaxed);
    }

    pub fn inc(&self) {
        self.increment(1);
    }

    #[must_use]
    pub fn value(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

impl fmt::Display for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}

/// A gauge tracking an instantaneous value, with a running peak.
///
/// Backs `Connection::queue_metrics()`'s current/peak transmit-queue
/// depth snapshot.
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicI64,
    peak: AtomicI64,
}

impl Gauge {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            value: AtomicI64::new(0),
            peak: AtomicI64::new(0),
        }
    }

    pub fn set(&self, value: i64) {
        self.value.store(value, Ordering::Relaxed);
        self.peak.fetch_max(value, Ordering::Relaxed);
    }

    pub fn increment(&self, amount: i64) {
        let new = self.value.fetch_add(amount, Ordering::Relaxed) + amount;
        self.peak.fetch_max(new, Ordering::Relaxed);
    }

    pub fn decrement(&self, amount: i64) {
        self.value.fetch_sub(amount, Ordering::Relaxed);
    }

    #[must_use]
    pub fn value(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn peak(&self) -> i64 {
        self.peak.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_accumulates() {
        let c = Counter::new();
        c.inc();
        c.increment(5);
        assert_eq!(c.value(), 6);
    }

    #[test]
    fn gauge_tracks_peak() {
        let g = Gauge::new();
        g.set(10);
        g.increment(5);
        g.decrement(12);
        assert_eq!(g.value(), 3);
        assert_eq!(g.peak(), 15);
    }
}
