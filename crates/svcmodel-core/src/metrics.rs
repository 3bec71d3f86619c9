//! Per-channel call metrics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A serializable snapshot of a channel's call counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelMetricsSnapshot {
    /// Request/reply calls issued
    pub requests: u64,
    /// One-way sends issued
    pub one_way_sends: u64,
    /// Successful replies
    pub replies: u64,
    /// Replies that were faults
    pub faults: u64,
    /// Calls that timed out
    pub timeouts: u64,
    /// Callback invocations dispatched (duplex only)
    pub callbacks: u64,
    /// The average round-trip latency, in milliseconds.
    pub average_latency_ms: f64,
}

/// A lock-free counter set updated on every call.
#[derive(Debug, Default)]
pub struct ChannelMetrics {
    requests: AtomicU64,
    one_way_sends: AtomicU64,
    replies: AtomicU64,
    faults: AtomicU64,
    timeouts: AtomicU64,
    callbacks: AtomicU64,
    /// Exponential moving average in microseconds.
    avg_latency_us: AtomicU64,
}

impl ChannelMetrics {
    /// Record an outgoing request
    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a one-way send
    pub fn record_one_way(&self) {
        self.one_way_sends.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful reply and its latency
    pub fn record_reply(&self, latency: Duration) {
        self.replies.fetch_add(1, Ordering::Relaxed);
        self.update_latency(latency);
    }

    /// Record a fault reply
    pub fn record_fault(&self) {
        self.faults.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a timeout
    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a dispatched callback
    pub fn record_callback(&self) {
        self.callbacks.fetch_add(1, Ordering::Relaxed);
    }

    /// Updates the average latency using an exponential moving average (EMA).
    ///
    /// EMA = (new_value * alpha) + (old_value * (1 - alpha)), alpha = 0.1.
    fn update_latency(&self, latency: Duration) {
        let sample = latency.as_micros() as u64;
        let _ = self
            .avg_latency_us
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                Some(if current == 0 {
                    sample
                } else {
                    (sample + current * 9) / 10
                })
            });
    }

    /// Take a snapshot
    pub fn snapshot(&self) -> ChannelMetricsSnapshot {
        ChannelMetricsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            one_way_sends: self.one_way_sends.load(Ordering::Relaxed),
            replies: self.replies.load(Ordering::Relaxed),
            faults: self.faults.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            callbacks: self.callbacks.load(Ordering::Relaxed),
            average_latency_ms: self.avg_latency_us.load(Ordering::Relaxed) as f64 / 1000.0,
        }
    }
}
