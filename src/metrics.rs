//! Discovery server metrics.
//!
//! Constructed by the embedding application and injected into the server
//! and tracker; no process-wide registries.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for discovery server operations.
#[derive(Debug, Default)]
pub struct XdsMetrics {
    // Stream metrics
    streams_opened: AtomicU64,
    streams_closed: AtomicU64,
    active_streams: AtomicU64,

    // Protocol metrics
    requests_received: AtomicU64,
    responses_sent: AtomicU64,
    watches_created: AtomicU64,
    stale_nonces: AtomicU64,
    watch_failures: AtomicU64,

    // Fetch metrics
    fetches: AtomicU64,
    fetch_failures: AtomicU64,

    // Tracker metrics
    notifications_dropped: AtomicU64,
}

impl XdsMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_stream_open(&self) {
        self.streams_opened.fetch_add(1, Ordering::Relaxed);
        self.active_streams.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_stream_closed(&self) {
        self.streams_closed.fetch_add(1, Ordering::Relaxed);
        self.active_streams.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn record_request(&self) {
        self.requests_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_response(&self) {
        self.responses_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_watch_created(&self) {
        self.watches_created.fetch_add(1, Ordering::Relaxed);
    }

    /// A request referenced a nonce other than the last one sent for its
    /// type; it was ignored.
    pub(crate) fn record_stale_nonce(&self) {
        self.stale_nonces.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_watch_failure(&self) {
        self.watch_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fetch(&self, success: bool) {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.fetch_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_notification_dropped(&self) {
        self.notifications_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            streams_opened: self.streams_opened.load(Ordering::Relaxed),
            streams_closed: self.streams_closed.load(Ordering::Relaxed),
            active_streams: self.active_streams.load(Ordering::Relaxed),
            requests_received: self.requests_received.load(Ordering::Relaxed),
            responses_sent: self.responses_sent.load(Ordering::Relaxed),
            watches_created: self.watches_created.load(Ordering::Relaxed),
            stale_nonces: self.stale_nonces.load(Ordering::Relaxed),
            watch_failures: self.watch_failures.load(Ordering::Relaxed),
            fetches: self.fetches.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            notifications_dropped: self.notifications_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of [`XdsMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub streams_opened: u64,
    pub streams_closed: u64,
    pub active_streams: u64,
    pub requests_received: u64,
    pub responses_sent: u64,
    pub watches_created: u64,
    pub stale_nonces: u64,
    pub watch_failures: u64,
    pub fetches: u64,
    pub fetch_failures: u64,
    pub notifications_dropped: u64,
}
