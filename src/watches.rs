//! Per-stream watch bookkeeping.
//!
//! Owned exclusively by the session event loop; no locking. At most one
//! live watch exists per type URL per stream, and the last-sent nonce for a
//! type outlives watch replacement so late acknowledgements still resolve
//! against the response that actually went out.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use crate::cache::CancelFn;

/// One live cache subscription.
pub(crate) struct ActiveWatch {
    /// Shared with the forwarding task so it can tell cancellation apart
    /// from a cache-side failure when the backing channel closes.
    canceled: Arc<AtomicBool>,
    cancel: Option<CancelFn>,
}

impl ActiveWatch {
    pub fn new(cancel: CancelFn, canceled: Arc<AtomicBool>) -> Self {
        Self {
            canceled,
            cancel: Some(cancel),
        }
    }

    /// Invoke the cancel fn exactly once; later calls are no-ops.
    pub fn cancel(&mut self) {
        if self
            .canceled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            if let Some(cancel) = self.cancel.take() {
                cancel();
            }
        }
    }
}

#[derive(Default)]
struct TypeEntry {
    watch: Option<ActiveWatch>,
    /// Nonce of the last response sent for this type, empty until the
    /// first send.
    nonce: String,
}

/// All watch state for one stream, keyed by type URL.
#[derive(Default)]
pub(crate) struct WatchSet {
    entries: HashMap<String, TypeEntry>,
}

impl WatchSet {
    /// Whether a request carrying `response_nonce` may open a new watch for
    /// `type_url`: either nothing was sent yet for the type, or the request
    /// references the most recently sent response. Anything else is a
    /// duplicate or crossed-in-flight request.
    pub fn accepts_nonce(&self, type_url: &str, response_nonce: &str) -> bool {
        match self.entries.get(type_url) {
            Some(entry) => entry.nonce.is_empty() || entry.nonce == response_nonce,
            None => true,
        }
    }

    /// Cancel the current watch for `type_url`, if any.
    pub fn cancel(&mut self, type_url: &str) {
        if let Some(entry) = self.entries.get_mut(type_url) {
            if let Some(mut watch) = entry.watch.take() {
                watch.cancel();
            }
        }
    }

    /// Install the replacement watch for `type_url`. Callers cancel the
    /// prior watch first.
    pub fn install(&mut self, type_url: &str, watch: ActiveWatch) {
        let entry = self.entries.entry(type_url.to_string()).or_default();
        entry.watch = Some(watch);
    }

    /// Record the nonce of a response just sent for `type_url`.
    pub fn record_nonce(&mut self, type_url: &str, nonce: String) {
        if let Some(entry) = self.entries.get_mut(type_url) {
            entry.nonce = nonce;
        }
    }

    /// Cancel every remaining watch. Invoked once as the stream winds down.
    pub fn cancel_all(&mut self) {
        for entry in self.entries.values_mut() {
            if let Some(mut watch) = entry.watch.take() {
                watch.cancel();
            }
        }
    }
}
