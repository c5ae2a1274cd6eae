//! ACK/NACK observer deriving per-client synchronization state.
//!
//! Purely observational: the tracker implements [`Callbacks`], records what
//! it sees, and notifies subscribers; it never alters protocol behavior and
//! never returns an error to the protocol path.

use std::{
    collections::{hash_map::Entry, HashMap},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::{
    callbacks::Callbacks,
    config::TrackerConfig,
    metrics::XdsMetrics,
    notifier::{Notifier, StateEvent, SyncHandler},
    proto::{DiscoveryRequest, DiscoveryResponse},
};

/// Identity of one tracked subscription: which client, on which stream,
/// for which resource type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionId {
    pub node_id: String,
    pub stream_id: i64,
    pub type_url: String,
}

/// Synchronization state of one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// First request seen, no verdict yet.
    New,
    /// Client acknowledged the current server version.
    InSync,
    /// Client trails the current server version; may still converge.
    OutOfSync,
    /// Client saw the latest push and rejected it.
    OutOfSyncNack,
    /// Stream closed. Terminal: no transition leaves this state.
    Gone,
}

/// Last-known view of one subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientState {
    pub server_version: String,
    pub server_nonce: String,
    pub status: SyncState,
    pub last_modified: DateTime<Utc>,
}

impl Default for ClientState {
    fn default() -> Self {
        Self {
            server_version: String::new(),
            server_nonce: String::new(),
            status: SyncState::New,
            last_modified: Utc::now(),
        }
    }
}

#[derive(Default)]
struct TrackedState {
    state: ClientState,
    /// Armed while the subscription sits out-of-sync; the sweep escalates
    /// entries whose deadline passed without a fresh event.
    deadline: Option<Instant>,
}

/// Derives per-subscription convergence state from observed traffic.
///
/// One instance observes every stream of a server. The shared map sits
/// behind a single read-write lock; all operations on it are O(1) and the
/// lock is never held across a channel send.
pub struct SyncTracker {
    states: RwLock<HashMap<SubscriptionId, TrackedState>>,
    notifier: Notifier,
    config: TrackerConfig,
}

impl SyncTracker {
    /// Build the tracker and spawn its notifier consumer and escalation
    /// sweep. Must be called from within a tokio runtime. The handler is
    /// invoked on every effective state change.
    pub fn new<F>(config: TrackerConfig, metrics: Arc<XdsMetrics>, handler: F) -> Arc<Self>
    where
        F: Fn(&SubscriptionId, SyncState) + Send + 'static,
    {
        let notifier = Notifier::new(config.notify_capacity, metrics, Box::new(handler) as SyncHandler);
        let tracker = Arc::new(Self {
            states: RwLock::new(HashMap::new()),
            notifier,
            config,
        });
        tracker.spawn_sweep();
        tracker
    }

    /// Last-known state for a subscription; a fresh default if untracked.
    pub fn get(&self, id: &SubscriptionId) -> ClientState {
        self.states
            .read()
            .get(id)
            .map(|tracked| tracked.state.clone())
            .unwrap_or_default()
    }

    /// Derive the subscription's state from the client's last-seen version
    /// and nonce versus what the server last pushed.
    pub fn check_is_sync(&self, id: &SubscriptionId, client_version: &str, client_nonce: &str) {
        let transition = {
            let mut states = self.states.write();
            let tracked = states.entry(id.clone()).or_default();
            let next = if tracked.state.server_version.is_empty() {
                if client_version.is_empty() {
                    // First contact still in progress.
                    None
                } else {
                    // The client already holds state from a prior server
                    // incarnation; assume it converged.
                    Some(SyncState::InSync)
                }
            } else if client_version == tracked.state.server_version {
                Some(SyncState::InSync)
            } else if client_nonce == tracked.state.server_nonce {
                Some(SyncState::OutOfSyncNack)
            } else {
                Some(SyncState::OutOfSync)
            };

            if let Some(next) = next {
                tracked.state.status = next;
                tracked.state.last_modified = Utc::now();
                // Any fresh event clears an armed deadline; landing on
                // OutOfSync re-arms it.
                tracked.deadline = match next {
                    SyncState::OutOfSync => {
                        Some(Instant::now() + self.config.wait_time_for_sync())
                    }
                    _ => None,
                };
            }
            next
        };

        match transition {
            // Convergence may still be in progress; only the sweep
            // surfaces a confirmed out-of-sync.
            None | Some(SyncState::OutOfSync) => {}
            Some(state) => self.notifier.publish(StateEvent {
                id: id.clone(),
                state,
            }),
        }
    }

    fn spawn_sweep(self: &Arc<Self>) {
        let period = self.config.sweep_interval();
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let Some(tracker) = weak.upgrade() else { return };
                tracker.sweep(Instant::now());
            }
        });
    }

    /// Escalate subscriptions still out-of-sync past their armed deadline.
    fn sweep(&self, now: Instant) {
        let expired: Vec<SubscriptionId> = {
            let mut states = self.states.write();
            let mut expired = Vec::new();
            for (id, tracked) in states.iter_mut() {
                if tracked.state.status != SyncState::OutOfSync {
                    continue;
                }
                if tracked.deadline.is_some_and(|deadline| deadline <= now) {
                    tracked.deadline = None;
                    expired.push(id.clone());
                }
            }
            expired
        };

        for id in expired {
            warn!(
                node_id = %id.node_id,
                type_url = %id.type_url,
                "subscription still out of sync past deadline"
            );
            self.notifier.publish(StateEvent {
                id,
                state: SyncState::OutOfSync,
            });
        }
    }

    fn subscription_id(stream_id: i64, request: &DiscoveryRequest, type_url: &str) -> SubscriptionId {
        SubscriptionId {
            node_id: request
                .node
                .as_ref()
                .map(|node| node.id.clone())
                .unwrap_or_default(),
            stream_id,
            type_url: type_url.to_string(),
        }
    }
}

impl Callbacks for SyncTracker {
    fn on_stream_request(&self, stream_id: i64, request: &DiscoveryRequest) {
        let id = Self::subscription_id(stream_id, request, &request.type_url);
        let first_contact = {
            let mut states = self.states.write();
            match states.entry(id.clone()) {
                Entry::Vacant(entry) => {
                    entry.insert(TrackedState::default());
                    true
                }
                Entry::Occupied(_) => false,
            }
        };
        if first_contact {
            debug!(node_id = %id.node_id, type_url = %id.type_url, "new subscription");
            self.notifier.publish(StateEvent {
                id: id.clone(),
                state: SyncState::New,
            });
        }
        self.check_is_sync(&id, &request.version_info, &request.response_nonce);
    }

    fn on_stream_response(
        &self,
        stream_id: i64,
        request: &DiscoveryRequest,
        response: &DiscoveryResponse,
    ) {
        let id = Self::subscription_id(stream_id, request, &response.type_url);
        {
            let mut states = self.states.write();
            let tracked = states.entry(id.clone()).or_default();
            tracked.state.server_version = response.version_info.clone();
            tracked.state.server_nonce = response.nonce.clone();
        }
        // The client has not seen this push yet, so this normally lands on
        // OutOfSync and arms the escalation deadline; the next request
        // resolves it.
        self.check_is_sync(&id, &request.version_info, &request.response_nonce);
    }

    fn on_stream_closed(&self, stream_id: i64) {
        let removed: Vec<SubscriptionId> = {
            let mut states = self.states.write();
            let ids: Vec<SubscriptionId> = states
                .keys()
                .filter(|id| id.stream_id == stream_id)
                .cloned()
                .collect();
            for id in &ids {
                states.remove(id);
            }
            ids
        };

        for id in removed {
            self.notifier.publish(StateEvent {
                id,
                state: SyncState::Gone,
            });
        }
    }
}
