//! Bounded state-change delivery, decoupled from the request path.
//!
//! Producers never block: a full channel drops the event and logs. A single
//! consumer task deduplicates per-subscription states so subscribers see
//! level changes, not raw event traffic.

use std::{collections::HashMap, sync::Arc};

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::warn;

use crate::{
    metrics::XdsMetrics,
    tracker::{SubscriptionId, SyncState},
};

/// A state-change event for one subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateEvent {
    pub id: SubscriptionId,
    pub state: SyncState,
}

/// Handler invoked by the consumer on every effective state change.
pub type SyncHandler = Box<dyn Fn(&SubscriptionId, SyncState) + Send>;

pub(crate) struct Notifier {
    events: mpsc::Sender<StateEvent>,
    metrics: Arc<XdsMetrics>,
}

impl Notifier {
    /// Spawn the consumer task and hand back the producer side. Must be
    /// called from within a tokio runtime.
    pub fn new(capacity: usize, metrics: Arc<XdsMetrics>, handler: SyncHandler) -> Self {
        let (events, receiver) = mpsc::channel(capacity);
        tokio::spawn(consume(receiver, handler));
        Self { events, metrics }
    }

    /// Enqueue without blocking; a full channel drops the event.
    pub fn publish(&self, event: StateEvent) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                self.metrics.record_notification_dropped();
                warn!(
                    node_id = %event.id.node_id,
                    type_url = %event.id.type_url,
                    "notification channel full, dropping {:?} event",
                    event.state
                );
            }
            // Consumer is gone; the process is shutting down.
            Err(TrySendError::Closed(_)) => {}
        }
    }
}

async fn consume(mut events: mpsc::Receiver<StateEvent>, handler: SyncHandler) {
    let mut last_notified: HashMap<SubscriptionId, SyncState> = HashMap::new();
    while let Some(event) = events.recv().await {
        if last_notified.get(&event.id) == Some(&event.state) {
            continue;
        }
        handler(&event.id, event.state);
        if event.state == SyncState::Gone {
            last_notified.remove(&event.id);
        } else {
            last_notified.insert(event.id, event.state);
        }
    }
}
