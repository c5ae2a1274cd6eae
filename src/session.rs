//! Per-stream protocol state machine.
//!
//! One task owns each physical stream: a reader task feeds decoded requests
//! into the event loop, every active watch forwards cache emissions into a
//! shared event channel tagged with its type URL, and the loop is the sole
//! writer of session state. Responses for different types never block one
//! another; within one type, nonces are strictly increasing.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tokio::sync::mpsc;
use tonic::{Status, Streaming};
use tracing::{debug, warn};

use crate::{
    cache::{Cache, WatchResponse},
    callbacks::Callbacks,
    error::XdsError,
    metrics::XdsMetrics,
    proto::{DiscoveryRequest, DiscoveryResponse, TypedResource},
    resource::ANY_TYPE,
    watches::{ActiveWatch, WatchSet},
};

/// Capacity of the channel between the reader task and the event loop.
const REQUEST_CHANNEL_CAPACITY: usize = 16;
/// Capacity of the shared watch event channel feeding the event loop.
const WATCH_CHANNEL_CAPACITY: usize = 16;

/// A cache emission tagged with its originating type URL. `None` means the
/// backing channel closed without cancellation: an internal cache failure.
struct WatchEvent {
    type_url: String,
    response: Option<WatchResponse>,
}

pub(crate) struct StreamSession<C> {
    cache: Arc<C>,
    callbacks: Arc<dyn Callbacks>,
    metrics: Arc<XdsMetrics>,
    stream_id: i64,
    default_type_url: String,
    /// Strictly increasing per-stream nonce; only the session task mutates
    /// it, so a plain counter suffices.
    nonce: u64,
    watches: WatchSet,
}

impl<C: Cache> StreamSession<C> {
    pub fn new(
        cache: Arc<C>,
        callbacks: Arc<dyn Callbacks>,
        metrics: Arc<XdsMetrics>,
        stream_id: i64,
        default_type_url: String,
    ) -> Self {
        Self {
            cache,
            callbacks,
            metrics,
            stream_id,
            default_type_url,
            nonce: 0,
            watches: WatchSet::default(),
        }
    }

    /// Drive the stream to completion. An `Err` is the terminal status to
    /// surface to the client; clean shutdown returns `Ok`.
    pub async fn run(
        mut self,
        requests: Streaming<DiscoveryRequest>,
        responses: mpsc::Sender<Result<DiscoveryResponse, Status>>,
    ) -> Result<(), Status> {
        self.callbacks
            .on_stream_open(self.stream_id, &self.default_type_url);
        self.metrics.record_stream_open();
        debug!(
            stream_id = self.stream_id,
            type_url = %self.default_type_url,
            "discovery stream opened"
        );

        let (request_tx, request_rx) = mpsc::channel(REQUEST_CHANNEL_CAPACITY);
        let reader = tokio::spawn(read_requests(requests, request_tx));
        let (watch_tx, watch_rx) = mpsc::channel(WATCH_CHANNEL_CAPACITY);

        let result = self
            .event_loop(request_rx, watch_rx, watch_tx, &responses)
            .await;

        self.watches.cancel_all();
        self.callbacks.on_stream_closed(self.stream_id);
        self.metrics.record_stream_closed();
        reader.abort();
        debug!(stream_id = self.stream_id, "discovery stream closed");

        result
    }

    async fn event_loop(
        &mut self,
        mut requests: mpsc::Receiver<DiscoveryRequest>,
        mut events: mpsc::Receiver<WatchEvent>,
        watch_tx: mpsc::Sender<WatchEvent>,
        responses: &mpsc::Sender<Result<DiscoveryResponse, Status>>,
    ) -> Result<(), Status> {
        loop {
            tokio::select! {
                maybe_request = requests.recv() => match maybe_request {
                    // Reader hit EOF or a receive error; the client is done.
                    None => return Ok(()),
                    Some(request) => self.handle_request(request, &watch_tx)?,
                },
                Some(event) = events.recv() => {
                    self.handle_watch_event(event, responses).await?;
                }
                // The client tore down the response stream; wind down
                // through the same cleanup path.
                _ = responses.closed() => return Ok(()),
            }
        }
    }

    fn handle_request(
        &mut self,
        mut request: DiscoveryRequest,
        watch_tx: &mpsc::Sender<WatchEvent>,
    ) -> Result<(), Status> {
        self.metrics.record_request();

        if request.type_url.is_empty() {
            if self.default_type_url == ANY_TYPE {
                return Err(XdsError::MissingTypeUrl.into());
            }
            request.type_url = self.default_type_url.clone();
        }

        self.callbacks.on_stream_request(self.stream_id, &request);

        if !self
            .watches
            .accepts_nonce(&request.type_url, &request.response_nonce)
        {
            // Duplicate or crossed-in-flight request referencing an older
            // response; nothing to do.
            self.metrics.record_stale_nonce();
            debug!(
                stream_id = self.stream_id,
                type_url = %request.type_url,
                nonce = %request.response_nonce,
                "stale nonce, ignoring request"
            );
            return Ok(());
        }

        // Drop the prior watch before opening its replacement.
        self.watches.cancel(&request.type_url);
        let handle = self.cache.create_watch(&request);
        let canceled = Arc::new(AtomicBool::new(false));
        tokio::spawn(forward_watch(
            request.type_url.clone(),
            handle.responses,
            Arc::clone(&canceled),
            watch_tx.clone(),
        ));
        self.watches
            .install(&request.type_url, ActiveWatch::new(handle.cancel, canceled));
        self.metrics.record_watch_created();
        Ok(())
    }

    async fn handle_watch_event(
        &mut self,
        event: WatchEvent,
        responses: &mpsc::Sender<Result<DiscoveryResponse, Status>>,
    ) -> Result<(), Status> {
        let WatchEvent { type_url, response } = event;
        let Some(response) = response else {
            self.metrics.record_watch_failure();
            warn!(
                stream_id = self.stream_id,
                type_url = %type_url,
                "cache watch closed unexpectedly"
            );
            return Err(XdsError::WatchFailed(type_url).into());
        };

        self.nonce += 1;
        let nonce = self.nonce.to_string();
        let WatchResponse {
            request,
            version,
            resources,
        } = response;
        let out = DiscoveryResponse {
            version_info: version,
            resources: resources
                .into_iter()
                .map(|value| TypedResource {
                    type_url: type_url.clone(),
                    value,
                })
                .collect(),
            type_url: type_url.clone(),
            nonce: nonce.clone(),
        };

        self.callbacks
            .on_stream_response(self.stream_id, &request, &out);

        if responses.send(Ok(out)).await.is_err() {
            // Client went away mid-send; the closed branch of the loop
            // finishes the shutdown.
            return Ok(());
        }
        self.watches.record_nonce(&type_url, nonce);
        self.metrics.record_response();
        Ok(())
    }
}

/// Pulls requests off the wire until EOF or a receive error, then drops the
/// sender so the event loop observes a closed channel.
async fn read_requests(
    mut stream: Streaming<DiscoveryRequest>,
    requests: mpsc::Sender<DiscoveryRequest>,
) {
    loop {
        match stream.message().await {
            Ok(Some(request)) => {
                if requests.send(request).await.is_err() {
                    // Event loop already exited.
                    return;
                }
            }
            Ok(None) => return,
            Err(status) => {
                debug!("request stream receive failed: {status}");
                return;
            }
        }
    }
}

/// Forwards cache emissions for one watch into the session's shared event
/// channel. A backing channel that closes while the canceled flag is unset
/// signals cache failure with a `None` payload.
async fn forward_watch(
    type_url: String,
    mut responses: mpsc::Receiver<WatchResponse>,
    canceled: Arc<AtomicBool>,
    events: mpsc::Sender<WatchEvent>,
) {
    while let Some(response) = responses.recv().await {
        if canceled.load(Ordering::Acquire) {
            return;
        }
        let event = WatchEvent {
            type_url: type_url.clone(),
            response: Some(response),
        };
        if events.send(event).await.is_err() {
            return;
        }
    }
    if !canceled.load(Ordering::Acquire) {
        let event = WatchEvent {
            type_url,
            response: None,
        };
        let _ = events.send(event).await;
    }
}
