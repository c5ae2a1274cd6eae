//! Shared fixtures for crate-internal tests.

use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Once,
    },
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::{net::TcpListener, sync::mpsc};
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tracing_subscriber::{
    filter::LevelFilter, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

use crate::{
    cache::{Cache, CancelFn, WatchHandle, WatchResponse},
    callbacks::Callbacks,
    error::{XdsError, XdsResult},
    metrics::XdsMetrics,
    proto::{
        aggregated_discovery_service_server::AggregatedDiscoveryServiceServer,
        cluster_discovery_service_server::ClusterDiscoveryServiceServer,
        endpoint_discovery_service_server::EndpointDiscoveryServiceServer,
        listener_discovery_service_server::ListenerDiscoveryServiceServer,
        route_discovery_service_server::RouteDiscoveryServiceServer, DiscoveryRequest,
        DiscoveryResponse, Node,
    },
    service::XdsServer,
};

static INIT: Once = Once::new();

/// Initialize test logging infrastructure
pub(crate) fn init_test_logging() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer())
            .with(
                EnvFilter::builder()
                    .with_default_directive(LevelFilter::INFO.into())
                    .from_env_lossy(),
            )
            .try_init();
    });
}

/// What the fixture cache observed, in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CacheEvent {
    WatchCreated(usize),
    WatchCanceled(usize),
}

struct CreatedWatch {
    request: DiscoveryRequest,
    /// Dropped via [`FixtureCache::close_watch`] to simulate a cache-side
    /// failure.
    responses: Option<mpsc::Sender<WatchResponse>>,
    cancel_calls: Arc<AtomicUsize>,
}

/// Scripted cache: tests drive the watch channels directly and inspect
/// what the server did with them.
pub(crate) struct FixtureCache {
    watches: Mutex<Vec<CreatedWatch>>,
    events: Arc<Mutex<Vec<CacheEvent>>>,
    fetch_response: Mutex<Option<XdsResult<WatchResponse>>>,
}

impl FixtureCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            watches: Mutex::new(Vec::new()),
            events: Arc::new(Mutex::new(Vec::new())),
            fetch_response: Mutex::new(None),
        })
    }

    pub fn watch_count(&self) -> usize {
        self.watches.lock().len()
    }

    pub fn watch_request(&self, index: usize) -> DiscoveryRequest {
        self.watches.lock()[index].request.clone()
    }

    pub fn cancel_calls(&self, index: usize) -> usize {
        self.watches.lock()[index].cancel_calls.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> Vec<CacheEvent> {
        self.events.lock().clone()
    }

    pub fn set_fetch_response(&self, response: XdsResult<WatchResponse>) {
        *self.fetch_response.lock() = Some(response);
    }

    /// Emit one response on a previously created watch.
    pub async fn emit(&self, index: usize, response: WatchResponse) {
        let sender = self.watches.lock()[index]
            .responses
            .clone()
            .expect("watch already closed");
        sender.send(response).await.expect("watch receiver dropped");
    }

    /// Close a watch channel without the cancel fn having run, simulating
    /// an unrecoverable cache failure.
    pub fn close_watch(&self, index: usize) {
        self.watches.lock()[index].responses = None;
    }
}

#[async_trait]
impl Cache for FixtureCache {
    fn create_watch(&self, request: &DiscoveryRequest) -> WatchHandle {
        let (response_tx, response_rx) = mpsc::channel(8);
        let cancel_calls = Arc::new(AtomicUsize::new(0));
        let index = {
            let mut watches = self.watches.lock();
            let index = watches.len();
            watches.push(CreatedWatch {
                request: request.clone(),
                responses: Some(response_tx),
                cancel_calls: Arc::clone(&cancel_calls),
            });
            index
        };
        self.events.lock().push(CacheEvent::WatchCreated(index));

        let events = Arc::clone(&self.events);
        let cancel: CancelFn = Box::new(move || {
            cancel_calls.fetch_add(1, Ordering::SeqCst);
            events.lock().push(CacheEvent::WatchCanceled(index));
        });
        WatchHandle {
            responses: response_rx,
            cancel,
        }
    }

    async fn fetch(&self, request: &DiscoveryRequest) -> XdsResult<WatchResponse> {
        self.fetch_response
            .lock()
            .take()
            .unwrap_or_else(|| Err(XdsError::Fetch(format!("no snapshot for {}", request.type_url))))
    }
}

/// Records every observer hook invocation.
#[derive(Default)]
pub(crate) struct RecordingCallbacks {
    pub opens: Mutex<Vec<(i64, String)>>,
    pub requests: Mutex<Vec<(i64, DiscoveryRequest)>>,
    pub responses: Mutex<Vec<(i64, DiscoveryResponse)>>,
    pub closes: Mutex<Vec<i64>>,
    pub fetch_requests: Mutex<Vec<DiscoveryRequest>>,
    pub fetch_responses: Mutex<Vec<DiscoveryResponse>>,
}

impl Callbacks for RecordingCallbacks {
    fn on_stream_open(&self, stream_id: i64, type_url: &str) {
        self.opens.lock().push((stream_id, type_url.to_string()));
    }

    fn on_stream_request(&self, stream_id: i64, request: &DiscoveryRequest) {
        self.requests.lock().push((stream_id, request.clone()));
    }

    fn on_stream_response(
        &self,
        stream_id: i64,
        _request: &DiscoveryRequest,
        response: &DiscoveryResponse,
    ) {
        self.responses.lock().push((stream_id, response.clone()));
    }

    fn on_stream_closed(&self, stream_id: i64) {
        self.closes.lock().push(stream_id);
    }

    fn on_fetch_request(&self, request: &DiscoveryRequest) {
        self.fetch_requests.lock().push(request.clone());
    }

    fn on_fetch_response(&self, _request: &DiscoveryRequest, response: &DiscoveryResponse) {
        self.fetch_responses.lock().push(response.clone());
    }
}

pub(crate) fn fixture_request(type_url: &str, version: &str, nonce: &str) -> DiscoveryRequest {
    DiscoveryRequest {
        version_info: version.to_string(),
        node: Some(Node {
            id: "node-a".to_string(),
            ..Node::default()
        }),
        resource_names: vec![],
        type_url: type_url.to_string(),
        response_nonce: nonce.to_string(),
    }
}

/// Serve all five discovery services on an ephemeral loopback port.
pub(crate) async fn start_server(
    cache: Arc<FixtureCache>,
    callbacks: Arc<dyn Callbacks>,
    metrics: Arc<XdsMetrics>,
) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Arc::new(
        XdsServer::new(cache)
            .with_callbacks(callbacks)
            .with_metrics(metrics),
    );
    tokio::spawn(async move {
        let _ = Server::builder()
            .add_service(AggregatedDiscoveryServiceServer::from_arc(Arc::clone(
                &server,
            )))
            .add_service(ClusterDiscoveryServiceServer::from_arc(Arc::clone(&server)))
            .add_service(EndpointDiscoveryServiceServer::from_arc(Arc::clone(
                &server,
            )))
            .add_service(ListenerDiscoveryServiceServer::from_arc(Arc::clone(
                &server,
            )))
            .add_service(RouteDiscoveryServiceServer::from_arc(Arc::clone(&server)))
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await;
    });
    addr
}

/// Poll a condition until it holds, failing the test after five seconds.
pub(crate) async fn wait_for(description: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(deadline.is_ok(), "timed out waiting for {description}");
}
