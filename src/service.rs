//! gRPC surface: the aggregated discovery service plus one streaming and
//! one unary fetch service per concrete resource type, all delegating to a
//! shared session driver and a shared fetch path.
//!
//! The server is shared across services via `from_arc`:
//!
//! ```rust,ignore
//! let server = Arc::new(XdsServer::new(cache).with_callbacks(tracker));
//! Server::builder()
//!     .add_service(AggregatedDiscoveryServiceServer::from_arc(server.clone()))
//!     .add_service(ClusterDiscoveryServiceServer::from_arc(server.clone()))
//!     .serve(addr)
//!     .await?;
//! ```

use std::sync::{
    atomic::{AtomicI64, Ordering},
    Arc,
};

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status, Streaming};

use crate::{
    cache::Cache,
    callbacks::{Callbacks, NoopCallbacks},
    error::{XdsError, XdsResult},
    metrics::XdsMetrics,
    proto::{
        aggregated_discovery_service_server::AggregatedDiscoveryService,
        cluster_discovery_service_server::ClusterDiscoveryService,
        endpoint_discovery_service_server::EndpointDiscoveryService,
        listener_discovery_service_server::ListenerDiscoveryService,
        route_discovery_service_server::RouteDiscoveryService, DiscoveryRequest,
        DiscoveryResponse, TypedResource,
    },
    resource,
    session::StreamSession,
};

/// Capacity of the outbound response channel bridged into the tonic stream.
const RESPONSE_CHANNEL_CAPACITY: usize = 16;

/// The discovery server: owns the shared cache, the observer, metrics, and
/// the stream id counter.
pub struct XdsServer<C> {
    cache: Arc<C>,
    callbacks: Arc<dyn Callbacks>,
    metrics: Arc<XdsMetrics>,
    stream_id: AtomicI64,
}

impl<C: Cache> XdsServer<C> {
    pub fn new(cache: Arc<C>) -> Self {
        Self {
            cache,
            callbacks: Arc::new(NoopCallbacks),
            metrics: Arc::new(XdsMetrics::new()),
            stream_id: AtomicI64::new(0),
        }
    }

    /// Attach an observer invoked at protocol transition points.
    pub fn with_callbacks(mut self, callbacks: Arc<dyn Callbacks>) -> Self {
        self.callbacks = callbacks;
        self
    }

    /// Share a metrics recorder with the embedding application.
    pub fn with_metrics(mut self, metrics: Arc<XdsMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> Arc<XdsMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Open a session for one physical stream and hand back its response
    /// side. The session task owns all stream state; a terminal error is
    /// yielded into the response stream as a status.
    fn stream(
        &self,
        requests: Streaming<DiscoveryRequest>,
        default_type_url: &str,
    ) -> ReceiverStream<Result<DiscoveryResponse, Status>> {
        let stream_id = self.stream_id.fetch_add(1, Ordering::Relaxed) + 1;
        let session = StreamSession::new(
            Arc::clone(&self.cache),
            Arc::clone(&self.callbacks),
            Arc::clone(&self.metrics),
            stream_id,
            default_type_url.to_string(),
        );
        let (response_tx, response_rx) = mpsc::channel(RESPONSE_CHANNEL_CAPACITY);
        let terminal = response_tx.clone();
        tokio::spawn(async move {
            if let Err(status) = session.run(requests, response_tx).await {
                let _ = terminal.send(Err(status)).await;
            }
        });
        ReceiverStream::new(response_rx)
    }

    /// Stateless unary fetch: observer hook, single cache read, wire wrap.
    /// Touches no session state; cache errors propagate to the caller. The
    /// request's type URL is forced to the calling surface's fixed type.
    pub async fn fetch(
        &self,
        mut request: DiscoveryRequest,
        type_url: &str,
    ) -> XdsResult<DiscoveryResponse> {
        if type_url != resource::ANY_TYPE {
            request.type_url = type_url.to_string();
        } else if request.type_url.is_empty() {
            return Err(XdsError::MissingTypeUrl);
        }

        self.callbacks.on_fetch_request(&request);
        let fetched = match self.cache.fetch(&request).await {
            Ok(fetched) => fetched,
            Err(err) => {
                self.metrics.record_fetch(false);
                return Err(err);
            }
        };

        let response = DiscoveryResponse {
            version_info: fetched.version,
            resources: fetched
                .resources
                .into_iter()
                .map(|value| TypedResource {
                    type_url: request.type_url.clone(),
                    value,
                })
                .collect(),
            type_url: request.type_url.clone(),
            nonce: String::new(),
        };
        self.callbacks.on_fetch_response(&request, &response);
        self.metrics.record_fetch(true);
        Ok(response)
    }
}

#[tonic::async_trait]
impl<C: Cache> AggregatedDiscoveryService for XdsServer<C> {
    type StreamAggregatedResourcesStream = ReceiverStream<Result<DiscoveryResponse, Status>>;

    async fn stream_aggregated_resources(
        &self,
        request: Request<Streaming<DiscoveryRequest>>,
    ) -> Result<Response<Self::StreamAggregatedResourcesStream>, Status> {
        Ok(Response::new(
            self.stream(request.into_inner(), resource::ANY_TYPE),
        ))
    }
}

macro_rules! impl_discovery_service {
    ($service:ident, $stream_type:ident, $stream_fn:ident, $fetch_fn:ident, $type_url:expr) => {
        #[tonic::async_trait]
        impl<C: Cache> $service for XdsServer<C> {
            type $stream_type = ReceiverStream<Result<DiscoveryResponse, Status>>;

            async fn $stream_fn(
                &self,
                request: Request<Streaming<DiscoveryRequest>>,
            ) -> Result<Response<Self::$stream_type>, Status> {
                Ok(Response::new(self.stream(request.into_inner(), $type_url)))
            }

            async fn $fetch_fn(
                &self,
                request: Request<DiscoveryRequest>,
            ) -> Result<Response<DiscoveryResponse>, Status> {
                let response = self.fetch(request.into_inner(), $type_url).await?;
                Ok(Response::new(response))
            }
        }
    };
}

impl_discovery_service!(
    ClusterDiscoveryService,
    StreamClustersStream,
    stream_clusters,
    fetch_clusters,
    resource::CLUSTER_TYPE
);
impl_discovery_service!(
    EndpointDiscoveryService,
    StreamEndpointsStream,
    stream_endpoints,
    fetch_endpoints,
    resource::ENDPOINT_TYPE
);
impl_discovery_service!(
    ListenerDiscoveryService,
    StreamListenersStream,
    stream_listeners,
    fetch_listeners,
    resource::LISTENER_TYPE
);
impl_discovery_service!(
    RouteDiscoveryService,
    StreamRoutesStream,
    stream_routes,
    fetch_routes,
    resource::ROUTE_TYPE
);
