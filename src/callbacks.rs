//! Observer seam for protocol transition points.

use crate::proto::{DiscoveryRequest, DiscoveryResponse};

/// Hooks invoked synchronously by the discovery server as streams and
/// fetches progress.
///
/// Implementations observe; they must never alter protocol behavior. Every
/// method defaults to a no-op so observers override only what they need.
pub trait Callbacks: Send + Sync {
    /// A new physical stream opened. `type_url` is the stream's fixed type,
    /// or empty for aggregated streams.
    fn on_stream_open(&self, _stream_id: i64, _type_url: &str) {}

    /// A request arrived on an open stream, after type-URL defaulting.
    fn on_stream_request(&self, _stream_id: i64, _request: &DiscoveryRequest) {}

    /// A response is about to be sent for the given originating request.
    fn on_stream_response(
        &self,
        _stream_id: i64,
        _request: &DiscoveryRequest,
        _response: &DiscoveryResponse,
    ) {
    }

    /// The stream terminated, cleanly or not.
    fn on_stream_closed(&self, _stream_id: i64) {}

    fn on_fetch_request(&self, _request: &DiscoveryRequest) {}

    fn on_fetch_response(&self, _request: &DiscoveryRequest, _response: &DiscoveryResponse) {}
}

/// No-op observer for servers that do not track client state.
#[derive(Debug, Clone, Default)]
pub struct NoopCallbacks;

impl Callbacks for NoopCallbacks {}
