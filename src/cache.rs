//! Contract between the discovery server and the snapshot source.
//!
//! The cache is shared across all streams and must be internally
//! thread-safe; the server treats it as opaque.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{error::XdsResult, proto::DiscoveryRequest};

/// A single cache emission for one watch: the configuration version plus
/// the already-encoded resource payloads for the subscribed type.
#[derive(Debug, Clone, Default)]
pub struct WatchResponse {
    /// The request that opened the watch, echoed back for bookkeeping.
    pub request: DiscoveryRequest,
    pub version: String,
    /// Encoded protobuf payloads. The session wraps each into a typed
    /// resource using the subscription's type URL as discriminator.
    pub resources: Vec<Vec<u8>>,
}

/// Tears down the cache-side watch. Invoked at most once.
pub type CancelFn = Box<dyn FnOnce() + Send>;

/// A live subscription created by [`Cache::create_watch`].
pub struct WatchHandle {
    pub responses: mpsc::Receiver<WatchResponse>,
    pub cancel: CancelFn,
}

#[async_trait]
pub trait Cache: Send + Sync + 'static {
    /// Open a watch for the request's type URL, resource names, and
    /// already-held version.
    ///
    /// The cache must emit at least one response whenever its current state
    /// differs from what the request already holds, and keep emitting on
    /// every subsequent relevant change until the cancel fn is invoked.
    /// Closing the channel without cancellation is the cache's signal of an
    /// unrecoverable internal failure for that watch.
    fn create_watch(&self, request: &DiscoveryRequest) -> WatchHandle;

    /// Single read of current state; no watching semantics.
    async fn fetch(&self, request: &DiscoveryRequest) -> XdsResult<WatchResponse>;
}
