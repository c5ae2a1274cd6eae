//! Discovery server error types.
//!
//! Protocol violations terminate the offending call only; cache failures
//! terminate the whole stream and the client is expected to reconnect.

use thiserror::Error;

pub type XdsResult<T> = Result<T, XdsError>;

#[derive(Debug, Error)]
pub enum XdsError {
    /// Aggregated streams carry no implicit type, so a request without one
    /// cannot be routed.
    #[error("missing type_url in discovery request")]
    MissingTypeUrl,

    /// The cache closed a watch channel without its cancel fn having been
    /// invoked: an unrecoverable internal failure for that stream.
    #[error("watch for {0} closed by the cache without cancellation")]
    WatchFailed(String),

    #[error("cache fetch failed: {0}")]
    Fetch(String),
}

impl From<XdsError> for tonic::Status {
    fn from(err: XdsError) -> Self {
        match err {
            XdsError::MissingTypeUrl => tonic::Status::invalid_argument(err.to_string()),
            XdsError::WatchFailed(_) | XdsError::Fetch(_) => {
                tonic::Status::unavailable(err.to_string())
            }
        }
    }
}
