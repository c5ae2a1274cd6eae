//! HTTP/JSON fetch gateway.
//!
//! One fixed POST endpoint per resource type, mapped onto the unary fetch
//! path, for environments where tooling speaks JSON rather than gRPC. The
//! body is a JSON-encoded discovery request with proto field names; the
//! reply mirrors the discovery response the gRPC fetch would return.

use std::sync::Arc;

use axum::{
    body::Bytes,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::Serialize;
use tracing::debug;

use crate::{cache::Cache, proto::DiscoveryRequest, resource, service::XdsServer};

/// Fixed path table: one fetch endpoint per resource type.
const ROUTES: &[(&str, &str)] = &[
    ("/v3/discovery:clusters", resource::CLUSTER_TYPE),
    ("/v3/discovery:endpoints", resource::ENDPOINT_TYPE),
    ("/v3/discovery:listeners", resource::LISTENER_TYPE),
    ("/v3/discovery:routes", resource::ROUTE_TYPE),
];

/// Build the gateway router around a shared discovery server.
pub fn fetch_router<C: Cache>(server: Arc<XdsServer<C>>) -> Router {
    let mut router = Router::new();
    for &(path, type_url) in ROUTES {
        let server = Arc::clone(&server);
        router = router.route(
            path,
            post(move |body: Bytes| handle_fetch(Arc::clone(&server), type_url, body)),
        );
    }
    router
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(ErrorBody { error: message })).into_response()
}

async fn handle_fetch<C: Cache>(
    server: Arc<XdsServer<C>>,
    type_url: &'static str,
    body: Bytes,
) -> Response {
    if body.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "empty request body");
    }

    let request: DiscoveryRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(err) => {
            debug!("rejecting malformed discovery request: {err}");
            return error_response(
                StatusCode::BAD_REQUEST,
                &format!("malformed discovery request: {err}"),
            );
        }
    };

    match server.fetch(request, type_url).await {
        Ok(response) => Json(response).into_response(),
        Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use axum::{body::Body, http::Request};
    use tower::ServiceExt;

    use super::*;
    use crate::{
        cache::WatchResponse,
        test_utils::{fixture_request, FixtureCache},
    };

    fn gateway(cache: Arc<FixtureCache>) -> Router {
        fetch_router(Arc::new(XdsServer::new(cache)))
    }

    async fn send(router: Router, path: &str, body: &str) -> (StatusCode, serde_json::Value) {
        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(path)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_fetch_round_trip() {
        let cache = FixtureCache::new();
        cache.set_fetch_response(Ok(WatchResponse {
            request: fixture_request(resource::CLUSTER_TYPE, "", ""),
            version: "4".to_string(),
            resources: vec![vec![1, 2, 3]],
        }));

        let body = r#"{"version_info":"","node":{"id":"node-a"},"type_url":""}"#;
        let (status, value) = send(gateway(cache), "/v3/discovery:clusters", body).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(value["version_info"], "4");
        assert_eq!(value["type_url"], resource::CLUSTER_TYPE);
        assert_eq!(value["resources"][0]["type_url"], resource::CLUSTER_TYPE);
    }

    #[tokio::test]
    async fn test_empty_body_is_bad_request() {
        let (status, _) = send(gateway(FixtureCache::new()), "/v3/discovery:clusters", "").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_malformed_json_is_bad_request() {
        let (status, _) = send(
            gateway(FixtureCache::new()),
            "/v3/discovery:listeners",
            "{not json",
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_fetch_failure_is_internal_error() {
        // FixtureCache with no scripted response fails the fetch.
        let (status, value) = send(
            gateway(FixtureCache::new()),
            "/v3/discovery:routes",
            r#"{"node":{"id":"node-a"}}"#,
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(value["error"].as_str().unwrap().contains("fetch"));
    }

    #[tokio::test]
    async fn test_unknown_path_is_not_found() {
        let (status, _) = send(
            gateway(FixtureCache::new()),
            "/v3/discovery:secrets",
            r#"{}"#,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
