//! Crate-internal integration tests driving the discovery server over real
//! gRPC loopback connections.
