//! Shared utilities for integration tests.

use std::net::SocketAddr;
use std::time::Duration;

use frontdoor::{Server, ServerBuilder};

/// Prefix on an ephemeral loopback port.
pub const LOOPBACK: &str = "http://127.0.0.1:0/";

/// Build and start `builder` on `prefixes`, returning the bound address.
pub async fn start(builder: ServerBuilder, prefixes: &[&str]) -> (Server, SocketAddr) {
    let server = builder.build().expect("server should build");
    server.start(prefixes).await.expect("server should start");
    let addr = *server.local_addrs().first().expect("one listener bound");
    (server, addr)
}

/// HTTP client that never reuses connections across tests.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

/// Poll `check` until it holds or a second passes.
#[allow(dead_code)]
pub async fn eventually<F: FnMut() -> bool>(mut check: F) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
