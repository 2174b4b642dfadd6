//! An access-control callback consulted at accept time can close a socket
//! before a single byte is read off it (spec.md §6). The rejected dialer
//! never gets a peer connection it can call through.

use meshline_hub::{Hub, HostPort, SharedAccessControl};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn rejected_dialer_never_completes_a_call() {
    let deny_all: SharedAccessControl = Arc::new(|_addr: std::net::SocketAddr| false);
    let server = Hub::new(Some(deny_all));
    let server_addr: HostPort = server.accept_remote_clients("127.0.0.1:0").await.unwrap().into();

    let client = Hub::new(None);
    let outcome = tokio::time::timeout(
        Duration::from_millis(500),
        client.call(&server_addr, "WorldClock", "getTime", vec![]),
    )
    .await;

    match outcome {
        // Either the call times out waiting on a response that will never
        // come (server closed without reading), or the dial/write itself
        // observes the closed socket — both are "never got a reply".
        Ok(result) => assert!(result.is_err()),
        Err(_elapsed) => {}
    }

    client.shutdown().await;
    server.shutdown().await;
}
