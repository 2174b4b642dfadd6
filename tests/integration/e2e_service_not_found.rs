//! Calling a service that was never registered fails with a `RemoteError`
//! naming it — never a connection-level error (spec.md §7).

use meshline_hub::{Hub, HostPort};

#[tokio::test]
async fn unregistered_service_returns_a_named_remote_error() {
    let server = Hub::new(None);
    let server_addr: HostPort = server.accept_remote_clients("127.0.0.1:0").await.unwrap().into();

    let client = Hub::new(None);
    let err = client
        .call(&server_addr, "Nonexistent", "anything", vec![])
        .await
        .expect_err("unregistered service must fail");

    assert!(err.message.contains("Nonexistent"));

    client.shutdown().await;
    server.shutdown().await;
}
