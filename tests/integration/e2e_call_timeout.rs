//! A call to a method that never responds is interrupted by the timeout
//! watchdog, and the serial is subsequently dropped without reviving the
//! caller (spec.md §8 properties 4 and 6).

use meshline_hub::{Hub, HostPort, ServiceDescriptor};
use std::time::Duration;

#[tokio::test]
async fn a_stalled_method_times_out() {
    let server = Hub::new(None);
    let server_addr: HostPort = server.accept_remote_clients("127.0.0.1:0").await.unwrap().into();
    server
        .register_service(
            "Slow",
            Some(ServiceDescriptor::new("Slow").method("wait", 0, |_args| async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(serde_json::json!("too late"))
            })),
        )
        .await
        .unwrap();

    let client = Hub::with_call_timeout(None, Duration::from_millis(150));
    let result = client.call(&server_addr, "Slow", "wait", vec![]).await;

    let err = result.expect_err("call should time out");
    assert!(err.to_string().contains("timed out"));

    client.shutdown().await;
    server.shutdown().await;
}
