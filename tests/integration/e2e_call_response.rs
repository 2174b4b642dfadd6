//! Two real hubs over real TCP loopback: a caller dials a server hub and
//! gets the declared return value back.

use meshline::demo;
use meshline_hub::{Hub, HostPort};

#[tokio::test]
async fn caller_receives_the_declared_return_value() {
    let server = Hub::new(None);
    let server_addr: HostPort = server.accept_remote_clients("127.0.0.1:0").await.unwrap().into();
    server
        .register_service("WorldClock", Some(demo::world_clock_service()))
        .await
        .unwrap();

    let client = Hub::new(None);
    let result = client
        .call(&server_addr, "WorldClock", "getTime", vec![])
        .await
        .expect("call should succeed");

    let text = result.as_str().expect("getTime returns a string");
    assert!(text.ends_with('\n'));
    assert!(!text.trim().is_empty());

    client.shutdown().await;
    server.shutdown().await;
}
