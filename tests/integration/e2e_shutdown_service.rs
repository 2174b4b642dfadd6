//! A wrong password against the demo `Shutdown` service returns the literal
//! string `"Permission denied."` as an ordinary call result — the call
//! succeeds, and the connection is left standing (spec.md §8 scenario 3).

use meshline::demo;
use meshline_hub::{Hub, HostPort};
use serde_json::json;

#[tokio::test]
async fn wrong_password_is_a_normal_reply_not_a_teardown() {
    let server = Hub::new(None);
    let server_addr: HostPort = server.accept_remote_clients("127.0.0.1:0").await.unwrap().into();
    server
        .register_service(
            "Shutdown",
            Some(demo::shutdown_service(server.clone(), "correct horse".to_owned())),
        )
        .await
        .unwrap();

    let client = Hub::new(None);
    let result = client
        .call(&server_addr, "Shutdown", "shutdown", vec![json!("wrong guess")])
        .await
        .expect("a bad password is a normal reply, not a call failure");

    assert_eq!(result, json!("Permission denied."));

    // The connection must still be usable: a second, unrelated call on it
    // succeeds.
    server
        .register_service("WorldClock", Some(demo::world_clock_service()))
        .await
        .unwrap();
    let time = client
        .call(&server_addr, "WorldClock", "getTime", vec![])
        .await
        .expect("connection must still be alive after a denied shutdown");
    assert!(time.as_str().unwrap().ends_with('\n'));

    client.shutdown().await;
    server.shutdown().await;
}
