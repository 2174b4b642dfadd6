//! A subscribes to B. B shuts its hub down, closing the socket. A's local
//! subscriber is notified through its abort hook and A's peer table drops
//! the now-dead connection (spec.md §8 scenario 6).

use meshline_hub::{Hub, HostPort, LocalSubscription};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn peer_shutdown_aborts_dependent_local_subscribers() {
    let b = Hub::new(None);
    let b_addr: HostPort = b.accept_remote_clients("127.0.0.1:0").await.unwrap().into();

    let a = Hub::new(None);
    let aborted = Arc::new(AtomicBool::new(false));
    let aborted_clone = aborted.clone();

    a.subscribe(
        "Date",
        None,
        None,
        LocalSubscription {
            delivery: Arc::new(|_| {}),
            abort: Arc::new(move |_reason| {
                aborted_clone.store(true, Ordering::SeqCst);
            }),
        },
        Some(&b_addr),
    )
    .await
    .unwrap();

    assert_eq!(a.connected_peers().await, vec![b_addr.clone()]);

    b.shutdown().await;

    // The abort cascade runs asynchronously off A's receive loop noticing
    // EOF; give it a moment to land.
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(aborted.load(Ordering::SeqCst), "abort hook should have fired");
    assert!(a.connected_peers().await.is_empty());

    a.shutdown().await;
}
