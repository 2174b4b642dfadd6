//! A subscribes to B's publishes over a real connection and its local
//! delivery callback sees every tick B publishes.

use meshline_hub::{Hub, HostPort, LocalSubscription};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

#[tokio::test]
async fn subscriber_receives_every_matching_publish() {
    let publisher = Hub::new(None);
    let publisher_addr: HostPort = publisher
        .accept_remote_clients("127.0.0.1:0")
        .await
        .unwrap()
        .into();

    let subscriber = Hub::new(None);
    let received = Arc::new(AtomicUsize::new(0));
    let received_clone = received.clone();
    let notify = Arc::new(Notify::new());
    let notify_clone = notify.clone();

    subscriber
        .subscribe(
            "Date",
            Some("1sec".to_owned()),
            None,
            LocalSubscription {
                delivery: Arc::new(move |_value| {
                    received_clone.fetch_add(1, Ordering::SeqCst);
                    notify_clone.notify_one();
                }),
                abort: Arc::new(|_reason| {}),
            },
            Some(&publisher_addr),
        )
        .await
        .unwrap();

    for i in 0..3 {
        publisher
            .publish("Date", Some("1sec".to_owned()), json!(i))
            .await;
        notify.notified().await;
    }

    assert_eq!(received.load(Ordering::SeqCst), 3);

    subscriber.shutdown().await;
    publisher.shutdown().await;
}

#[tokio::test]
async fn differently_flavored_publish_is_not_delivered() {
    let publisher = Hub::new(None);
    let publisher_addr: HostPort = publisher
        .accept_remote_clients("127.0.0.1:0")
        .await
        .unwrap()
        .into();

    let subscriber = Hub::new(None);
    let received = Arc::new(AtomicUsize::new(0));
    let received_clone = received.clone();

    subscriber
        .subscribe(
            "Date",
            Some("1sec".to_owned()),
            None,
            LocalSubscription {
                delivery: Arc::new(move |_| {
                    received_clone.fetch_add(1, Ordering::SeqCst);
                }),
                abort: Arc::new(|_| {}),
            },
            Some(&publisher_addr),
        )
        .await
        .unwrap();

    publisher
        .publish("Date", Some("1min".to_owned()), json!("wrong flavor"))
        .await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(received.load(Ordering::SeqCst), 0);

    subscriber.shutdown().await;
    publisher.shutdown().await;
}
