//! Subscription index: the `type -> flavor -> subscriber list` map that
//! backs pub/sub fan-out (spec §4.3).

use crate::peer::PeerConnection;
use meshline_protocol::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::RwLock;
use tracing::warn;

pub type Predicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;
pub type DeliveryFn = Arc<dyn Fn(Value) + Send + Sync>;
pub type AbortFn = Arc<dyn Fn(&str) + Send + Sync>;

/// Where a matched value goes: a callback living in this process, or a
/// back-reference to the peer connection it must be forwarded over.
///
/// `Sink::Remote` holds only a weak reference — the peer connection's own
/// receive task is its sole owner, so a dead connection can be dropped
/// without this index keeping it alive (spec §9 cyclic-ownership note).
#[derive(Clone)]
pub enum Sink {
    Local { delivery: DeliveryFn },
    Remote { peer_id: u64, peer: Weak<PeerConnection> },
}

#[derive(Clone)]
pub struct Subscriber {
    pub id: u64,
    pub predicate: Option<Predicate>,
    pub sink: Sink,
}

/// A handle a caller holds to later cancel exactly the subscription it
/// created.
#[derive(Clone)]
pub struct Receipt {
    pub id: u64,
    pub type_name: String,
    pub flavor: Option<String>,
}

type SubscriberList = Arc<RwLock<Vec<Subscriber>>>;

#[derive(Default)]
pub struct SubscriptionIndex {
    table: RwLock<HashMap<String, HashMap<Option<String>, SubscriberList>>>,
    next_id: AtomicU64,
}

impl SubscriptionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe(
        &self,
        type_name: &str,
        flavor: Option<String>,
        predicate: Option<Predicate>,
        sink: Sink,
    ) -> Receipt {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let list = self.list_for(type_name, flavor.clone()).await;
        list.write().await.push(Subscriber { id, predicate, sink });
        Receipt {
            id,
            type_name: type_name.to_owned(),
            flavor,
        }
    }

    pub async fn cancel(&self, receipt: &Receipt) {
        if let Some(list) = self.existing_list(&receipt.type_name, &receipt.flavor).await {
            list.write().await.retain(|s| s.id != receipt.id);
        }
    }

    /// Subscribers matching `(type_name, flavor)` plus the null-flavor
    /// subscribers of the same type, which see every flavor (spec §3).
    pub async fn matching(&self, type_name: &str, flavor: Option<&str>) -> Vec<Subscriber> {
        let mut out = Vec::new();
        if let Some(list) = self
            .existing_list(type_name, &flavor.map(str::to_owned))
            .await
        {
            out.extend(list.read().await.iter().cloned());
        }
        if flavor.is_some() {
            if let Some(list) = self.existing_list(type_name, &None).await {
                out.extend(list.read().await.iter().cloned());
            }
        }
        out
    }

    /// Drops every `Sink::Remote` subscriber bound to `peer_id` — part of a
    /// peer connection's teardown cascade (spec §4.2).
    pub async fn remove_peer(&self, peer_id: u64) {
        let table = self.table.read().await;
        for by_flavor in table.values() {
            for list in by_flavor.values() {
                list.write().await.retain(|s| match &s.sink {
                    Sink::Remote { peer_id: p, .. } => *p != peer_id,
                    Sink::Local { .. } => true,
                });
            }
        }
    }

    /// Removes the remote subscriber bound to `peer_id` for exactly this
    /// `(type_name, flavor)` pair — a peer re-sends `SubscriberControl` with
    /// `Cancel` to withdraw one of its own subscriptions, naming it by type
    /// and flavor rather than by a local receipt id it never saw.
    pub async fn remove_remote(&self, peer_id: u64, type_name: &str, flavor: Option<String>) {
        if let Some(list) = self.existing_list(type_name, &flavor).await {
            list.write().await.retain(|s| {
                !matches!(&s.sink, Sink::Remote { peer_id: p, .. } if *p == peer_id)
            });
        }
    }

    pub async fn clear(&self) {
        self.table.write().await.clear();
    }

    async fn list_for(&self, type_name: &str, flavor: Option<String>) -> SubscriberList {
        {
            let table = self.table.read().await;
            if let Some(list) = table.get(type_name).and_then(|m| m.get(&flavor)) {
                return list.clone();
            }
        }
        let mut table = self.table.write().await;
        table
            .entry(type_name.to_owned())
            .or_default()
            .entry(flavor)
            .or_insert_with(|| Arc::new(RwLock::new(Vec::new())))
            .clone()
    }

    async fn existing_list(
        &self,
        type_name: &str,
        flavor: &Option<String>,
    ) -> Option<SubscriberList> {
        let table = self.table.read().await;
        table.get(type_name).and_then(|m| m.get(flavor)).cloned()
    }
}

/// Delivers `value` to every subscriber currently matching `(type_name,
/// flavor)`, evaluating each subscriber's predicate first.
///
/// The subscriber list is snapshotted out from under its lock before any
/// delivery runs (spec §9 publish/teardown race): a transmit failure can
/// trigger asynchronous teardown of a remote peer mid-fanout without that
/// mutation racing the list this loop is still walking.
pub async fn fan_out(index: &SubscriptionIndex, type_name: &str, flavor: Option<&str>, value: Value) {
    for subscriber in index.matching(type_name, flavor).await {
        if let Some(predicate) = &subscriber.predicate {
            if !predicate(&value) {
                continue;
            }
        }
        match &subscriber.sink {
            Sink::Local { delivery } => delivery(value.clone()),
            Sink::Remote { peer, .. } => {
                let Some(peer) = peer.upgrade() else {
                    continue;
                };
                // Awaited inline: the socket's write buffer is the only
                // backpressure mechanism (spec §5), and a slow peer must
                // block this publisher rather than pile up spawned transmit
                // tasks racing the write lock out of send order.
                if let Err(err) = peer
                    .publish_out(type_name, flavor.map(str::to_owned), value.clone())
                    .await
                {
                    warn!(peer = %peer.remote, error = %err, "transmit failed during fan-out, tearing down connection");
                    tokio::spawn(async move {
                        peer.shutdown(&format!("transmit failed: {err}")).await;
                    });
                }
            }
        }
    }
}
