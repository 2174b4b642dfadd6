//! The dispatch hub: the façade a process uses to accept connections, dial
//! peers, register services, and move values through calls and pub/sub
//! (spec §4.3, §6).

use crate::access::SharedAccessControl;
use crate::call::{new_serial_source, SerialSource, DEFAULT_CALL_TIMEOUT, DEFAULT_CONNECT_TIMEOUT};
use crate::error::MeshError;
use crate::host_port::HostPort;
use crate::peer::{run_receive_loop, PeerConnection};
use crate::registry::{ServiceDescriptor, ServiceRegistry};
use crate::subscription::{fan_out, AbortFn, DeliveryFn, Predicate, Receipt, Sink, SubscriptionIndex};
use meshline_protocol::{RemoteError, SubscribeIntent, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// What a local subscriber hands the hub: one callback for delivered values,
/// one for the terminal notification when its upstream connection dies
/// (spec §5 cancellation / §7 abort hook).
pub struct LocalSubscription {
    pub delivery: DeliveryFn,
    pub abort: AbortFn,
}

struct RemoteDependent {
    receipt: Receipt,
    abort: AbortFn,
}

struct HubState {
    services: Arc<ServiceRegistry>,
    subscriptions: Arc<SubscriptionIndex>,
    peers: RwLock<HashMap<HostPort, Arc<PeerConnection>>>,
    remote_dependents: RwLock<HashMap<u64, Vec<RemoteDependent>>>,
    acceptor: RwLock<Option<JoinHandle<()>>>,
    access_control: Option<SharedAccessControl>,
    accepting: AtomicBool,
    terminated: AtomicBool,
    call_timeout: Duration,
    connect_timeout: Duration,
    /// Shared across every [`PeerConnection`] this hub owns, so that serials
    /// are unique hub-wide rather than merely per-connection (spec §8
    /// property 4, §9).
    serials: SerialSource,
}

/// Cheaply cloneable handle to one hub's shared state — every clone refers
/// to the same dispatch tables, peer-connection table, and subscription
/// index.
#[derive(Clone)]
pub struct Hub {
    state: Arc<HubState>,
}

impl Hub {
    pub fn new(access_control: Option<SharedAccessControl>) -> Self {
        Self::with_timeouts(access_control, DEFAULT_CALL_TIMEOUT, DEFAULT_CONNECT_TIMEOUT)
    }

    pub fn with_call_timeout(access_control: Option<SharedAccessControl>, call_timeout: Duration) -> Self {
        Self::with_timeouts(access_control, call_timeout, DEFAULT_CONNECT_TIMEOUT)
    }

    pub fn with_timeouts(
        access_control: Option<SharedAccessControl>,
        call_timeout: Duration,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            state: Arc::new(HubState {
                services: Arc::new(ServiceRegistry::new()),
                subscriptions: Arc::new(SubscriptionIndex::new()),
                peers: RwLock::new(HashMap::new()),
                remote_dependents: RwLock::new(HashMap::new()),
                acceptor: RwLock::new(None),
                access_control,
                accepting: AtomicBool::new(false),
                terminated: AtomicBool::new(false),
                call_timeout,
                connect_timeout,
                serials: new_serial_source(),
            }),
        }
    }

    /// Binds `bind_addr` and begins accepting remote connections in the
    /// background. Returns the bound socket address (useful when `bind_addr`
    /// asked for an ephemeral port).
    pub async fn accept_remote_clients(&self, bind_addr: &str) -> Result<SocketAddr, MeshError> {
        if self.state.terminated.load(Ordering::SeqCst) {
            return Err(MeshError::illegal_state("hub has been shut down and cannot be restarted"));
        }
        if self.state.accepting.swap(true, Ordering::SeqCst) {
            return Err(MeshError::illegal_state("hub is already accepting clients"));
        }
        let listener = match TcpListener::bind(bind_addr).await {
            Ok(l) => l,
            Err(err) => {
                self.state.accepting.store(false, Ordering::SeqCst);
                return Err(err.into());
            }
        };
        let local_addr = listener.local_addr()?;
        let hub = self.clone();
        let handle = tokio::spawn(async move { hub.run_acceptor(listener).await });
        *self.state.acceptor.write().await = Some(handle);
        info!(addr = %local_addr, "accepting remote clients");
        Ok(local_addr)
    }

    async fn run_acceptor(self, listener: TcpListener) {
        loop {
            let (stream, remote) = match listener.accept().await {
                Ok(pair) => pair,
                Err(err) => {
                    warn!(error = %err, "accept failed");
                    continue;
                }
            };
            if let Some(access) = &self.state.access_control {
                if !access.allow(remote) {
                    warn!(remote = %remote, "connection rejected by access control");
                    continue;
                }
            }
            let (peer, read) = PeerConnection::new(
                stream,
                HostPort::from(remote),
                self.state.subscriptions.clone(),
                self.state.services.clone(),
                self.state.call_timeout,
                self.state.serials.clone(),
            );
            self.adopt(peer, read).await;
        }
    }

    /// Registers `peer` in the connection table and spawns its receive loop
    /// plus the post-loop cascade cleanup.
    async fn adopt(&self, peer: Arc<PeerConnection>, read: crate::peer::ReadHalf) {
        self.state
            .peers
            .write()
            .await
            .insert(peer.remote.clone(), peer.clone());
        let hub = self.clone();
        tokio::spawn(async move {
            let reason = run_receive_loop(peer.clone(), read).await;
            hub.retire(&peer, &reason).await;
        });
    }

    /// Cascades a dead connection out of hub-owned state that the
    /// connection itself doesn't know about: the peer table and any local
    /// subscriptions that depended on it.
    async fn retire(&self, peer: &Arc<PeerConnection>, reason: &str) {
        self.state.peers.write().await.remove(&peer.remote);
        if let Some(dependents) = self.state.remote_dependents.write().await.remove(&peer.id) {
            for dependent in dependents {
                (dependent.abort)(reason);
                self.state.subscriptions.cancel(&dependent.receipt).await;
            }
        }
    }

    /// Looks up an existing connection to `addr`, or dials and adopts a new
    /// one.
    async fn peer_connection(&self, addr: &HostPort) -> Result<Arc<PeerConnection>, MeshError> {
        if self.state.terminated.load(Ordering::SeqCst) {
            return Err(MeshError::illegal_state("hub has been shut down"));
        }
        if let Some(existing) = self.state.peers.read().await.get(addr) {
            return Ok(existing.clone());
        }
        let (peer, read) = PeerConnection::connect(
            addr,
            self.state.subscriptions.clone(),
            self.state.services.clone(),
            self.state.call_timeout,
            self.state.connect_timeout,
            self.state.serials.clone(),
        )
        .await?;
        self.adopt(peer.clone(), read).await;
        Ok(peer)
    }

    /// Registers (or withdraws, passing `None`) a service. Requires the hub
    /// to already be accepting remote clients (spec §4.4).
    pub async fn register_service(
        &self,
        name: impl Into<String>,
        descriptor: Option<ServiceDescriptor>,
    ) -> Result<(), MeshError> {
        if !self.state.accepting.load(Ordering::SeqCst) {
            return Err(MeshError::illegal_state(
                "register_service requires the hub to be accepting remote clients",
            ));
        }
        self.state.services.register(name, descriptor).await;
        Ok(())
    }

    /// Opens (or reuses) a connection to `addr` and issues a blocking call.
    pub async fn call(
        &self,
        addr: &HostPort,
        service: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value, RemoteError> {
        let peer = self
            .peer_connection(addr)
            .await
            .map_err(RemoteError::from)?;
        peer.invoke(service, method, args).await
    }

    /// Publishes a value to every locally matching subscriber, including
    /// remote ones reached by forwarding over their bound connection.
    pub async fn publish(&self, type_name: &str, flavor: Option<String>, value: Value) {
        fan_out(&self.state.subscriptions, type_name, flavor.as_deref(), value).await;
    }

    /// Installs a local subscription. When `peer` is given, also asks that
    /// remote hub to forward its matching publishes back over the
    /// connection, so the local delivery callback sees them too.
    pub async fn subscribe(
        &self,
        type_name: &str,
        flavor: Option<String>,
        predicate: Option<Predicate>,
        local: LocalSubscription,
        peer: Option<&HostPort>,
    ) -> Result<Receipt, MeshError> {
        let had_predicate = predicate.is_some();
        let receipt = self
            .state
            .subscriptions
            .subscribe(
                type_name,
                flavor.clone(),
                predicate,
                Sink::Local {
                    delivery: local.delivery,
                },
            )
            .await;

        if let Some(addr) = peer {
            let conn = self.peer_connection(addr).await?;
            self.state
                .remote_dependents
                .write()
                .await
                .entry(conn.id)
                .or_default()
                .push(RemoteDependent {
                    receipt: receipt.clone(),
                    abort: local.abort,
                });
            // Arbitrary Rust closures have no wire representation, so a
            // predicate given here is demoted to local-only filtering: the
            // remote hub forwards every matching publish unfiltered, and we
            // filter again on arrival.
            if had_predicate {
                debug!(
                    peer = %addr,
                    type_name,
                    "predicate demoted to local-only filtering for remote subscription"
                );
            }
            conn.control_subscription(type_name, flavor, None, SubscribeIntent::Subscribe)
                .await?;
        }
        Ok(receipt)
    }

    pub async fn cancel_subscription(&self, receipt: &Receipt) {
        self.state.subscriptions.cancel(receipt).await;
    }

    /// Closes the acceptor, tears down every peer connection, and clears
    /// the subscription index and service registry. `isRunnable` becomes
    /// false: a hub does not resume after this (spec §6).
    pub async fn shutdown(&self) {
        self.state.terminated.store(true, Ordering::SeqCst);
        self.state.accepting.store(false, Ordering::SeqCst);
        if let Some(handle) = self.state.acceptor.write().await.take() {
            handle.abort();
        }
        let peers: Vec<_> = self.state.peers.write().await.drain().map(|(_, p)| p).collect();
        for peer in peers {
            peer.shutdown("hub shutting down").await;
        }
        self.state.subscriptions.clear().await;
        self.state.services.clear().await;
        self.state.remote_dependents.write().await.clear();
    }

    pub async fn connected_peers(&self) -> Vec<HostPort> {
        self.state.peers.read().await.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn register_service_requires_accepting_clients() {
        let hub = Hub::new(None);
        let result = hub
            .register_service("WorldClock", Some(ServiceDescriptor::new("WorldClock")))
            .await;
        assert!(matches!(result, Err(MeshError::IllegalState(_))));
    }

    #[tokio::test]
    async fn local_publish_reaches_a_local_subscriber_with_no_peer() {
        let hub = Hub::new(None);
        let received = Arc::new(std::sync::Mutex::new(Vec::new()));
        let received_clone = received.clone();
        hub.subscribe(
            "Date",
            None,
            None,
            LocalSubscription {
                delivery: Arc::new(move |v| received_clone.lock().unwrap().push(v)),
                abort: Arc::new(|_| {}),
            },
            None,
        )
        .await
        .unwrap();

        hub.publish("Date", None, json!("now")).await;
        assert_eq!(*received.lock().unwrap(), vec![json!("now")]);
    }

    #[tokio::test]
    async fn call_to_unreachable_address_is_a_remote_error() {
        let hub = Hub::new(None);
        let addr = HostPort::new("127.0.0.1", 1);
        let result = hub.call(&addr, "WorldClock", "getTime", vec![]).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn shutdown_makes_the_hub_not_runnable() {
        let hub = Hub::new(None);
        let addr = hub.accept_remote_clients("127.0.0.1:0").await.unwrap();
        hub.register_service("WorldClock", Some(ServiceDescriptor::new("WorldClock")))
            .await
            .unwrap();
        hub.shutdown().await;
        let _ = addr;
        let result = hub
            .register_service("WorldClock", Some(ServiceDescriptor::new("WorldClock")))
            .await;
        assert!(matches!(result, Err(MeshError::IllegalState(_))));
    }

    #[tokio::test]
    async fn accept_remote_clients_rejects_a_second_call() {
        let hub = Hub::new(None);
        hub.accept_remote_clients("127.0.0.1:0").await.unwrap();
        let result = hub.accept_remote_clients("127.0.0.1:0").await;
        assert!(result.is_err());
    }
}
