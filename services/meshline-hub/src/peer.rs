//! One persistent, framed, bidirectional connection to a remote peer
//! (spec §4.2). Identical whether the socket was dialed out or accepted —
//! the symmetry the whole design rests on.

use crate::call::{CallOutcome, CallTable, SerialSource};
use crate::error::MeshError;
use crate::host_port::HostPort;
use crate::registry::ServiceRegistry;
use crate::subscription::{fan_out, Predicate, Sink, SubscriptionIndex};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use meshline_protocol::message::CallOutcome as WireOutcome;
use meshline_protocol::{
    envelope_type, value, CallRequest, CallResponse, Envelope, EnvelopeCodec, RemoteError,
    SubscribeIntent, SubscriberControl, Value,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::codec::Framed;
use tracing::{debug, warn};

static NEXT_PEER_ID: AtomicU64 = AtomicU64::new(1);

type WriteHalf = SplitSink<Framed<TcpStream, EnvelopeCodec>, Envelope>;
pub type ReadHalf = SplitStream<Framed<TcpStream, EnvelopeCodec>>;

/// A live connection to one remote hub.
pub struct PeerConnection {
    pub id: u64,
    pub remote: HostPort,
    write: Mutex<WriteHalf>,
    calls: CallTable,
    subscriptions: Arc<SubscriptionIndex>,
    services: Arc<ServiceRegistry>,
    call_timeout: Duration,
    shut_down: AtomicBool,
}

impl PeerConnection {
    /// Wraps an established socket. Returns the connection handle plus the
    /// read half, which the caller spawns into [`run_receive_loop`] — kept
    /// out of the struct itself so the struct is `Send + Sync` and cheaply
    /// shareable without needing a second lock for the read side.
    pub fn new(
        stream: TcpStream,
        remote: HostPort,
        subscriptions: Arc<SubscriptionIndex>,
        services: Arc<ServiceRegistry>,
        call_timeout: Duration,
        serials: SerialSource,
    ) -> (Arc<Self>, ReadHalf) {
        let framed = Framed::new(stream, EnvelopeCodec);
        let (write, read) = framed.split();
        let peer = Arc::new(Self {
            id: NEXT_PEER_ID.fetch_add(1, Ordering::Relaxed),
            remote,
            write: Mutex::new(write),
            calls: CallTable::new(serials),
            subscriptions,
            services,
            call_timeout,
            shut_down: AtomicBool::new(false),
        });
        (peer, read)
    }

    pub async fn connect(
        addr: &HostPort,
        subscriptions: Arc<SubscriptionIndex>,
        services: Arc<ServiceRegistry>,
        call_timeout: Duration,
        connect_timeout: Duration,
        serials: SerialSource,
    ) -> Result<(Arc<Self>, ReadHalf), MeshError> {
        let stream = match tokio::time::timeout(
            connect_timeout,
            TcpStream::connect((addr.host.as_str(), addr.port)),
        )
        .await
        {
            Ok(result) => result?,
            Err(_elapsed) => {
                return Err(MeshError::ConnectTimeout {
                    addr: addr.to_string(),
                    timeout_ms: connect_timeout.as_millis(),
                })
            }
        };
        Ok(Self::new(
            stream,
            addr.clone(),
            subscriptions,
            services,
            call_timeout,
            serials,
        ))
    }

    async fn transmit(&self, envelope: Envelope) -> Result<(), MeshError> {
        self.write
            .lock()
            .await
            .send(envelope)
            .await
            .map_err(MeshError::from)
    }

    /// Encodes `value` as a plain, non-privileged envelope and sends it —
    /// the path a [`Sink::Remote`] fan-out delivery takes.
    pub async fn publish_out(
        &self,
        type_name: &str,
        flavor: Option<String>,
        value: Value,
    ) -> Result<(), MeshError> {
        let payload = value::encode(&value).map_err(|e| MeshError::IllegalState(e.to_string()))?;
        self.transmit(Envelope::new(type_name.to_owned(), flavor, payload))
            .await
    }

    /// Sends a subscribe/cancel control envelope asking the remote hub to
    /// forward matching publishes back over this connection.
    pub async fn control_subscription(
        &self,
        type_name: &str,
        flavor: Option<String>,
        predicate: Option<Value>,
        intent: SubscribeIntent,
    ) -> Result<(), MeshError> {
        let body = SubscriberControl {
            type_name: type_name.to_owned(),
            flavor,
            predicate,
            intent,
        };
        let payload =
            serde_json::to_vec(&body).map_err(|e| MeshError::IllegalState(e.to_string()))?;
        self.transmit(Envelope::new(envelope_type::SUBSCRIBER_REMOTE, None, payload))
            .await
    }

    /// Issues a synchronous call and blocks until the response arrives, a
    /// connection-level failure occurs, or `timeout` elapses.
    pub async fn invoke(
        &self,
        service: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value, RemoteError> {
        let serial = self.calls.next_serial();
        let rx = self.calls.register(serial).await;
        let body = CallRequest {
            serial,
            service: service.to_owned(),
            method: method.to_owned(),
            args,
        };
        let payload = match serde_json::to_vec(&body) {
            Ok(p) => p,
            Err(err) => {
                self.calls.discard(serial).await;
                return Err(RemoteError::new(err.to_string()));
            }
        };
        if let Err(err) = self
            .transmit(Envelope::new(envelope_type::SYNCHRONOUS_CALL, None, payload))
            .await
        {
            self.calls.discard(serial).await;
            return Err(err.into());
        }

        match tokio::time::timeout(self.call_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(RemoteError::new(format!(
                "connection to {} closed before a response to {service}.{method} arrived",
                self.remote
            ))),
            Err(_elapsed) => {
                self.calls.discard(serial).await;
                Err(RemoteError::new(format!(
                    "call to {service}.{method} timed out"
                )))
            }
        }
    }

    async fn handle_response(&self, payload: &[u8]) {
        match serde_json::from_slice::<CallResponse>(payload) {
            Ok(response) => {
                let outcome: CallOutcome = match response.outcome {
                    WireOutcome::Ok(v) => Ok(v),
                    WireOutcome::Err(e) => Err(e),
                };
                self.calls.complete(response.serial, outcome).await;
            }
            Err(err) => warn!(peer = %self.remote, error = %err, "malformed SynchronousResponse"),
        }
    }

    async fn handle_call(self: &Arc<Self>, payload: &[u8]) {
        let request = match serde_json::from_slice::<CallRequest>(payload) {
            Ok(r) => r,
            Err(err) => {
                warn!(peer = %self.remote, error = %err, "malformed SynchronousCall");
                return;
            }
        };
        let peer = self.clone();
        tokio::spawn(async move {
            let outcome = peer
                .services
                .invoke(&request.service, &request.method, request.args)
                .await;
            let response = CallResponse {
                serial: request.serial,
                outcome: match outcome {
                    Ok(v) => WireOutcome::Ok(v),
                    Err(e) => WireOutcome::Err(e),
                },
            };
            match serde_json::to_vec(&response) {
                Ok(payload) => {
                    if let Err(err) = peer
                        .transmit(Envelope::new(
                            envelope_type::SYNCHRONOUS_RESPONSE,
                            None,
                            payload,
                        ))
                        .await
                    {
                        warn!(peer = %peer.remote, error = %err, "failed to send call response");
                    }
                }
                Err(err) => warn!(peer = %peer.remote, error = %err, "failed to encode call response"),
            }
        });
    }

    async fn handle_subscriber_control(self: &Arc<Self>, payload: &[u8]) {
        let control = match serde_json::from_slice::<SubscriberControl>(payload) {
            Ok(c) => c,
            Err(err) => {
                warn!(peer = %self.remote, error = %err, "malformed SubscriberRemote control");
                return;
            }
        };
        match control.intent {
            SubscribeIntent::Subscribe => {
                let predicate = equality_predicate(control.predicate);
                let peer = Arc::downgrade(self);
                self.subscriptions
                    .subscribe(
                        &control.type_name,
                        control.flavor,
                        predicate,
                        Sink::Remote {
                            peer_id: self.id,
                            peer,
                        },
                    )
                    .await;
            }
            SubscribeIntent::Cancel => {
                self.subscriptions
                    .remove_remote(self.id, &control.type_name, control.flavor)
                    .await;
            }
        }
    }

    /// Idempotent teardown: fails every outstanding call on this connection,
    /// drops its remote subscribers from the index, and closes the socket.
    pub async fn shutdown(&self, reason: &str) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(peer = %self.remote, reason, "tearing down peer connection");
        self.calls.fail_all(reason).await;
        self.subscriptions.remove_peer(self.id).await;
        let _ = self.write.lock().await.close().await;
    }
}

fn equality_predicate(serialized: Option<Value>) -> Option<Predicate> {
    serialized.map(|expected| -> Predicate { Arc::new(move |v: &Value| v == &expected) })
}

/// Drives the receive side of a connection until EOF or an error, dispatching
/// each envelope by its `type` (spec §4.2), then tears the connection down
/// and returns the reason.
pub async fn run_receive_loop(peer: Arc<PeerConnection>, mut read: ReadHalf) -> String {
    loop {
        match read.next().await {
            Some(Ok(envelope)) => dispatch(&peer, envelope).await,
            Some(Err(err)) => {
                let reason = format!("protocol error: {err}");
                peer.shutdown(&reason).await;
                return reason;
            }
            None => {
                let reason = format!("peer {} closed the connection", peer.remote);
                peer.shutdown(&reason).await;
                return reason;
            }
        }
    }
}

async fn dispatch(peer: &Arc<PeerConnection>, envelope: Envelope) {
    match envelope.type_name.as_str() {
        envelope_type::SYNCHRONOUS_CALL => peer.handle_call(&envelope.payload).await,
        envelope_type::SYNCHRONOUS_RESPONSE => peer.handle_response(&envelope.payload).await,
        envelope_type::SUBSCRIBER_REMOTE => peer.handle_subscriber_control(&envelope.payload).await,
        envelope_type::ARMI_EXCEPTION => {
            if let Ok(err) = serde_json::from_slice::<RemoteError>(&envelope.payload) {
                warn!(peer = %peer.remote, error = %err, "peer reported an out-of-band exception");
            }
        }
        _ => match value::decode(&envelope.payload) {
            Ok(value) => {
                let subscriptions = peer.subscriptions.clone();
                let type_name = envelope.type_name;
                let flavor = envelope.flavor;
                tokio::spawn(async move {
                    fan_out(&subscriptions, &type_name, flavor.as_deref(), value).await;
                });
            }
            Err(err) => warn!(peer = %peer.remote, error = %err, "malformed publish payload"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ServiceDescriptor;
    use serde_json::json;
    use tokio::net::TcpListener;

    async fn connected_pair() -> (Arc<PeerConnection>, ReadHalf, Arc<PeerConnection>, ReadHalf) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let subs_a = Arc::new(SubscriptionIndex::new());
        let services_a = Arc::new(ServiceRegistry::new());
        let subs_b = Arc::new(SubscriptionIndex::new());
        let services_b = Arc::new(ServiceRegistry::new());

        let connect = PeerConnection::connect(
            &HostPort::from(addr),
            subs_a,
            services_a,
            Duration::from_secs(1),
            Duration::from_secs(1),
            crate::call::new_serial_source(),
        );
        let accept = async {
            let (stream, remote) = listener.accept().await.unwrap();
            PeerConnection::new(
                stream,
                HostPort::from(remote),
                subs_b,
                services_b,
                Duration::from_secs(1),
                crate::call::new_serial_source(),
            )
        };
        let ((a, read_a), (b, read_b)) = tokio::join!(async { connect.await.unwrap() }, accept);
        (a, read_a, b, read_b)
    }

    #[tokio::test]
    async fn invoke_round_trips_through_a_real_socket() {
        let (a, read_a, b, read_b) = connected_pair().await;
        b.services
            .register(
                "WorldClock",
                Some(ServiceDescriptor::new("WorldClock").method("echo", 1, |args| async move {
                    Ok(args.into_iter().next().unwrap())
                })),
            )
            .await;
        tokio::spawn(run_receive_loop(a.clone(), read_a));
        tokio::spawn(run_receive_loop(b.clone(), read_b));

        let result = a.invoke("WorldClock", "echo", vec![json!("hi")]).await;
        assert_eq!(result, Ok(json!("hi")));
    }

    #[tokio::test]
    async fn invoke_against_unknown_service_returns_a_remote_error() {
        let (a, read_a, b, read_b) = connected_pair().await;
        tokio::spawn(run_receive_loop(a.clone(), read_a));
        tokio::spawn(run_receive_loop(b.clone(), read_b));

        let result = a.invoke("Nope", "echo", vec![]).await;
        assert_eq!(result, Err(RemoteError::new("Service not found: Nope")));
    }

    #[tokio::test]
    async fn shutdown_fails_outstanding_calls() {
        let (a, read_a, b, _read_b) = connected_pair().await;
        tokio::spawn(run_receive_loop(a.clone(), read_a));
        // `b` never answers; its own receive loop is dropped so the call hangs
        // until `a` is explicitly torn down.
        let call = tokio::spawn({
            let a = a.clone();
            async move { a.invoke("WorldClock", "getTime", vec![]).await }
        });
        tokio::task::yield_now().await;
        a.shutdown("test teardown").await;
        let _ = &b;
        let result = call.await.unwrap();
        assert!(result.is_err());
    }
}
