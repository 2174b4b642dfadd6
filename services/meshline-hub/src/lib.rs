//! Peer-to-peer dispatch hub: frame codec agnostic, wire-contract agnostic
//! (those live in `meshline_protocol`) — this crate owns everything that
//! happens once an envelope is on the wire. One [`Hub`] per process; each
//! remote it talks to gets exactly one [`peer::PeerConnection`], shared for
//! both synchronous calls and pub/sub.

pub mod access;
pub mod call;
pub mod error;
pub mod host_port;
pub mod hub;
pub mod peer;
pub mod registry;
pub mod subscription;

pub use access::{AccessControl, SharedAccessControl};
pub use error::MeshError;
pub use host_port::HostPort;
pub use hub::{Hub, LocalSubscription};
pub use peer::PeerConnection;
pub use registry::{ServiceDescriptor, ServiceRegistry};
pub use subscription::{Predicate, Receipt};
