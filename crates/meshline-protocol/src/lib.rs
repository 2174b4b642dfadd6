//! Wire contract for the meshline peer-to-peer messaging runtime.
//!
//! This crate owns everything two peers need to agree on before either side
//! can make sense of a byte on the wire: the envelope framing (`envelope`),
//! the closed value grammar carried inside a payload (`value`), the
//! transportable error shape (`error`), and the serializable bodies of the
//! four privileged envelope types (`message`).

pub mod envelope;
pub mod error;
pub mod message;
pub mod value;

pub use envelope::{Envelope, EnvelopeCodec, ProtocolError};
pub use error::RemoteError;
pub use message::{CallRequest, CallResponse, SubscribeIntent, SubscriberControl};
pub use value::Value;

/// Stable wire-level `type` tags the dispatch hub treats specially. Every
/// other `type` value is opaque application data routed through pub/sub.
pub mod envelope_type {
    pub const SUBSCRIBER_REMOTE: &str = "SubscriberRemote";
    pub const SYNCHRONOUS_CALL: &str = "SynchronousCall";
    pub const SYNCHRONOUS_RESPONSE: &str = "SynchronousResponse";
    pub const ARMI_EXCEPTION: &str = "ArmiException";
}
