//! Serializable bodies carried inside the four privileged envelope types.
//!
//! These are plain `serde`-derived structs, JSON-encoded into the envelope's
//! opaque `payload` — the same "one struct per message kind" shape this
//! workspace already uses for its other wire messages.

use crate::value::Value;
use crate::RemoteError;
use serde::{Deserialize, Serialize};

/// Body of a `SynchronousCall` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRequest {
    pub serial: u64,
    pub service: String,
    pub method: String,
    pub args: Vec<Value>,
}

/// Outcome of an invocation: either the declared return value or a
/// transportable error. Never a connection-level failure (spec §7).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    Ok(Value),
    Err(RemoteError),
}

/// Body of the paired `SynchronousResponse` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallResponse {
    pub serial: u64,
    pub outcome: CallOutcome,
}

/// Whether a `SubscriberControl` message installs or removes a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscribeIntent {
    Subscribe,
    Cancel,
}

/// Body of a `SubscriberRemote` envelope.
///
/// `predicate` carries only the serializable subset of a predicate (spec §9
/// predicate transport note) — `None` means either "no predicate" or "the
/// predicate could not be serialized and was demoted to local-only
/// filtering on the sender's side".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriberControl {
    pub type_name: String,
    pub flavor: Option<String>,
    pub predicate: Option<Value>,
    pub intent: SubscribeIntent,
}
