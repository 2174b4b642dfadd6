//! Hub-level error type. Distinguishes connection/transport failures from
//! the application-level [`RemoteError`] an invocation can fail with.

use meshline_protocol::{ProtocolError, RemoteError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MeshError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("connect to {addr} timed out after {timeout_ms}ms")]
    ConnectTimeout { addr: String, timeout_ms: u128 },

    #[error("{0}")]
    Invocation(RemoteError),

    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error("connection to {0} closed")]
    ConnectionClosed(String),
}

impl MeshError {
    pub fn illegal_state(msg: impl Into<String>) -> Self {
        Self::IllegalState(msg.into())
    }
}

/// Collapses a connection-level failure into the transportable error shape
/// so it can ride back to a blocked caller the same way an application
/// exception would (spec §7: callers never see the Rust error type itself).
impl From<MeshError> for RemoteError {
    fn from(err: MeshError) -> Self {
        match err {
            MeshError::Invocation(remote) => remote,
            other => RemoteError::new(other.to_string()),
        }
    }
}
