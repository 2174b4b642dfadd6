//! The transportable error value (spec §6 "Error value"): a message, a
//! serialized stack trace, and an optional nested cause of the same shape.
//! Round-trips on the wire inside an `ArmiException`-typed envelope or as the
//! body of a failed `SynchronousResponse`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One frame of a serialized stack trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFrame {
    pub class_name: String,
    pub file: String,
    pub method: String,
    pub line: u32,
}

/// A structured error that survives being sent to a remote peer and back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    pub message: String,
    #[serde(default)]
    pub stack_trace: Vec<StackFrame>,
    pub cause: Option<Box<RemoteError>>,
}

impl RemoteError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack_trace: Vec::new(),
            cause: None,
        }
    }

    pub fn with_cause(message: impl Into<String>, cause: RemoteError) -> Self {
        Self {
            message: message.into(),
            stack_trace: Vec::new(),
            cause: Some(Box::new(cause)),
        }
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(cause) = &self.cause {
            write!(f, " (caused by: {cause})")?;
        }
        Ok(())
    }
}

impl std::error::Error for RemoteError {}
