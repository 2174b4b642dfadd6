//! Demo surface and integration-test support for the meshline workspace.
//! The protocol and engine live in `meshline_protocol` and `meshline_hub`;
//! this crate is deliberately thin (spec.md §1 names it out of scope).

pub mod demo;

pub use meshline_hub::{Hub, HostPort, LocalSubscription, MeshError, ServiceDescriptor};
pub use meshline_protocol::{RemoteError, Value};
