//! Demo services exercised by the CLI and the end-to-end test suite. Out of
//! scope for the core engine itself (spec.md §1) — these exist only to give
//! `meshline-hub` something concrete to dispatch to.

use chrono::Utc;
use meshline_hub::{Hub, ServiceDescriptor};
use meshline_protocol::Value;
use std::time::Duration;
use tokio::task::JoinHandle;

/// A single no-argument method returning the current UTC time.
pub fn world_clock_service() -> ServiceDescriptor {
    ServiceDescriptor::new("WorldClock").method("getTime", 0, |_args| async move {
        Ok(Value::String(format!("{}\n", Utc::now().to_rfc3339())))
    })
}

/// A password-gated method that shuts the owning hub down. A wrong password
/// returns "Permission denied." without touching any connection.
pub fn shutdown_service(hub: Hub, password: String) -> ServiceDescriptor {
    ServiceDescriptor::new("Shutdown").method("shutdown", 1, move |args| {
        let hub = hub.clone();
        let expected = password.clone();
        async move {
            let given = args
                .into_iter()
                .next()
                .and_then(|v| v.as_str().map(str::to_owned))
                .unwrap_or_default();
            if given != expected {
                return Ok(Value::String("Permission denied.".to_owned()));
            }
            hub.shutdown().await;
            Ok(Value::String("Shutting down.".to_owned()))
        }
    })
}

/// Publishes the current time under `type_name`/`flavor` every `period`,
/// forever. Used by the `publish` CLI subcommand and by the pub/sub
/// end-to-end test.
pub fn spawn_ticking_publisher(
    hub: Hub,
    type_name: String,
    flavor: Option<String>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            let value = Value::String(format!("{}\n", Utc::now().to_rfc3339()));
            hub.publish(&type_name, flavor.clone(), value).await;
        }
    })
}
