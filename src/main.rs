//! Demo CLI over the meshline hub: `serve`, `call`, `publish`, `subscribe`.
//! Exists to give the engine a runnable surface; the protocol and dispatch
//! logic it drives live entirely in `meshline_protocol` / `meshline_hub`.

use clap::{Parser, Subcommand};
use meshline::demo;
use meshline_hub::{Hub, HostPort, LocalSubscription};
use meshline_protocol::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_PORT: u16 = 1441;

#[derive(Parser)]
#[command(name = "meshline", about = "Symmetric peer-to-peer messaging demo")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Accept remote connections and register the demo services.
    Serve {
        #[arg(long, default_value_t = format!("0.0.0.0:{DEFAULT_PORT}"))]
        bind: String,
        /// If set, also registers a password-gated Shutdown service.
        #[arg(long)]
        shutdown_password: Option<String>,
    },
    /// Issue one synchronous call to a remote peer and print the result.
    Call {
        #[arg(long)]
        peer: String,
        #[arg(long)]
        service: String,
        #[arg(long)]
        method: String,
        /// JSON array of arguments.
        #[arg(long, default_value = "[]")]
        args: String,
    },
    /// Accept connections and publish a value on a timer.
    Publish {
        #[arg(long, default_value_t = format!("0.0.0.0:{DEFAULT_PORT}"))]
        bind: String,
        #[arg(long = "type")]
        type_name: String,
        #[arg(long)]
        flavor: Option<String>,
        /// JSON value to publish.
        #[arg(long)]
        value: String,
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,
        /// Number of publishes; omit to run until interrupted.
        #[arg(long)]
        count: Option<u64>,
    },
    /// Subscribe to a remote peer's publishes and print what arrives.
    Subscribe {
        #[arg(long)]
        peer: String,
        #[arg(long = "type")]
        type_name: String,
        #[arg(long)]
        flavor: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("MESHLINE_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve {
            bind,
            shutdown_password,
        } => serve(bind, shutdown_password).await,
        Command::Call {
            peer,
            service,
            method,
            args,
        } => call(peer, service, method, args).await,
        Command::Publish {
            bind,
            type_name,
            flavor,
            value,
            interval_ms,
            count,
        } => publish(bind, type_name, flavor, value, interval_ms, count).await,
        Command::Subscribe {
            peer,
            type_name,
            flavor,
        } => subscribe(peer, type_name, flavor).await,
    }
}

async fn serve(bind: String, shutdown_password: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let hub = Hub::new(None);
    let addr = hub.accept_remote_clients(&bind).await?;
    hub.register_service("WorldClock", Some(demo::world_clock_service()))
        .await?;
    if let Some(password) = shutdown_password {
        hub.register_service("Shutdown", Some(demo::shutdown_service(hub.clone(), password)))
            .await?;
    }
    info!(%addr, "serving");
    tokio::signal::ctrl_c().await?;
    hub.shutdown().await;
    Ok(())
}

async fn call(
    peer: String,
    service: String,
    method: String,
    args: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<Value> = serde_json::from_str(&args)?;
    let addr: HostPort = peer.parse()?;
    let hub = Hub::new(None);
    match hub.call(&addr, &service, &method, args).await {
        Ok(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(1);
        }
    }
    Ok(())
}

async fn publish(
    bind: String,
    type_name: String,
    flavor: Option<String>,
    value: String,
    interval_ms: u64,
    count: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let value: Value = serde_json::from_str(&value)?;
    let hub = Hub::new(None);
    let addr = hub.accept_remote_clients(&bind).await?;
    info!(%addr, type_name, "publishing");

    match count {
        Some(n) => {
            for _ in 0..n {
                hub.publish(&type_name, flavor.clone(), value.clone()).await;
                tokio::time::sleep(Duration::from_millis(interval_ms)).await;
            }
        }
        None => {
            let hub_loop = hub.clone();
            let handle = tokio::spawn(async move {
                loop {
                    hub_loop.publish(&type_name, flavor.clone(), value.clone()).await;
                    tokio::time::sleep(Duration::from_millis(interval_ms)).await;
                }
            });
            tokio::signal::ctrl_c().await?;
            handle.abort();
        }
    }
    hub.shutdown().await;
    Ok(())
}

async fn subscribe(
    peer: String,
    type_name: String,
    flavor: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let addr: HostPort = peer.parse()?;
    let hub = Hub::new(None);
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Value>();
    hub.subscribe(
        &type_name,
        flavor,
        None,
        LocalSubscription {
            delivery: Arc::new(move |value| {
                let _ = tx.send(value);
            }),
            abort: Arc::new(|reason| eprintln!("subscription aborted: {reason}")),
        },
        Some(&addr),
    )
    .await?;

    println!("subscribed to {type_name} via {addr}; Ctrl-C to stop");
    loop {
        tokio::select! {
            value = rx.recv() => match value {
                Some(v) => println!("{}", serde_json::to_string(&v)?),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    hub.shutdown().await;
    Ok(())
}
