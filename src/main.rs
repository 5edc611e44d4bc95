//! Agent (v0.1)
//!
//! Demonstration agent: a server that pings every connecting peer and a
//! client that answers pings. Either role or both may run in one process.
//!
//! # Architecture Overview
//!
//! ```text
//!   --listen                                   --connect
//!  ┌──────────────────────┐                   ┌──────────────────────┐
//!  │ Server               │   Ping (query)    │ Client               │
//!  │  session handler ────┼──────────────────▶│  incoming stream     │
//!  │  latency logged ◀────┼───────────────────┼─ Packet::response    │
//!  │                      │   Pong (reply)    │                      │
//!  └──────────────────────┘                   └──────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use clap::Parser;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use agent_builder::config::loader::load_config;
use agent_builder::config::validation::validate_config;
use agent_builder::lifecycle::signals::shutdown_on_ctrl_c;
use agent_builder::observability::{logging, metrics};
use agent_builder::{
    AgentConfig, BoxError, Client, CodecRegistry, Incoming, Payload, PayloadType, ProtocolError,
    Server, Session, Shutdown, UnhandledPayload,
};

#[derive(Parser, Debug)]
#[command(name = "agent-builder")]
#[command(about = "Ping/pong agent over the bidirectional messaging protocol", long_about = None)]
struct Cli {
    /// Serve on this address (":PORT", "HOST:PORT" or "HOST")
    #[arg(long)]
    listen: Option<String>,

    /// Dial this address (port defaults to 12457)
    #[arg(long)]
    connect: Option<String>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Ping {
    timestamp: SystemTime,
}

impl PayloadType for Ping {
    const TYPE_ID: &'static str = "ping";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Pong {
    timestamp: SystemTime,
}

impl PayloadType for Pong {
    const TYPE_ID: &'static str = "pong";
}

#[derive(Debug, Clone)]
enum AgentPayload {
    Ping(Ping),
    Pong(Pong),
}

impl Payload for AgentPayload {
    fn payload_type(&self) -> &'static str {
        match self {
            AgentPayload::Ping(_) => Ping::TYPE_ID,
            AgentPayload::Pong(_) => Pong::TYPE_ID,
        }
    }

    fn to_fields(&self) -> Result<Value, serde_json::Error> {
        match self {
            AgentPayload::Ping(p) => serde_json::to_value(p),
            AgentPayload::Pong(p) => serde_json::to_value(p),
        }
    }
}

impl From<Ping> for AgentPayload {
    fn from(p: Ping) -> Self {
        AgentPayload::Ping(p)
    }
}

impl From<Pong> for AgentPayload {
    fn from(p: Pong) -> Self {
        AgentPayload::Pong(p)
    }
}

fn codecs() -> Result<Arc<CodecRegistry<AgentPayload>>, ProtocolError> {
    let registry = CodecRegistry::new().with::<Ping>()?.with::<Pong>()?;
    Ok(Arc::new(registry))
}

/// Ping the peer once, then refuse anything it sends unprompted.
async fn server_handler(
    session: Session<AgentPayload>,
    mut incoming: Incoming<AgentPayload>,
) -> Result<(), BoxError> {
    let ping = Ping {
        timestamp: SystemTime::now(),
    };
    tracing::info!(remote_addr = %session.remote_addr(), "Sending ping");

    session
        .query_with(ping.into(), |reply| match reply {
            AgentPayload::Pong(pong) => {
                tracing::info!(
                    remote_addr = %session.remote_addr(),
                    peer_timestamp = ?pong.timestamp,
                    latency = ?session.latency(),
                    "Ping reply"
                );
                Ok(())
            }
            other => Err(BoxError::from(UnhandledPayload::new(other.payload_type()))),
        })
        .await?;

    match incoming.recv().await {
        Some(packet) => Err(UnhandledPayload::new(packet.payload().payload_type()).into()),
        None => Ok(()),
    }
}

/// Answer every ping with a pong.
async fn client_handler(
    session: Session<AgentPayload>,
    mut incoming: Incoming<AgentPayload>,
) -> Result<(), BoxError> {
    while let Some(packet) = incoming.recv().await {
        match packet.payload() {
            AgentPayload::Ping(ping) => {
                tracing::info!(
                    remote_addr = %session.remote_addr(),
                    peer_timestamp = ?ping.timestamp,
                    "Ping request"
                );
                let pong = Pong {
                    timestamp: SystemTime::now(),
                };
                packet.response(pong.into()).await?;
            }
            other => return Err(UnhandledPayload::new(other.payload_type()).into()),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => AgentConfig::default(),
    };
    if let Some(listen) = &cli.listen {
        config.listener.bind_address = listen.clone();
    }
    if let Some(connect) = &cli.connect {
        config.client.connect_address = connect.clone();
    }
    if let Err(errors) = validate_config(&config) {
        for e in &errors {
            eprintln!("invalid configuration: {}", e);
        }
        return Err("invalid configuration".into());
    }

    logging::init_logging(&config.observability);
    tracing::info!("agent-builder v0.1.0 starting");

    let serve = cli.listen.is_some();
    let dial = !config.client.connect_address.is_empty();
    if !serve && !dial {
        tracing::error!("Nothing to do: pass --listen and/or --connect");
        return Err("no role selected".into());
    }

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let codecs = codecs()?;
    let shutdown = Shutdown::new();
    let mut roles = tokio::task::JoinSet::new();

    if serve {
        let server = Server::bind(
            &config.listener,
            config.connection.clone(),
            Arc::clone(&codecs),
        )
        .await?;
        tracing::info!(address = %server.local_addr()?, "Listening for connections");

        let stop = shutdown.subscribe();
        roles.spawn(async move {
            server
                .serve_with_shutdown(server_handler, stop)
                .await
                .map_err(BoxError::from)
        });
    }

    if dial {
        let client = Client::new(config.client.connect_address.clone(), Arc::clone(&codecs))
            .with_config(config.client.clone(), config.connection.clone());
        let mut stop = shutdown.subscribe();
        roles.spawn(async move {
            tokio::select! {
                result = client.run(client_handler) => result.map_err(BoxError::from),
                _ = stop.recv() => Ok(()),
            }
        });
    }

    tokio::spawn(shutdown_on_ctrl_c(shutdown.clone()));

    let mut failed = false;
    while let Some(joined) = roles.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Agent role failed");
                failed = true;
            }
            Err(e) => {
                tracing::error!(error = %e, "Agent role panicked");
                failed = true;
            }
        }
    }

    tracing::info!("Shutdown complete");
    if failed {
        return Err("agent exited with errors".into());
    }
    Ok(())
}
