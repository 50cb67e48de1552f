mod actuation;
mod arbiter;
mod command;
mod config;
mod connection;
mod transport;

use anyhow::{Context, Result};
use arbiter::{Arbiter, ArbiterSettings, CommandStore};
use clap::Parser;
use command::{CommandRouter, RouteOutcome};
use config::{ArbiterConfig, SinkKind};
use connection::{BrokerConnection, ConnectionEvent};
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Command arbiter for a two-source teleoperated rover
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Broker host
    #[arg(long)]
    host: Option<String>,

    /// Broker port
    #[arg(long)]
    port: Option<u16>,

    /// Arbitration tick period in milliseconds
    #[arg(long)]
    tick_ms: Option<u64>,

    /// Manual priority window in milliseconds
    #[arg(long)]
    manual_window_ms: Option<u64>,

    /// Silence after which the rover is stopped, in milliseconds
    #[arg(long)]
    stale_window_ms: Option<u64>,

    /// Actuation backend
    #[arg(long, value_enum)]
    sink: Option<SinkKind>,
}

impl Args {
    /// File (or defaults) with flags applied on top
    fn resolve_config(&self) -> Result<ArbiterConfig> {
        let mut config = match &self.config {
            Some(path) => ArbiterConfig::load(path)?,
            None => ArbiterConfig::default(),
        };

        if let Some(host) = &self.host {
            config.broker.host = host.clone();
        }
        if let Some(port) = self.port {
            config.broker.port = port;
        }
        if let Some(tick_ms) = self.tick_ms {
            config.timing.tick_period_ms = tick_ms;
        }
        if let Some(window) = self.manual_window_ms {
            config.timing.manual_window_ms = window;
        }
        if let Some(window) = self.stale_window_ms {
            config.timing.stale_window_ms = window;
        }
        if let Some(sink) = self.sink {
            config.actuation.sink = sink;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();
    let config = args.resolve_config()?;

    info!("Rover arbiter starting: client_id={}", config.broker.client_id);
    info!("  Broker: {}", config.broker.address());
    info!(
        "  Topics: automatic={} manual={}",
        config.topics.automatic, config.topics.manual
    );
    info!("  Consumption: {:?}", config.consumption);

    let store = Arc::new(CommandStore::new());
    let router = CommandRouter::new(&config.topics, store.clone());

    let mut conn = BrokerConnection::connect(&config.broker, config.topics.subscriptions())
        .await
        .context("MQTT startup failed")?;
    info!("Subscribed to command topics at {}", conn.broker());

    let sink = actuation::build_sink(&config.actuation)?;
    let arbiter = Arbiter::new(store, ArbiterSettings::from(&config), sink).start();

    // Main event loop
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received, shutting down");
                break;
            }
            event = conn.recv() => match event {
                Some(ConnectionEvent::Message(message)) => {
                    if let RouteOutcome::Recorded { source, command } =
                        router.route(&message.topic, &message.payload, message.received_at)
                    {
                        debug!("Recorded {} command {}", source, command);
                    }
                }
                Some(ConnectionEvent::Connected { broker }) => {
                    info!("Connected to {}", broker);
                }
                Some(ConnectionEvent::Disconnected { reason }) => {
                    let last = arbiter.stats().last.map(|a| a.state.to_string());
                    warn!(
                        "Broker connection lost: {} (arbiter state: {})",
                        reason,
                        last.as_deref().unwrap_or("none")
                    );
                }
                None => {
                    error!("Broker connection closed");
                    break;
                }
            }
        }
    }

    let stats = arbiter.shutdown().await?;
    info!(
        "Arbiter stopped: {} ticks, {} dispatch failures",
        stats.ticks, stats.dispatch_failures
    );

    if let Err(e) = conn.disconnect().await {
        warn!("Disconnect failed: {:#}", e);
    }

    Ok(())
}
