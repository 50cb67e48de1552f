//! Broker connection with automatic reconnection

use super::session::{handshake, is_replay, Session, SessionSettings};
use crate::arbiter::monotonic_now;
use crate::config::BrokerConfig;
use crate::transport::{TcpConnector, TransportConnector, TransportStream};
use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use rover_shared::codec::{Packet, Publish, QoS};
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Events emitted by the broker connection
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// Session established (initially or after a reconnect)
    Connected { broker: String },
    /// Session lost; a reconnect is already scheduled
    Disconnected { reason: String },
    /// Publish received on a subscribed topic
    Message(InboundMessage),
}

/// A publish stamped with its arrival time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
    pub received_at: Instant,
}

enum SessionEnd {
    Shutdown,
    Lost(String),
}

/// Persistent subscription to the command topics
pub struct BrokerConnection {
    broker: String,
    event_rx: mpsc::Receiver<ConnectionEvent>,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl BrokerConnection {
    /// Connect over TCP and subscribe
    ///
    /// Fails if the first session cannot be established; later losses are
    /// retried in the background.
    pub async fn connect(broker: &BrokerConfig, subscriptions: Vec<String>) -> Result<Self> {
        let connector = TcpConnector::new(broker.address(), broker.connect_timeout());
        Self::connect_with(connector, SessionSettings::new(broker, subscriptions)).await
    }

    /// Connect using any transport
    pub async fn connect_with<C>(connector: C, settings: SessionSettings) -> Result<Self>
    where
        C: TransportConnector + 'static,
    {
        let broker = connector.target();
        let session = open_session(&connector, &settings)
            .await
            .with_context(|| format!("Failed to connect to broker at {}", broker))?;

        let (event_tx, event_rx) = mpsc::channel(256);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(connection_loop(connector, settings, session, event_tx, shutdown_rx));

        Ok(Self {
            broker,
            event_rx,
            shutdown_tx,
            task,
        })
    }

    /// Broker address this connection targets
    pub fn broker(&self) -> &str {
        &self.broker
    }

    /// Receive the next connection event
    pub async fn recv(&mut self) -> Option<ConnectionEvent> {
        self.event_rx.recv().await
    }

    /// Send DISCONNECT and stop reconnecting
    pub async fn disconnect(self) -> Result<()> {
        let _ = self.shutdown_tx.send(true);
        // Unblock the loop if it is waiting to deliver an event
        drop(self.event_rx);
        self.task
            .await
            .map_err(|e| anyhow!("Connection task failed: {}", e))
    }
}

async fn open_session<C: TransportConnector>(
    connector: &C,
    settings: &SessionSettings,
) -> Result<Session<C::Stream>> {
    let attempt = async {
        let stream = connector.connect().await?;
        handshake(stream, settings).await
    };
    timeout(settings.handshake_timeout, attempt)
        .await
        .map_err(|_| anyhow!("Timed out after {:?}", settings.handshake_timeout))?
}

/// Main connection loop with reconnection logic
async fn connection_loop<C: TransportConnector>(
    connector: C,
    settings: SessionSettings,
    first: Session<C::Stream>,
    event_tx: mpsc::Sender<ConnectionEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    let broker = connector.target();
    let mut next_session = Some(first);
    let mut reconnect_delay = settings.reconnect_delay;

    loop {
        let session = match next_session.take() {
            Some(session) => session,
            None => {
                let attempt = tokio::select! {
                    biased;
                    _ = shutdown.changed() => return,
                    result = open_session(&connector, &settings) => result,
                };
                match attempt {
                    Ok(session) => {
                        reconnect_delay = settings.reconnect_delay;
                        session
                    }
                    Err(e) => {
                        warn!(
                            "[MQTT] Reconnect to {} failed: {:#}; retrying in {:?}",
                            broker, e, reconnect_delay
                        );
                        tokio::select! {
                            biased;
                            _ = shutdown.changed() => return,
                            _ = tokio::time::sleep(reconnect_delay) => {}
                        }
                        reconnect_delay = std::cmp::min(reconnect_delay * 2, settings.max_reconnect_delay);
                        continue;
                    }
                }
            }
        };

        info!("[MQTT] Connected to broker at {} over {}", broker, connector.name());
        if event_tx
            .send(ConnectionEvent::Connected {
                broker: broker.clone(),
            })
            .await
            .is_err()
        {
            return;
        }

        match run_session(session, &settings, &event_tx, &mut shutdown).await {
            SessionEnd::Shutdown => {
                info!("[MQTT] Disconnected from {}", broker);
                return;
            }
            SessionEnd::Lost(reason) => {
                warn!("[MQTT] Connection to {} lost: {}", broker, reason);
                if event_tx
                    .send(ConnectionEvent::Disconnected { reason })
                    .await
                    .is_err()
                {
                    return;
                }
            }
        }
    }
}

/// Handle an active session until it fails or shutdown is requested
async fn run_session<S: TransportStream>(
    session: Session<S>,
    settings: &SessionSettings,
    event_tx: &mpsc::Sender<ConnectionEvent>,
    shutdown: &mut watch::Receiver<bool>,
) -> SessionEnd {
    let Session {
        mut reader,
        mut writer,
        pending,
    } = session;

    for publish in pending {
        if forward(event_tx, publish).await.is_err() {
            return SessionEnd::Shutdown;
        }
    }

    let mut ping = settings.ping_period().map(|period| {
        let mut ping = interval_at(tokio::time::Instant::now() + period, period);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ping
    });
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            biased;

            _ = shutdown.changed() => {
                if let Err(e) = writer.send(&Packet::Disconnect).await {
                    debug!("[MQTT] DISCONNECT not sent: {}", e);
                }
                let _ = writer.close().await;
                return SessionEnd::Shutdown;
            }

            _ = next_ping(&mut ping) => {
                if awaiting_pong {
                    return SessionEnd::Lost("Broker did not answer PINGREQ".into());
                }
                if let Err(e) = writer.send(&Packet::PingReq).await {
                    return SessionEnd::Lost(format!("Write error: {}", e));
                }
                awaiting_pong = true;
            }

            result = reader.read_packet() => {
                match result {
                    Ok(Packet::Publish(publish)) => {
                        if let (QoS::AtLeastOnce, Some(packet_id)) = (publish.qos, publish.packet_id) {
                            if let Err(e) = writer.send(&Packet::PubAck { packet_id }).await {
                                return SessionEnd::Lost(format!("Write error: {}", e));
                            }
                        }
                        if is_replay(&publish) {
                            continue;
                        }
                        if forward(event_tx, publish).await.is_err() {
                            return SessionEnd::Shutdown;
                        }
                    }
                    Ok(Packet::PingResp) => awaiting_pong = false,
                    Ok(other) => debug!("[MQTT] Ignoring {}", other.name()),
                    Err(e) => return SessionEnd::Lost(e.to_string()),
                }
            }
        }
    }
}

async fn next_ping(ping: &mut Option<Interval>) {
    match ping {
        Some(ping) => {
            ping.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn forward(event_tx: &mpsc::Sender<ConnectionEvent>, publish: Publish) -> Result<()> {
    let message = InboundMessage {
        topic: publish.topic,
        payload: publish.payload,
        received_at: monotonic_now(),
    };
    event_tx
        .send(ConnectionEvent::Message(message))
        .await
        .map_err(|_| anyhow!("Event receiver closed"))
}
