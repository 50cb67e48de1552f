//! MQTT session over a transport stream
//!
//! Splits the stream into a packet reader and a packet writer and performs
//! the CONNECT/SUBSCRIBE handshake.

use crate::config::BrokerConfig;
use crate::transport::TransportStream;
use anyhow::{anyhow, bail, Result};
use rover_shared::codec::{connack_reason, Connect, Packet, Publish, QoS, SUBACK_FAILURE};
use rover_shared::stream::{PacketReader, PacketWriter};
use std::time::Duration;
use tokio::io::{ReadHalf, WriteHalf};
use tracing::debug;

/// Packet id used for the single SUBSCRIBE of a session
const SUBSCRIBE_PACKET_ID: u16 = 1;

/// Parameters for establishing and keeping a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    pub client_id: String,
    /// 0 disables keep-alive pings
    pub keep_alive_secs: u16,
    pub subscriptions: Vec<String>,
    /// Limit for CONNECT..SUBACK
    pub handshake_timeout: Duration,
    pub reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
}

impl SessionSettings {
    pub fn new(broker: &BrokerConfig, subscriptions: Vec<String>) -> Self {
        Self {
            client_id: broker.client_id.clone(),
            keep_alive_secs: broker.keep_alive_secs,
            subscriptions,
            handshake_timeout: broker.connect_timeout(),
            reconnect_delay: broker.reconnect_delay(),
            max_reconnect_delay: broker.max_reconnect_delay(),
        }
    }

    /// PINGREQ period: half the keep-alive, so the broker never times us out
    pub fn ping_period(&self) -> Option<Duration> {
        (self.keep_alive_secs > 0).then(|| Duration::from_secs(self.keep_alive_secs as u64) / 2)
    }
}

/// An established MQTT session
pub struct Session<S> {
    pub reader: PacketReader<ReadHalf<S>>,
    pub writer: PacketWriter<WriteHalf<S>>,
    /// Live publishes that arrived before the SUBACK
    pub pending: Vec<Publish>,
}

/// Whether a publish is a retained message replayed by the broker
///
/// Replays carry no issue time, so they are never treated as live commands.
pub fn is_replay(publish: &Publish) -> bool {
    if publish.retain {
        debug!("[MQTT] Dropping retained message on '{}'", publish.topic);
    }
    publish.retain
}

/// Run CONNECT and SUBSCRIBE on a fresh stream
pub async fn handshake<S: TransportStream>(stream: S, settings: &SessionSettings) -> Result<Session<S>> {
    let (read_half, write_half) = tokio::io::split(stream);
    let mut reader = PacketReader::new(read_half);
    let mut writer = PacketWriter::new(write_half);
    let mut pending = Vec::new();

    writer
        .send(&Packet::Connect(Connect {
            client_id: settings.client_id.clone(),
            keep_alive_secs: settings.keep_alive_secs,
            clean_session: true,
        }))
        .await?;

    match reader.read_packet().await? {
        Packet::ConnAck { return_code: 0, .. } => {}
        Packet::ConnAck { return_code, .. } => {
            bail!(
                "Broker refused connection: {} (code {})",
                connack_reason(return_code),
                return_code
            );
        }
        other => bail!("Expected CONNACK, got {}", other.name()),
    }

    if !settings.subscriptions.is_empty() {
        let filters = settings
            .subscriptions
            .iter()
            .map(|topic| (topic.clone(), QoS::AtMostOnce))
            .collect();
        writer
            .send(&Packet::Subscribe {
                packet_id: SUBSCRIBE_PACKET_ID,
                filters,
            })
            .await?;

        loop {
            match reader.read_packet().await? {
                Packet::SubAck {
                    packet_id: SUBSCRIBE_PACKET_ID,
                    return_codes,
                } => {
                    if let Some(i) = return_codes.iter().position(|&code| code == SUBACK_FAILURE) {
                        let topic = settings
                            .subscriptions
                            .get(i)
                            .ok_or_else(|| anyhow!("SUBACK has more codes than topics"))?;
                        bail!("Broker rejected subscription to '{}'", topic);
                    }
                    break;
                }
                Packet::Publish(publish) if is_replay(&publish) => {}
                Packet::Publish(publish) => pending.push(publish),
                other => debug!("[MQTT] Ignoring {} during handshake", other.name()),
            }
        }
    }

    Ok(Session {
        reader,
        writer,
        pending,
    })
}
