//! Operator console
//!
//! Reads single-key commands from stdin and publishes them to the broker,
//! on the manual topic by default.

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use rover_shared::codec::{connack_reason, Connect, Packet, Publish};
use rover_shared::stream::{PacketReader, PacketWriter};
use rover_shared::{topics, Command};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const KEYS_HELP: &str = "w=forward a=left s=backward d=right x/space=stop q=quit";

/// Topic the console publishes on
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Role {
    Manual,
    Automatic,
}

impl Role {
    fn topic(self) -> &'static str {
        match self {
            Role::Manual => topics::MANUAL_COMMAND,
            Role::Automatic => topics::AUTOMATIC_COMMAND,
        }
    }
}

/// Publish rover commands from the keyboard
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Broker host
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Broker port
    #[arg(long, default_value_t = 1883)]
    port: u16,

    /// Which command source to act as
    #[arg(long, value_enum, default_value_t = Role::Manual)]
    source: Role,

    /// Republish the last command every N milliseconds
    #[arg(long)]
    repeat_ms: Option<u64>,

    /// MQTT client id
    #[arg(long, default_value = "robot_teleop")]
    client_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Input {
    Send(Command),
    Quit,
    Invalid(String),
}

/// Map a console line to an action; empty lines are ignored
fn parse_input(line: &str) -> Option<Input> {
    let line = line.trim_end_matches(['\r', '\n']);
    if !line.is_empty() && line.chars().all(|c| c == ' ') {
        return Some(Input::Send(Command::Stop));
    }
    let line = line.trim().to_ascii_lowercase();
    let input = match line.as_str() {
        "" => return None,
        "q" | "quit" => Input::Quit,
        "w" => Input::Send(Command::Forward),
        "s" => Input::Send(Command::Backward),
        "a" => Input::Send(Command::Left),
        "d" => Input::Send(Command::Right),
        "x" => Input::Send(Command::Stop),
        other => match Command::from_name(other) {
            Command::Unknown => Input::Invalid(other.to_string()),
            command => Input::Send(command),
        },
    };
    Some(input)
}

async fn publish<W>(writer: &mut PacketWriter<W>, topic: &str, command: Command) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer
        .send(&Packet::Publish(Publish::new(topic, command.as_str())))
        .await?;
    Ok(())
}

async fn disconnect<W>(writer: &mut PacketWriter<W>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.send(&Packet::Disconnect).await?;
    writer.close().await?;
    Ok(())
}

/// CONNECT and wait for the broker to accept
async fn handshake<S>(stream: S, client_id: &str) -> Result<(PacketReader<ReadHalf<S>>, PacketWriter<WriteHalf<S>>)>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let mut inbound = PacketReader::new(read_half);
    let mut outbound = PacketWriter::new(write_half);

    outbound
        .send(&Packet::Connect(Connect {
            client_id: client_id.to_string(),
            // The console is idle most of the time; no keep-alive
            keep_alive_secs: 0,
            clean_session: true,
        }))
        .await?;

    match inbound.read_packet().await? {
        Packet::ConnAck { return_code: 0, .. } => Ok((inbound, outbound)),
        Packet::ConnAck { return_code, .. } => bail!(
            "Broker refused connection: {} (code {})",
            connack_reason(return_code),
            return_code
        ),
        other => bail!("Expected CONNACK, got {}", other.name()),
    }
}

async fn next_repeat(repeat: &mut Option<Interval>) {
    match repeat {
        Some(repeat) => {
            repeat.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();
    let address = format!("{}:{}", args.host, args.port);
    let topic = args.source.topic();

    let stream = TcpStream::connect(&address)
        .await
        .with_context(|| format!("Failed to connect to broker at {}", address))?;
    stream.set_nodelay(true)?;
    let (mut inbound, mut outbound) = handshake(stream, &args.client_id).await?;

    info!("[MQTT] Connected to {} as {}, publishing to {}", address, args.client_id, topic);
    println!("{}", KEYS_HELP);

    let mut repeat = args.repeat_ms.filter(|ms| *ms > 0).map(|ms| {
        let mut repeat = interval(Duration::from_millis(ms));
        repeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        repeat
    });
    let mut last: Option<Command> = None;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match parse_input(&line) {
                    Some(Input::Send(command)) => {
                        publish(&mut outbound, topic, command).await?;
                        info!("Published {} to {}", command, topic);
                        last = Some(command);
                    }
                    Some(Input::Quit) => break,
                    Some(Input::Invalid(text)) => warn!("Unrecognized input '{}' ({})", text, KEYS_HELP),
                    None => {}
                }
            }

            _ = next_repeat(&mut repeat) => {
                if let Some(command) = last {
                    publish(&mut outbound, topic, command).await?;
                    debug!("Republished {}", command);
                }
            }

            packet = inbound.read_packet() => {
                let packet = packet?;
                debug!("[MQTT] Ignoring {}", packet.name());
            }
        }
    }

    disconnect(&mut outbound).await?;
    info!("[MQTT] Disconnected");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[test]
    fn test_keys() {
        assert_eq!(parse_input("w"), Some(Input::Send(Command::Forward)));
        assert_eq!(parse_input("a"), Some(Input::Send(Command::Left)));
        assert_eq!(parse_input("s"), Some(Input::Send(Command::Backward)));
        assert_eq!(parse_input("d"), Some(Input::Send(Command::Right)));
        assert_eq!(parse_input("X\n"), Some(Input::Send(Command::Stop)));
        assert_eq!(parse_input("q"), Some(Input::Quit));
    }

    #[test]
    fn test_space_stops() {
        assert_eq!(parse_input(" "), Some(Input::Send(Command::Stop)));
        assert_eq!(parse_input("   \n"), Some(Input::Send(Command::Stop)));
    }

    #[test]
    fn test_full_names_and_garbage() {
        assert_eq!(parse_input("move_forward"), Some(Input::Send(Command::Forward)));
        assert_eq!(parse_input(" Right "), Some(Input::Send(Command::Right)));
        assert_eq!(parse_input("jump"), Some(Input::Invalid("jump".into())));
        assert_eq!(parse_input(""), None);
        assert_eq!(parse_input("\t"), None);
    }

    #[test]
    fn test_role_topics() {
        assert_eq!(Role::Manual.topic(), "robot/manual_command");
        assert_eq!(Role::Automatic.topic(), "robot/automatic_command");
    }

    #[tokio::test]
    async fn test_publishes_canonical_names() {
        let (client, server) = duplex(4096);
        let broker = tokio::spawn(async move {
            let (r, w) = tokio::io::split(server);
            let (mut inbound, mut outbound) = (PacketReader::new(r), PacketWriter::new(w));
            let connect = inbound.read_packet().await.unwrap();
            assert!(matches!(connect, Packet::Connect(ref c) if c.client_id == "console"));
            outbound
                .send(&Packet::ConnAck { session_present: false, return_code: 0 })
                .await
                .unwrap();

            let mut received = Vec::new();
            loop {
                match inbound.read_packet().await.unwrap() {
                    Packet::Publish(publish) => received.push((publish.topic, publish.payload)),
                    Packet::Disconnect => break,
                    other => panic!("unexpected {}", other.name()),
                }
            }
            received
        });

        let (_inbound, mut outbound) = handshake(client, "console").await.unwrap();
        publish(&mut outbound, Role::Manual.topic(), Command::Left).await.unwrap();
        publish(&mut outbound, Role::Manual.topic(), Command::Stop).await.unwrap();
        disconnect(&mut outbound).await.unwrap();

        let received = broker.await.unwrap();
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].0, "robot/manual_command");
        assert_eq!(&received[0].1[..], b"left");
        assert_eq!(&received[1].1[..], b"stop");
    }

    #[tokio::test]
    async fn test_refused_connection() {
        let (client, server) = duplex(4096);
        tokio::spawn(async move {
            let (r, w) = tokio::io::split(server);
            let mut inbound = PacketReader::new(r);
            let mut outbound = PacketWriter::new(w);
            inbound.read_packet().await.unwrap();
            outbound
                .send(&Packet::ConnAck { session_present: false, return_code: 4 })
                .await
                .unwrap();
            (inbound, outbound)
        });

        let err = handshake(client, "console").await.err().expect("handshake should fail");
        assert!(err.to_string().contains("bad user name or password"));
    }
}
