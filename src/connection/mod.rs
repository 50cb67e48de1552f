//! Broker connection
//!
//! This module handles:
//! - The MQTT session handshake and packet I/O
//! - Keep-alive pings
//! - Automatic reconnection with exponential backoff

mod manager;
mod session;

pub use manager::{BrokerConnection, ConnectionEvent, InboundMessage};

