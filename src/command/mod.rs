//! Inbound command handling
//!
//! This module handles:
//! - Mapping well-known topics to command sources
//! - Decoding payloads into the command vocabulary
//! - Recording arrivals in the command store

mod router;

pub use router::{CommandRouter, RouteOutcome};
