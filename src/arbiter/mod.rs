//! Arbiter Module
//!
//! Shared command store plus the periodic loop that turns its contents into
//! one actuation decision per tick.

mod runner;
mod store;

pub use runner::{Arbiter, ArbiterHandle, ArbiterSettings, ArbiterStats};
pub use store::CommandStore;

use std::time::Instant;

/// Monotonic timestamp used for arrivals and ticks
///
/// Read through tokio's clock so paused-time tests see the same clock as the loop.
pub fn monotonic_now() -> Instant {
    tokio::time::Instant::now().into_std()
}
