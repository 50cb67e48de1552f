//! Actuation Module
//!
//! Sinks that accept the arbiter's decision once per tick and turn it into
//! motor line states.

#[cfg(feature = "gpio-hardware")]
mod gpio;
mod lines;
mod log_sink;

#[cfg(feature = "gpio-hardware")]
pub use gpio::GpioSink;
pub use lines::MotorLines;
pub use log_sink::LogSink;

use crate::config::{ActuationConfig, SinkKind};
use anyhow::Result;
use async_trait::async_trait;
use rover_shared::Command;

/// Boundary accepting the resolved command for execution
#[async_trait]
pub trait ActuationSink: Send {
    /// Apply a command. Must be idempotent: repeating a command changes nothing.
    async fn apply(&mut self, command: Command) -> Result<()>;

    /// Human-readable name for this sink
    fn name(&self) -> &'static str;
}

/// Create the sink selected by the configuration
pub fn build_sink(config: &ActuationConfig) -> Result<Box<dyn ActuationSink>> {
    match config.sink {
        SinkKind::Log => Ok(Box::new(LogSink::new())),
        #[cfg(feature = "gpio-hardware")]
        SinkKind::Gpio => Ok(Box::new(GpioSink::new(&config.pins)?)),
        #[cfg(not(feature = "gpio-hardware"))]
        SinkKind::Gpio => Err(anyhow::anyhow!(
            "GPIO sink requires the gpio-hardware feature"
        )),
    }
}
