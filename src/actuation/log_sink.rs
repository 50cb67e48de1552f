//! Logging sink for builds without motor hardware

use super::{ActuationSink, MotorLines};
use anyhow::Result;
use async_trait::async_trait;
use rover_shared::Command;
use tracing::{info, trace};

/// Tracks the line states it would drive and logs every change
#[derive(Debug, Default)]
pub struct LogSink {
    lines: MotorLines,
    last: Option<Command>,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ActuationSink for LogSink {
    async fn apply(&mut self, command: Command) -> Result<()> {
        self.lines = MotorLines::for_command(command);

        if self.last != Some(command) {
            if command.is_motion() {
                info!("[ACTUATION] Processing command: {} {}", command, self.lines);
            } else {
                info!("[ACTUATION] Processing command: {} (motors idle)", command);
            }
            self.last = Some(command);
        } else {
            trace!("[ACTUATION] Holding {}", command);
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}
