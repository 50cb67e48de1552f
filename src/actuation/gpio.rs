//! Raspberry Pi GPIO sink
//!
//! Drives the four H-bridge inputs directly. Every line is pulled low when
//! the sink is created and again when it is dropped.

use super::{ActuationSink, MotorLines};
use crate::config::MotorPins;
use anyhow::{Context, Result};
use async_trait::async_trait;
use rover_shared::Command;
use rppal::gpio::{Gpio, Level, OutputPin};
use tracing::{debug, info};

pub struct GpioSink {
    /// L-fwd, L-bwd, R-fwd, R-bwd
    pins: [OutputPin; 4],
    lines: MotorLines,
}

impl GpioSink {
    /// Claim the motor pins (BCM numbering)
    pub fn new(pins: &MotorPins) -> Result<Self> {
        let gpio = Gpio::new().context("Failed to open GPIO")?;
        let open = |pin: u8| -> Result<OutputPin> {
            let pin = gpio
                .get(pin)
                .with_context(|| format!("GPIO pin {} unavailable", pin))?;
            Ok(pin.into_output_low())
        };

        let [lf, lb, rf, rb] = pins.as_array();
        let sink = Self {
            pins: [open(lf)?, open(lb)?, open(rf)?, open(rb)?],
            lines: MotorLines::ALL_LOW,
        };
        info!(
            "[ACTUATION] GPIO motor lines ready: L-fwd={} L-bwd={} R-fwd={} R-bwd={}",
            lf, lb, rf, rb
        );
        Ok(sink)
    }

    fn write(&mut self, lines: MotorLines) {
        for (pin, high) in self.pins.iter_mut().zip(lines.as_array()) {
            pin.write(if high { Level::High } else { Level::Low });
        }
        self.lines = lines;
    }
}

#[async_trait]
impl ActuationSink for GpioSink {
    async fn apply(&mut self, command: Command) -> Result<()> {
        let lines = MotorLines::for_command(command);
        if lines != self.lines {
            debug!("[ACTUATION] {} -> {}", command, lines);
        }
        self.write(lines);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "gpio"
    }
}

impl Drop for GpioSink {
    fn drop(&mut self) {
        self.write(MotorLines::ALL_LOW);
    }
}
