//! Runtime configuration
//!
//! Loaded from an optional TOML file; every field has a default so a file
//! only needs the values it changes. Command-line flags are applied on top
//! in `main`.

use anyhow::{bail, Context, Result};
use rover_shared::state_machine::ArbitrationWindows;
use rover_shared::{timing, topics};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Broker connection settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    /// MQTT keep-alive; 0 disables pings
    pub keep_alive_secs: u16,
    pub connect_timeout_ms: u64,
    /// Reconnection delay (initial)
    pub reconnect_delay_ms: u64,
    /// Maximum reconnection delay
    pub max_reconnect_delay_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            client_id: "robot_client".into(),
            keep_alive_secs: 60,
            connect_timeout_ms: 5000,
            reconnect_delay_ms: 1000,
            max_reconnect_delay_ms: 30_000,
        }
    }
}

impl BrokerConfig {
    /// `host:port` connection target
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn max_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.max_reconnect_delay_ms)
    }
}

/// Topics carrying each command source
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TopicConfig {
    pub automatic: String,
    pub manual: String,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            automatic: topics::AUTOMATIC_COMMAND.into(),
            manual: topics::MANUAL_COMMAND.into(),
        }
    }
}

impl TopicConfig {
    /// Topics to subscribe to
    pub fn subscriptions(&self) -> Vec<String> {
        vec![self.automatic.clone(), self.manual.clone()]
    }
}

/// Arbiter cadence and time windows
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub tick_period_ms: u64,
    pub manual_window_ms: u64,
    pub stale_window_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            tick_period_ms: timing::TICK_PERIOD_MS,
            manual_window_ms: timing::MANUAL_WINDOW_MS,
            stale_window_ms: timing::STALE_WINDOW_MS,
        }
    }
}

impl TimingConfig {
    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_period_ms)
    }

    pub fn windows(&self) -> ArbitrationWindows {
        ArbitrationWindows {
            manual: Duration::from_millis(self.manual_window_ms),
            stale: Duration::from_millis(self.stale_window_ms),
        }
    }
}

/// What the arbiter does with a slot after dispatching from it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumptionPolicy {
    /// Keep the last command until superseded or stale
    #[default]
    Latch,
    /// Clear the authoritative slot after each dispatch
    ConsumeOnDispatch,
}

/// Actuation backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    /// Log decisions only
    #[default]
    Log,
    /// Raspberry Pi GPIO motor lines
    Gpio,
}

/// BCM pin numbers of the four motor lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MotorPins {
    pub left_forward: u8,
    pub left_backward: u8,
    pub right_forward: u8,
    pub right_backward: u8,
}

impl Default for MotorPins {
    fn default() -> Self {
        // wiringPi 0-3
        Self {
            left_forward: 17,
            left_backward: 18,
            right_forward: 27,
            right_backward: 22,
        }
    }
}

impl MotorPins {
    /// Pins in line order: L-fwd, L-bwd, R-fwd, R-bwd
    pub fn as_array(&self) -> [u8; 4] {
        [
            self.left_forward,
            self.left_backward,
            self.right_forward,
            self.right_backward,
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct ActuationConfig {
    pub sink: SinkKind,
    pub pins: MotorPins,
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct ArbiterConfig {
    pub broker: BrokerConfig,
    pub topics: TopicConfig,
    pub timing: TimingConfig,
    pub consumption: ConsumptionPolicy,
    pub actuation: ActuationConfig,
}

impl ArbiterConfig {
    /// Parse a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).context("Invalid configuration")
    }

    /// Load a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&text)
    }

    /// Reject configurations the arbiter cannot run safely with
    pub fn validate(&self) -> Result<()> {
        if self.broker.host.is_empty() {
            bail!("broker.host must not be empty");
        }
        if self.broker.port == 0 {
            bail!("broker.port must not be 0");
        }

        let timing = &self.timing;
        if timing.tick_period_ms == 0 {
            bail!("timing.tick_period_ms must be positive");
        }
        if timing.manual_window_ms == 0 || timing.stale_window_ms == 0 {
            bail!("timing windows must be positive");
        }
        if timing.tick_period_ms >= timing.stale_window_ms {
            bail!(
                "tick period ({} ms) must be shorter than the stale window ({} ms)",
                timing.tick_period_ms,
                timing.stale_window_ms
            );
        }

        if self.topics.automatic.is_empty() || self.topics.manual.is_empty() {
            bail!("command topics must not be empty");
        }
        if self.topics.automatic == self.topics.manual {
            bail!("automatic and manual topics must differ");
        }

        let pins = self.actuation.pins.as_array();
        for (i, pin) in pins.iter().enumerate() {
            if pins[i + 1..].contains(pin) {
                bail!("motor pin {} is assigned to more than one line", pin);
            }
        }

        if self.actuation.sink == SinkKind::Gpio && !cfg!(feature = "gpio-hardware") {
            bail!("GPIO sink requested but built without the gpio-hardware feature");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ArbiterConfig::default();
        assert_eq!(config.broker.address(), "localhost:1883");
        assert_eq!(config.timing.tick_period(), Duration::from_millis(100));
        assert_eq!(config.timing.windows(), ArbitrationWindows::default());
        assert_eq!(config.consumption, ConsumptionPolicy::Latch);
        assert_eq!(config.actuation.pins.as_array(), [17, 18, 27, 22]);
        config.validate().expect("defaults must validate");
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = ArbiterConfig::from_toml_str(
            r#"
            consumption = "consume_on_dispatch"

            [broker]
            host = "10.0.0.5"

            [timing]
            manual_window_ms = 1500
            "#,
        )
        .expect("parse failed");

        assert_eq!(config.broker.host, "10.0.0.5");
        assert_eq!(config.broker.port, 1883);
        assert_eq!(config.timing.manual_window_ms, 1500);
        assert_eq!(config.timing.stale_window_ms, timing::STALE_WINDOW_MS);
        assert_eq!(config.consumption, ConsumptionPolicy::ConsumeOnDispatch);
    }

    #[test]
    fn test_unknown_policy_rejected() {
        assert!(ArbiterConfig::from_toml_str("consumption = \"sometimes\"").is_err());
    }

    #[test]
    fn test_zero_tick_rejected() {
        let mut config = ArbiterConfig::default();
        config.timing.tick_period_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_tick_must_be_shorter_than_stale_window() {
        let mut config = ArbiterConfig::default();
        config.timing.tick_period_ms = config.timing.stale_window_ms;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_topics_must_differ() {
        let mut config = ArbiterConfig::default();
        config.topics.manual = config.topics.automatic.clone();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_pins_rejected() {
        let mut config = ArbiterConfig::default();
        config.actuation.pins.right_backward = config.actuation.pins.left_forward;
        assert!(config.validate().is_err());
    }

    #[cfg(not(feature = "gpio-hardware"))]
    #[test]
    fn test_gpio_sink_requires_feature() {
        let mut config = ArbiterConfig::default();
        config.actuation.sink = SinkKind::Gpio;
        assert!(config.validate().is_err());
    }
}
