//! Rover Shared Types
//!
//! This crate provides the command vocabulary, the arbitration policy and the
//! MQTT codec and packet streams shared between the on-board arbiter and the
//! operator console.

pub mod codec;
pub mod state_machine;
pub mod stream;

use std::fmt;

/// Well-known topic names
pub mod topics {
    /// Commands from the autonomous controller
    pub const AUTOMATIC_COMMAND: &str = "robot/automatic_command";

    /// Commands from the human override
    pub const MANUAL_COMMAND: &str = "robot/manual_command";
}

/// Timing parameters for the arbiter
pub mod timing {
    /// Arbiter tick period in milliseconds
    pub const TICK_PERIOD_MS: u64 = 100;

    /// How long a manual command keeps priority over automatic input
    pub const MANUAL_WINDOW_MS: u64 = 1000;

    /// Total silence after which the watchdog forces a stop
    pub const STALE_WINDOW_MS: u64 = 1000;
}

/// Motion command vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Forward,
    Backward,
    Left,
    Right,
    Stop,
    /// Payload that did not map to any known command
    Unknown,
}

impl Command {
    /// All commands, in declaration order
    pub const ALL: [Command; 6] = [
        Command::Forward,
        Command::Backward,
        Command::Left,
        Command::Right,
        Command::Stop,
        Command::Unknown,
    ];

    /// Decode a raw message payload. Never fails; anything unrecognized is `Unknown`.
    pub fn from_payload(payload: &[u8]) -> Self {
        match std::str::from_utf8(payload) {
            Ok(text) => Self::from_name(text),
            Err(_) => Command::Unknown,
        }
    }

    /// Decode a command name, ignoring surrounding whitespace and case
    pub fn from_name(name: &str) -> Self {
        let name = name.trim().to_ascii_lowercase();
        match name.as_str() {
            "forward" | "move_forward" => Command::Forward,
            "backward" | "move_backward" => Command::Backward,
            "left" | "turn_left" => Command::Left,
            "right" | "turn_right" => Command::Right,
            "stop" => Command::Stop,
            _ => Command::Unknown,
        }
    }

    /// Canonical wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Forward => "forward",
            Command::Backward => "backward",
            Command::Left => "left",
            Command::Right => "right",
            Command::Stop => "stop",
            Command::Unknown => "unknown",
        }
    }

    /// Whether the command asks the robot to move
    pub fn is_motion(&self) -> bool {
        !matches!(self, Command::Stop | Command::Unknown)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a command came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Source {
    Automatic,
    Manual,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Automatic => write!(f, "automatic"),
            Source::Manual => write!(f, "manual"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_payloads() {
        assert_eq!(Command::from_payload(b"forward"), Command::Forward);
        assert_eq!(Command::from_payload(b"move_forward"), Command::Forward);
        assert_eq!(Command::from_payload(b"backward"), Command::Backward);
        assert_eq!(Command::from_payload(b"left"), Command::Left);
        assert_eq!(Command::from_payload(b"right"), Command::Right);
        assert_eq!(Command::from_payload(b"stop"), Command::Stop);
    }

    #[test]
    fn test_payload_normalization() {
        assert_eq!(Command::from_payload(b"  Forward\n"), Command::Forward);
        assert_eq!(Command::from_payload(b"STOP"), Command::Stop);
    }

    #[test]
    fn test_unrecognized_payloads() {
        assert_eq!(Command::from_payload(b""), Command::Unknown);
        assert_eq!(Command::from_payload(b"jump"), Command::Unknown);
        assert_eq!(Command::from_payload(&[0xff, 0xfe, 0x00]), Command::Unknown);
    }

    #[test]
    fn test_wire_names_decode_to_themselves() {
        for command in Command::ALL {
            if command == Command::Unknown {
                continue;
            }
            assert_eq!(Command::from_name(command.as_str()), command);
        }
    }

    #[test]
    fn test_motion_commands() {
        assert!(Command::Left.is_motion());
        assert!(!Command::Stop.is_motion());
        assert!(!Command::Unknown.is_motion());
    }
}
