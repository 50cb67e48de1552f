//! Motor line truth table

use rover_shared::Command;
use std::fmt;

/// States of the four H-bridge input lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MotorLines {
    pub left_forward: bool,
    pub left_backward: bool,
    pub right_forward: bool,
    pub right_backward: bool,
}

impl MotorLines {
    /// Every line low; both motors coast
    pub const ALL_LOW: Self = Self {
        left_forward: false,
        left_backward: false,
        right_forward: false,
        right_backward: false,
    };

    /// Line states for a command. `Stop` and `Unknown` drive everything low.
    pub fn for_command(command: Command) -> Self {
        let (left_forward, left_backward, right_forward, right_backward) = match command {
            Command::Forward => (true, false, true, false),
            Command::Backward => (false, true, false, true),
            Command::Left => (false, true, true, false),
            Command::Right => (true, false, false, true),
            Command::Stop | Command::Unknown => return Self::ALL_LOW,
        };
        Self {
            left_forward,
            left_backward,
            right_forward,
            right_backward,
        }
    }

    /// Lines in wiring order: L-fwd, L-bwd, R-fwd, R-bwd
    pub fn as_array(&self) -> [bool; 4] {
        [
            self.left_forward,
            self.left_backward,
            self.right_forward,
            self.right_backward,
        ]
    }
}

impl fmt::Display for MotorLines {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [lf, lb, rf, rb] = self.as_array().map(u8::from);
        write!(f, "L[{} {}] R[{} {}]", lf, lb, rf, rb)
    }
}
