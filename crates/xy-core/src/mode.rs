use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::command::VelocityCommand;

/// Which mapper may write the shared command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMode {
    Manual,
    Autonomous,
}

impl ControlMode {
    pub fn other(self) -> Self {
        match self {
            ControlMode::Manual => ControlMode::Autonomous,
            ControlMode::Autonomous => ControlMode::Manual,
        }
    }
}

impl fmt::Display for ControlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlMode::Manual => f.write_str("MANUAL"),
            ControlMode::Autonomous => f.write_str("AUTONOMOUS"),
        }
    }
}

/// Two-state arbiter. Every transition zeroes the command: entering MANUAL
/// ignores keys still held, entering AUTONOMOUS waits for the next
/// observation.
#[derive(Debug, Clone)]
pub struct ControlModeSwitch {
    command: Arc<VelocityCommand>,
}

impl ControlModeSwitch {
    pub fn new(command: Arc<VelocityCommand>) -> Self {
        Self { command }
    }

    pub fn current(&self) -> ControlMode {
        self.command.mode()
    }

    pub fn toggle(&self) -> ControlMode {
        let (prev, next) = self.command.hand_over(ControlMode::other);
        info!("mode: {} -> {} (command zeroed)", prev, next);
        next
    }

    /// Forces `mode`; zeroes even when it is already active.
    pub fn force(&self, mode: ControlMode) -> ControlMode {
        let (prev, next) = self.command.hand_over(|_| mode);
        if prev != next {
            info!("mode: {} -> {} (forced, command zeroed)", prev, next);
        }
        next
    }
}
