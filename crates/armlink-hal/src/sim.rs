//! Simulated robot driver for headless runs.
//!
//! [`SimDriver`] accepts every command, logs how the robot would interpret
//! it, and appends it to a shared [`CommandHistory`] that tests (or the
//! operator CLI) can inspect after the driver has been moved into a
//! pipeline.
//!
//! # Example
//!
//! ```rust
//! use armlink_hal::{RobotDriver, SimDriver};
//!
//! let mut driver = SimDriver::new();
//! let history = driver.history();
//!
//! driver.send_command("reset_pose").unwrap();
//! assert_eq!(history.commands(), vec!["reset_pose".to_string()]);
//! ```

use std::sync::{Arc, Mutex};

use armlink_types::LinkError;
use tracing::info;

use crate::driver::{NamedCommand, RobotDriver};

/// Shared, append-only list of tokens a [`SimDriver`] received.
#[derive(Debug, Clone, Default)]
pub struct CommandHistory(Arc<Mutex<Vec<String>>>);

impl CommandHistory {
    /// Snapshot of every token received so far, oldest first.
    pub fn commands(&self) -> Vec<String> {
        match self.0.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.commands().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push(&self, token: &str) {
        let mut guard = match self.0.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.push(token.to_string());
    }
}

/// A driver that records commands instead of moving hardware.  Always
/// succeeds.
#[derive(Debug, Default)]
pub struct SimDriver {
    history: CommandHistory,
}

impl SimDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle on the history; stays valid after the driver is boxed.
    pub fn history(&self) -> CommandHistory {
        self.history.clone()
    }
}

impl RobotDriver for SimDriver {
    fn id(&self) -> &str {
        "sim"
    }

    fn send_command(&mut self, token: &str) -> Result<(), LinkError> {
        match NamedCommand::parse(token) {
            NamedCommand::GoToGlove => info!(driver = "sim", "going to glove position"),
            NamedCommand::Move => info!(driver = "sim", "generic move command (numeric pose not executed)"),
            NamedCommand::ResetPose => info!(driver = "sim", "returning to neutral pose"),
            NamedCommand::Other(name) => info!(driver = "sim", command = %name, "unknown command"),
        }
        self.history.push(token);
        Ok(())
    }
}
