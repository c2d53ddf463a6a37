//! Generic `RobotDriver` trait for whatever executes relayed commands.
//!
//! Drivers implement this trait; the relay pipeline only ever talks to the
//! trait, so a simulated driver and a real controller bridge are
//! interchangeable.

use armlink_types::LinkError;

/// Commands the robot side knows by name.  Anything else is passed through
/// as [`NamedCommand::Other`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamedCommand {
    /// Numeric pose collapsed to a generic move.
    Move,
    GoToGlove,
    /// Return to the neutral pose.
    ResetPose,
    Other(String),
}

impl NamedCommand {
    pub fn parse(token: &str) -> Self {
        match token {
            "move" => NamedCommand::Move,
            "go_to_glove" => NamedCommand::GoToGlove,
            "reset_pose" => NamedCommand::ResetPose,
            other => NamedCommand::Other(other.to_string()),
        }
    }
}

/// A consumer of canonical command tokens.
pub trait RobotDriver: Send {
    /// Stable identifier, e.g. `"sim"` or `"ur10e"`.
    fn id(&self) -> &str;

    /// Execute (or queue) the command named by `token`.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Driver`] if the command cannot be delivered.
    fn send_command(&mut self, token: &str) -> Result<(), LinkError>;
}
