//! `armlink-hal` – the robot-driver seam.
//!
//! The relay never talks to actuators itself; it hands canonical command
//! tokens to a [`RobotDriver`][driver::RobotDriver].
//!
//! # Modules
//!
//! - [`driver`] – the [`RobotDriver`][driver::RobotDriver] capability trait
//!   and the [`NamedCommand`][driver::NamedCommand] vocabulary.
//! - [`sim`] – [`SimDriver`][sim::SimDriver]: records every command so the
//!   full stack runs headless in tests and on a bench without a robot.

pub mod driver;
pub mod sim;

pub use driver::{NamedCommand, RobotDriver};
pub use sim::{CommandHistory, SimDriver};
