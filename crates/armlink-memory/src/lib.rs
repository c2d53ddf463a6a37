//! `armlink-memory` – durable record of what the robot was told to do.
//!
//! # Modules
//!
//! - [`action_log`] – [`ActionLog`][action_log::ActionLog]: append-only JSON
//!   Lines file holding one [`LogEntry`][action_log::LogEntry] per accepted
//!   action, in arrival order.

pub mod action_log;

pub use action_log::{ActionLog, ActionLogError, LogEntry, DEFAULT_LOG_PATH};
