//! [`ActionPipeline`] – what the client does with every decoded action.
//!
//! For each [`RawAction`], in wire order:
//!
//! 1. normalize and submit it to the connection's [`DedupGate`];
//! 2. on *suppress*, publish `ActionSuppressed` and stop;
//! 3. on *accept*, append a [`LogEntry`] to the [`ActionLog`], forward the
//!    command token to the [`RobotDriver`], and convert every detected
//!    object into the robot base frame (published as `BasePoint`).
//!
//! The pipeline owns the per-connection state, so one instance serves
//! exactly one connection.  [`ActionPipeline::drive`] runs it against a
//! [`RelayClient`] and returns the [`SessionReport`] when the server closes.
//!
//! # Example
//!
//! ```rust
//! use armlink_hal::SimDriver;
//! use armlink_kernel::Verdict;
//! use armlink_memory::ActionLog;
//! use armlink_middleware::EventBus;
//! use armlink_perception::CalibrationProfile;
//! use armlink_runtime::pipeline::{ActionPipeline, PipelineConfig};
//! use armlink_types::RawAction;
//!
//! let dir = tempfile::tempdir().unwrap();
//! let mut pipeline = ActionPipeline::new(
//!     CalibrationProfile::default(),
//!     ActionLog::new(dir.path().join("received_actions.jsonl")),
//!     Box::new(SimDriver::new()),
//!     EventBus::default(),
//!     PipelineConfig::default(),
//! );
//!
//! let close = RawAction::pose(&[0.0; 6]).with_gripper(220);
//! assert_eq!(pipeline.process(close.clone()).unwrap(), Verdict::Accept);
//! assert_eq!(pipeline.process(close).unwrap(), Verdict::Suppress);
//! ```

use armlink_hal::RobotDriver;
use armlink_kernel::{DedupGate, Verdict, command_token};
use armlink_memory::{ActionLog, LogEntry};
use armlink_middleware::{EventBus, FrameError, FrameHandler, RelayClient};
use armlink_perception::CalibrationProfile;
use armlink_types::{Detection, LinkError, RawAction, RelayEvent};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

const SOURCE: &str = "armlink-runtime::pipeline";

/// Depth assumed for every detection unless configured otherwise (metres).
pub const DEFAULT_DEPTH_M: f64 = 0.42;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Where the depth for a pixel→base conversion comes from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DepthMode {
    /// The same depth for every object.
    Fixed { meters: f64 },
    /// The detection's own third component.
    Detection,
}

impl DepthMode {
    pub fn depth_for(&self, detection: &Detection) -> f64 {
        match self {
            DepthMode::Fixed { meters } => *meters,
            DepthMode::Detection => detection.z(),
        }
    }
}

impl Default for DepthMode {
    fn default() -> Self {
        DepthMode::Fixed {
            meters: DEFAULT_DEPTH_M,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub depth: DepthMode,
    /// Treat a failed log append as fatal for the connection.
    #[serde(default)]
    pub fail_on_log_error: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Session report
// ─────────────────────────────────────────────────────────────────────────────

/// A detected object placed in the robot base frame.
#[derive(Debug, Clone, PartialEq)]
pub struct LocatedObject {
    pub object: String,
    /// `[u, v, z]` as received.
    pub pixel: [f64; 3],
    pub base: [f64; 3],
}

/// Everything that happened on one connection.
#[derive(Debug, Clone, Default)]
pub struct SessionReport {
    /// Accepted actions that reached the action log, oldest first.
    pub accepted: Vec<LogEntry>,
    /// Accepted and forwarded, but the log append failed.
    pub unlogged: usize,
    pub suppressed: usize,
    pub decode_failures: usize,
    /// Every object placed in the base frame, in arrival order.
    pub located: Vec<LocatedObject>,
    /// Why the connection ended, if not an orderly close.
    pub error: Option<LinkError>,
}

// ─────────────────────────────────────────────────────────────────────────────
// ActionPipeline
// ─────────────────────────────────────────────────────────────────────────────

pub struct ActionPipeline {
    calibration: CalibrationProfile,
    gate: DedupGate,
    log: ActionLog,
    driver: Box<dyn RobotDriver>,
    bus: EventBus,
    config: PipelineConfig,
    history: Vec<LogEntry>,
    unlogged: usize,
    suppressed: usize,
    decode_failures: usize,
    located: Vec<LocatedObject>,
}

impl ActionPipeline {
    pub fn new(
        calibration: CalibrationProfile,
        log: ActionLog,
        driver: Box<dyn RobotDriver>,
        bus: EventBus,
        config: PipelineConfig,
    ) -> Self {
        Self {
            calibration,
            gate: DedupGate::new(),
            log,
            driver,
            bus,
            config,
            history: Vec::new(),
            unlogged: 0,
            suppressed: 0,
            decode_failures: 0,
            located: Vec::new(),
        }
    }

    /// Run one action through dedup, logging, dispatch and localisation.
    ///
    /// # Errors
    ///
    /// - [`LinkError::Driver`] if the driver refuses the command.
    /// - [`LinkError::LogWrite`] if the append fails and
    ///   `fail_on_log_error` is set; otherwise the failure is logged and
    ///   published and processing continues.
    pub fn process(&mut self, raw: RawAction) -> Result<Verdict, LinkError> {
        let admission = self.gate.submit(&raw);
        if !admission.is_accepted() {
            self.suppressed += 1;
            info!(action = %admission.action, "duplicate action suppressed");
            self.bus.emit(
                SOURCE,
                RelayEvent::ActionSuppressed {
                    action: admission.action,
                },
            );
            return Ok(Verdict::Suppress);
        }

        info!(action = %admission.action, "action accepted");
        self.bus.emit(
            SOURCE,
            RelayEvent::ActionAccepted {
                action: admission.action.clone(),
            },
        );

        let entry = LogEntry::accepted(&admission.action, &raw);
        let logged = match self.log.append(&entry) {
            Ok(()) => Some(entry),
            Err(e) => {
                error!(path = %self.log.path().display(), error = %e, "failed to write action log");
                self.bus.emit(
                    SOURCE,
                    RelayEvent::LogWriteFailed {
                        details: e.to_string(),
                    },
                );
                if self.config.fail_on_log_error {
                    return Err(e.into());
                }
                self.unlogged += 1;
                None
            }
        };

        let token = command_token(&admission.action);
        self.driver.send_command(token)?;
        self.bus.emit(
            SOURCE,
            RelayEvent::CommandForwarded {
                token: token.to_string(),
            },
        );

        if let Some(objects) = &raw.objects_detected {
            for (name, detection) in objects {
                self.locate(name, detection);
            }
        }

        self.history.extend(logged);
        Ok(Verdict::Accept)
    }

    fn locate(&mut self, name: &str, detection: &Detection) {
        let depth = self.config.depth.depth_for(detection);
        match self
            .calibration
            .pixel_to_base(detection.u(), detection.v(), depth)
        {
            Ok(base) => {
                let base = base.to_array();
                let pixel = [detection.u(), detection.v(), detection.z()];
                info!(object = %name, x = base[0], y = base[1], z = base[2], "object in base frame");
                self.bus.emit(
                    SOURCE,
                    RelayEvent::BasePoint {
                        object: name.to_string(),
                        pixel,
                        base,
                    },
                );
                self.located.push(LocatedObject {
                    object: name.to_string(),
                    pixel,
                    base,
                });
            }
            Err(e) => warn!(object = %name, error = %e, "cannot place object in base frame"),
        }
    }

    /// Process every frame from `client` until the server closes the
    /// connection (or a fatal error ends it).
    pub fn drive(mut self, client: RelayClient) -> SessionReport {
        let outcome = client.run(&mut self);
        let mut report = self.into_report();
        report.error = outcome.err();
        report
    }

    pub fn into_report(self) -> SessionReport {
        SessionReport {
            accepted: self.history,
            unlogged: self.unlogged,
            suppressed: self.suppressed,
            decode_failures: self.decode_failures,
            located: self.located,
            error: None,
        }
    }
}

impl FrameHandler for ActionPipeline {
    fn on_actions(&mut self, actions: Vec<RawAction>) -> Result<(), LinkError> {
        for raw in actions {
            self.process(raw)?;
        }
        Ok(())
    }

    fn on_decode_error(&mut self, _error: &FrameError) {
        self.decode_failures += 1;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
