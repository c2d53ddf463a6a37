//! `armlink-types` – the shared data model of the relay.
//!
//! Everything that crosses a crate boundary lives here: the [`RawAction`]
//! records produced by the perception server, their reduced
//! [`CanonicalAction`] form, the [`Turn`] batches sent per control step, the
//! [`Event`]s published on the telemetry bus, and the workspace-wide
//! [`LinkError`].

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

/// A detected object's centroid: pixel-x, pixel-y and a raw depth/size
/// scalar whose meaning depends on the detector.
///
/// Travels on the wire as a three-element array `[u, v, z]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Detection(pub f64, pub f64, pub f64);

impl Detection {
    pub fn u(&self) -> f64 {
        self.0
    }

    pub fn v(&self) -> f64 {
        self.1
    }

    pub fn z(&self) -> f64 {
        self.2
    }
}

/// One action record as produced by the perception/LLM server.
///
/// Only `pos_end_effector`, `gripper` and `objects_detected` are interpreted
/// by the relay; every other field (`action_id`, `step`, `user_command`,
/// timestamps, …) is carried through untouched in [`RawAction::metadata`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RawAction {
    /// A numeric pose (`[x, y, z, rx, ry, rz]`), a named command such as
    /// `"reset_pose"`, or `null`.
    #[serde(default)]
    pub pos_end_effector: Value,

    /// Robot-specific gripper control code (`220` closes, `30` opens).
    #[serde(default)]
    #[schemars(with = "Option<i64>")]
    pub gripper: Value,

    /// Object name → `[u, v, z]` centroid in image space.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub objects_detected: Option<BTreeMap<String, Detection>>,

    /// Passthrough metadata.
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

impl RawAction {
    /// Build an action that carries a numeric end-effector pose.
    pub fn pose(pose: &[f64]) -> Self {
        Self {
            pos_end_effector: Value::Array(pose.iter().map(|v| Value::from(*v)).collect()),
            ..Self::default()
        }
    }

    /// Build an action that carries a named command (e.g. `"reset_pose"`).
    pub fn named(command: impl Into<String>) -> Self {
        Self {
            pos_end_effector: Value::String(command.into()),
            ..Self::default()
        }
    }

    /// Set the gripper code (builder-style).
    pub fn with_gripper(mut self, code: i64) -> Self {
        self.gripper = Value::from(code);
        self
    }

    /// Attach a detected object centroid (builder-style).
    pub fn with_detection(mut self, name: impl Into<String>, detection: Detection) -> Self {
        self.objects_detected
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), detection);
        self
    }
}

/// Return the JSON Schema describing a [`RawAction`], for upstream action
/// generators that need to constrain their output.
pub fn raw_action_schema() -> schemars::schema::RootSchema {
    schemars::schema_for!(RawAction)
}

/// Reduced gripper state used for deduplication and command dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GripperState {
    Close,
    Open,
    Unknown,
}

impl GripperState {
    pub fn as_str(&self) -> &'static str {
        match self {
            GripperState::Close => "close",
            GripperState::Open => "open",
            GripperState::Unknown => "unknown",
        }
    }
}

impl fmt::Display for GripperState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The comparable form of a [`RawAction`].
///
/// Two canonical actions are equal iff both fields match exactly; metadata
/// and detections never take part in the comparison.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CanonicalAction {
    /// `"move"` for numeric poses, otherwise the named command (or `"None"`).
    pub pos_end_effector: String,
    pub gripper: GripperState,
}

impl fmt::Display for CanonicalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.pos_end_effector, self.gripper)
    }
}

/// One server control turn: the operator command that produced it and the
/// actions sent to the client as a single frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_command: Option<String>,
    pub actions: Vec<RawAction>,
}

impl Turn {
    pub fn new(actions: Vec<RawAction>) -> Self {
        Self {
            user_command: None,
            actions,
        }
    }

    pub fn with_user_command(mut self, command: impl Into<String>) -> Self {
        self.user_command = Some(command.into());
        self
    }
}

/// Unified event wrapper for the telemetry bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g. `"armlink-middleware::server"`
    pub source: String,
    pub payload: RelayEvent,
}

impl Event {
    /// Wrap `payload` with a fresh id and the current UTC time.
    pub fn new(source: impl Into<String>, payload: RelayEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Every observable relay outcome. None of them is silent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RelayEvent {
    Connected { peer: String },
    Rejected { peer: String },
    Disconnected { peer: String, reason: String },
    TurnSent { peer: String, actions: usize },
    ActionAccepted { action: CanonicalAction },
    ActionSuppressed { action: CanonicalAction },
    CommandForwarded { token: String },
    /// A detection converted into the robot base frame.
    BasePoint {
        object: String,
        pixel: [f64; 3],
        base: [f64; 3],
    },
    DecodeFailed { details: String },
    LogWriteFailed { details: String },
    /// Operator-initiated stop (Ctrl-C).
    Shutdown { reason: String },
}

/// Workspace-wide error type spanning transport, decoding, access control,
/// calibration, persistence, and driver failures.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LinkError {
    #[error("Transport Error: {0}")]
    Transport(String),

    #[error("Decode Error: {0}")]
    Decode(String),

    #[error("Connection Rejected: {peer} is not on the allow-list")]
    Rejected { peer: String },

    #[error("Calibration Error: {0}")]
    Calibration(String),

    #[error("Action Log Write Error: {0}")]
    LogWrite(String),

    #[error("Robot Driver Error on {component}: {details}")]
    Driver { component: String, details: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn raw_action_parses_full_record() {
        let raw: RawAction = serde_json::from_value(json!({
            "pos_end_effector": [0.1, 0.2, 0.3, 0.0, 0.0, 0.0],
            "gripper": 220,
            "objects_detected": {"cup": [640, 360, 0.42]},
            "action_id": "ab12cd34",
            "step": 1
        }))
        .unwrap();

        assert!(raw.pos_end_effector.is_array());
        assert_eq!(raw.gripper, json!(220));
        let cup = raw.objects_detected.as_ref().unwrap()["cup"];
        assert_eq!(cup, Detection(640.0, 360.0, 0.42));
        assert_eq!(raw.metadata["action_id"], json!("ab12cd34"));
        assert_eq!(raw.metadata["step"], json!(1));
    }

    #[test]
    fn raw_action_missing_fields_default_to_null() {
        let raw: RawAction = serde_json::from_str(r#"{"user_command":"pick the cup"}"#).unwrap();
        assert!(raw.pos_end_effector.is_null());
        assert!(raw.gripper.is_null());
        assert!(raw.objects_detected.is_none());
        assert_eq!(raw.metadata.len(), 1);
    }

    #[test]
    fn detection_must_have_three_components() {
        let err = serde_json::from_str::<RawAction>(r#"{"objects_detected":{"cup":[1,2]}}"#);
        assert!(err.is_err());
    }

    #[test]
    fn metadata_survives_reserialization() {
        let mut raw = RawAction::named("reset_pose").with_gripper(30);
        raw.metadata.insert("generated_action".into(), json!("pick_and_place"));
        let text = serde_json::to_string(&raw).unwrap();
        assert!(text.contains("\"generated_action\":\"pick_and_place\""));
        assert!(!text.contains("objects_detected"));
    }

    #[test]
    fn gripper_state_serializes_lowercase() {
        let action = CanonicalAction {
            pos_end_effector: "move".into(),
            gripper: GripperState::Close,
        };
        assert_eq!(
            serde_json::to_value(&action).unwrap(),
            json!({"pos_end_effector": "move", "gripper": "close"})
        );
        assert_eq!(action.to_string(), "move/close");
    }

    #[test]
    fn relay_event_is_tagged_by_kind() {
        let event = Event::new(
            "armlink-runtime::pipeline",
            RelayEvent::CommandForwarded {
                token: "reset_pose".into(),
            },
        );
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["payload"]["kind"], json!("command_forwarded"));
        assert_eq!(value["source"], json!("armlink-runtime::pipeline"));
    }

    #[test]
    fn schema_mentions_interpreted_fields() {
        let schema = serde_json::to_string(&raw_action_schema()).unwrap();
        assert!(schema.contains("pos_end_effector"));
        assert!(schema.contains("objects_detected"));
    }

    #[test]
    fn link_error_display() {
        let err = LinkError::Rejected {
            peer: "10.0.0.9:5555".into(),
        };
        assert!(err.to_string().contains("10.0.0.9:5555"));

        let err = LinkError::Driver {
            component: "sim".into(),
            details: "offline".into(),
        };
        assert!(err.to_string().contains("sim"));
    }
}
