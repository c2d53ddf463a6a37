//! Action normalizer.
//!
//! Reduces a [`RawAction`] to its [`CanonicalAction`]: numeric poses collapse
//! to the literal `"move"`, named commands pass through as strings, and the
//! gripper control code is looked up in a fixed table.

use armlink_types::{CanonicalAction, GripperState, RawAction};
use serde_json::Value;

/// Canonical token for any numeric end-effector pose.
pub const MOVE_TOKEN: &str = "move";

/// Canonical token for a missing or `null` pose.
pub const NONE_TOKEN: &str = "None";

/// Gripper control codes understood by the robot.  These are discrete
/// robot-specific codes, not points on a continuous range; extend the table
/// to support more.
const GRIPPER_CODES: &[(i64, GripperState)] = &[(220, GripperState::Close), (30, GripperState::Open)];

/// Reduce `raw` to its canonical form.  Pure.
pub fn normalize(raw: &RawAction) -> CanonicalAction {
    CanonicalAction {
        pos_end_effector: canonical_pose(&raw.pos_end_effector),
        gripper: canonical_gripper(&raw.gripper),
    }
}

/// The token forwarded to the robot driver for an accepted action.
pub fn command_token(action: &CanonicalAction) -> &str {
    &action.pos_end_effector
}

fn canonical_pose(value: &Value) -> String {
    match value {
        Value::Array(_) => MOVE_TOKEN.to_string(),
        Value::String(name) => name.clone(),
        Value::Null => NONE_TOKEN.to_string(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        other => other.to_string(),
    }
}

fn canonical_gripper(value: &Value) -> GripperState {
    let Some(code) = integral_code(value) else {
        return GripperState::Unknown;
    };
    GRIPPER_CODES
        .iter()
        .find(|(known, _)| *known == code)
        .map(|(_, state)| *state)
        .unwrap_or(GripperState::Unknown)
}

/// `220` and `220.0` are the same code; `220.5` is no code at all.
fn integral_code(value: &Value) -> Option<i64> {
    let Value::Number(n) = value else {
        return None;
    };
    n.as_i64().or_else(|| {
        n.as_f64()
            .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
            .map(|f| f as i64)
    })
}
