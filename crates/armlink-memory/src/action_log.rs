//! Append-only action log.
//!
//! Every action accepted by the dedup gate is persisted as one JSON object
//! per line.  The file is opened in append mode for each write and closed
//! again afterwards, so writers on different connections interleave at the
//! OS append level without an explicit lock.  Entries are never rewritten.
//!
//! # Line layout
//!
//! | field              | description                                    |
//! |--------------------|------------------------------------------------|
//! | pos_end_effector   | canonical pose token (`"move"`, named command) |
//! | gripper            | `"close"`, `"open"` or `"unknown"`             |
//! | objects_detected   | raw `[u, v, z]` centroids, when present        |
//! | *(metadata)*       | passthrough fields (`action_id`, `step`, …)    |
//! | timestamp          | RFC-3339 acceptance time (UTC)                 |
//!
//! # Example
//!
//! ```rust
//! use armlink_memory::action_log::{ActionLog, LogEntry};
//! use armlink_types::{CanonicalAction, GripperState, RawAction};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let log = ActionLog::new(dir.path().join("received_actions.jsonl"));
//!
//! let raw = RawAction::named("reset_pose");
//! let canonical = CanonicalAction {
//!     pos_end_effector: "reset_pose".into(),
//!     gripper: GripperState::Unknown,
//! };
//! log.append(&LogEntry::accepted(&canonical, &raw)).unwrap();
//!
//! assert_eq!(log.read_all().unwrap().len(), 1);
//! ```

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use armlink_types::{CanonicalAction, Detection, GripperState, LinkError, RawAction};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

/// File name used when no path is configured.
pub const DEFAULT_LOG_PATH: &str = "received_actions.jsonl";

/// Metadata keys that would collide with the entry's own fields.
const RESERVED_KEYS: &[&str] = &["pos_end_effector", "gripper", "objects_detected", "timestamp"];

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum ActionLogError {
    #[error("I/O error on action log: {0}")]
    Io(#[from] io::Error),
    #[error("failed to serialize log entry: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("line {line} of the action log is not a valid entry: {source}")]
    Corrupt {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

impl From<ActionLogError> for LinkError {
    fn from(e: ActionLogError) -> Self {
        LinkError::LogWrite(e.to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// LogEntry
// ─────────────────────────────────────────────────────────────────────────────

/// One accepted action as persisted in the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub pos_end_effector: String,
    pub gripper: GripperState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub objects_detected: Option<BTreeMap<String, Detection>>,
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl LogEntry {
    /// Build the entry for `raw`, accepted as `canonical`, stamped now.
    pub fn accepted(canonical: &CanonicalAction, raw: &RawAction) -> Self {
        let mut metadata = raw.metadata.clone();
        for key in RESERVED_KEYS {
            metadata.remove(*key);
        }
        Self {
            pos_end_effector: canonical.pos_end_effector.clone(),
            gripper: canonical.gripper,
            objects_detected: raw.objects_detected.clone(),
            metadata,
            timestamp: Utc::now(),
        }
    }

    /// The canonical action this entry was recorded for.
    pub fn canonical(&self) -> CanonicalAction {
        CanonicalAction {
            pos_end_effector: self.pos_end_effector.clone(),
            gripper: self.gripper,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ActionLog
// ─────────────────────────────────────────────────────────────────────────────

/// Handle on a JSON Lines action log.  Cheap to clone; holds only the path.
#[derive(Debug, Clone)]
pub struct ActionLog {
    path: PathBuf,
}

impl ActionLog {
    /// Point at `path`.  Nothing is created until the first append.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `entry` as a single line and flush it.
    ///
    /// The line is written with one `write_all` call.  Failures are returned
    /// to the caller and never retried.
    pub fn append(&self, entry: &LogEntry) -> Result<(), ActionLogError> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(&line)?;
        file.flush()?;

        debug!(path = %self.path.display(), bytes = line.len(), "action logged");
        Ok(())
    }

    /// Re-read every entry, in file order.  A missing file is an empty log;
    /// blank lines are skipped.
    pub fn read_all(&self) -> Result<Vec<LogEntry>, ActionLogError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        text.lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(idx, line)| {
                serde_json::from_str(line).map_err(|source| ActionLogError::Corrupt {
                    line: idx + 1,
                    source,
                })
            })
            .collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
