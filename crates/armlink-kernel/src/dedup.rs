//! [`DedupGate`] – consecutive-duplicate suppressor.
//!
//! Holds the most recently *accepted* [`CanonicalAction`] and suppresses an
//! incoming action whose canonical form is identical to it.  Memory is one
//! slot deep: A, B, A is accepted three times.
//!
//! ```text
//!            submit(c)                     submit(c ≠ held)
//!   Empty ───────────────▶ Holding(c) ─────────────────────▶ Holding(c')
//!                              │  ▲
//!                              └──┘ submit(c = held) → Suppress
//! ```
//!
//! # Example
//!
//! ```rust
//! use armlink_kernel::dedup::{DedupGate, Verdict};
//! use armlink_types::RawAction;
//!
//! let mut gate = DedupGate::new();
//! let close = RawAction::pose(&[0.1, 0.2, 0.3, 0.0, 0.0, 0.0]).with_gripper(220);
//!
//! assert_eq!(gate.submit(&close).verdict, Verdict::Accept);
//! assert_eq!(gate.submit(&close).verdict, Verdict::Suppress);
//!
//! // A new connection starts from scratch.
//! gate.reset();
//! assert_eq!(gate.submit(&close).verdict, Verdict::Accept);
//! ```

use armlink_types::{CanonicalAction, RawAction};
use tracing::trace;

use crate::normalizer::normalize;

/// Outcome of [`DedupGate::submit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Suppress,
}

/// The verdict together with the canonical action it was reached for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub verdict: Verdict,
    pub action: CanonicalAction,
}

impl Admission {
    pub fn is_accepted(&self) -> bool {
        self.verdict == Verdict::Accept
    }
}

/// Per-connection dedup state.  Never shared between connections.
#[derive(Debug, Default)]
pub struct DedupGate {
    last: Option<CanonicalAction>,
}

impl DedupGate {
    /// Create a gate with no prior action.
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalize `raw` and decide whether it passes.
    pub fn submit(&mut self, raw: &RawAction) -> Admission {
        let action = normalize(raw);
        let verdict = self.submit_canonical(&action);
        Admission { verdict, action }
    }

    /// Decide for an already-normalized action.  On [`Verdict::Accept`] the
    /// gate now holds `action`; on [`Verdict::Suppress`] it is unchanged.
    pub fn submit_canonical(&mut self, action: &CanonicalAction) -> Verdict {
        if self.last.as_ref() == Some(action) {
            return Verdict::Suppress;
        }
        trace!(previous = ?self.last, next = %action, "dedup gate advanced");
        self.last = Some(action.clone());
        Verdict::Accept
    }

    /// The most recently accepted action, if any.
    pub fn last(&self) -> Option<&CanonicalAction> {
        self.last.as_ref()
    }

    /// Forget the held action.
    pub fn reset(&mut self) {
        self.last = None;
    }
}
