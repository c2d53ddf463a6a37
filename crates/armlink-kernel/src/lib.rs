//! `armlink-kernel` – Admission rules for relayed actions.
//!
//! It does not move data; it decides what is allowed through.
//!
//! # Modules
//!
//! - [`normalizer`] – [`normalize`][normalizer::normalize]: reduces a
//!   [`RawAction`][armlink_types::RawAction] to the
//!   [`CanonicalAction`][armlink_types::CanonicalAction] used as the dedup key
//!   and as the robot-facing command token.
//! - [`dedup`] – [`DedupGate`][dedup::DedupGate]: last-action-only state
//!   machine that suppresses immediate repeats.
//! - [`access`] – [`PeerAllowList`][access::PeerAllowList]: peer-address
//!   filter applied before a connection is served.

pub mod access;
pub mod dedup;
pub mod normalizer;

pub use access::PeerAllowList;
pub use dedup::{Admission, DedupGate, Verdict};
pub use normalizer::{command_token, normalize};
