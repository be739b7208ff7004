//! Reelforge domain core.
//!
//! Pure domain types and rules shared by every other crate: error taxonomy,
//! identifiers, lifecycle statuses, lock keys, shot ordering, continuity
//! resolution, reference manifests, job input validation, and the on-disk
//! project layout. Nothing in here performs I/O.

pub mod continuity;
pub mod error;
pub mod generation;
pub mod hashing;
pub mod job_events;
pub mod lock_key;
pub mod project_layout;
pub mod proposal;
pub mod references;
pub mod shot_order;
pub mod status;
pub mod types;
