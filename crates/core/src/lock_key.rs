//! Deterministic lock keys derived from resource identity.
//!
//! Lock keys are plain strings so they can be logged and returned to
//! callers verbatim inside a conflict error.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{JobId, Variation};

/// Name of a resource that at most one job or run may hold at a time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LockKey(String);

impl LockKey {
    /// `<project>:<shot>:<variation>`: shot generation.
    pub fn for_shot(project_id: &str, shot_id: &str, variation: Variation) -> Self {
        Self(format!("{project_id}:{shot_id}:{variation}"))
    }

    /// `<project>:character:<character>:<slot>`: character slot generation.
    pub fn for_character_slot(project_id: &str, character_id: &str, slot: &str) -> Self {
        Self(format!("{project_id}:character:{character_id}:{slot}"))
    }

    /// `<project>:scratch:<job>`: free-form generation; never contended.
    pub fn for_scratch(project_id: &str, job_id: JobId) -> Self {
        Self(format!("{project_id}:scratch:{job_id}"))
    }

    /// `<project>:<shot>`: agent edit run over a shot's files.
    pub fn for_agent_run(project_id: &str, shot_id: &str) -> Self {
        Self(format!("{project_id}:{shot_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
