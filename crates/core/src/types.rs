use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Identifier of a generation job.
pub type JobId = uuid::Uuid;

/// Identifier of an agent run.
pub type RunId = uuid::Uuid;

// ---------------------------------------------------------------------------
// Variation
// ---------------------------------------------------------------------------

/// One of the four render variations every shot carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Variation {
    A,
    B,
    C,
    D,
}

impl Variation {
    /// All variations in canonical order.
    pub const ALL: [Variation; 4] = [Variation::A, Variation::B, Variation::C, Variation::D];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::D => "D",
        }
    }

    /// Parse a sequence-file selection value.
    ///
    /// Unset, `"none"`, and anything unrecognised fall back to `A`.
    pub fn from_selection(selection: Option<&str>) -> Self {
        selection
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(Variation::A)
    }
}

impl fmt::Display for Variation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Variation {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "A" => Ok(Self::A),
            "B" => Ok(Self::B),
            "C" => Ok(Self::C),
            "D" => Ok(Self::D),
            other => Err(CoreError::Validation(format!(
                "Invalid variation '{other}'. Must be one of: A, B, C, D"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// FrameKind
// ---------------------------------------------------------------------------

/// Which end of a shot a rendered frame represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameKind {
    First,
    Last,
}

impl FrameKind {
    /// File stem used for the canonical render of this frame.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::First => "first",
            Self::Last => "last",
        }
    }

    pub fn from_stem(stem: &str) -> Option<Self> {
        match stem {
            "first" => Some(Self::First),
            "last" => Some(Self::Last),
            _ => None,
        }
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
