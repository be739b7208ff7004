//! Continuity resolution: which frame should seed a shot's first frame.
//!
//! Resolution is a pure projection over the render listing, the sequence
//! record and the shot's disable flag. Callers rebuild the inputs on every
//! request since renders change underneath.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::shot_order::previous_shot;
use crate::types::{FrameKind, Variation};

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// Rendered frames present on disk, keyed by shot, variation and frame.
#[derive(Debug, Clone, Default)]
pub struct RenderIndex {
    frames: HashMap<(String, Variation, FrameKind), PathBuf>,
}

impl RenderIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        shot_id: impl Into<String>,
        variation: Variation,
        frame: FrameKind,
        path: impl Into<PathBuf>,
    ) {
        self.frames
            .insert((shot_id.into(), variation, frame), path.into());
    }

    pub fn get(&self, shot_id: &str, variation: Variation, frame: FrameKind) -> Option<&Path> {
        self.frames
            .get(&(shot_id.to_string(), variation, frame))
            .map(PathBuf::as_path)
    }

    /// Distinct shot ids with at least one render.
    pub fn shot_ids(&self) -> Vec<String> {
        self.frames
            .keys()
            .map(|(shot, _, _)| shot.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// The project's sequence record: editorial order and per-shot selections.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceRecord {
    #[serde(default)]
    pub editorial_order: Option<Vec<String>>,
    /// Shot id -> selected variation (`"A"`..`"D"` or `"none"`).
    #[serde(default)]
    pub selections: HashMap<String, String>,
}

impl SequenceRecord {
    pub fn selected_variation(&self, shot_id: &str) -> Variation {
        Variation::from_selection(self.selections.get(shot_id).map(String::as_str))
    }
}

/// Everything resolution reads, borrowed from the caller.
#[derive(Debug, Clone, Copy)]
pub struct ContinuityInputs<'a> {
    /// Full shot order (see [`crate::shot_order::order_shots`]).
    pub order: &'a [String],
    pub renders: &'a RenderIndex,
    pub sequence: &'a SequenceRecord,
    /// Continuity explicitly disabled on the target shot.
    pub continuity_disabled: bool,
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContinuitySource {
    Direct,
    Inherited,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContinuityReason {
    ManualOverride,
    DisabledByShot,
    NoPreviousShot,
    MissingPreviousLast,
    InheritedFromPreviousLast,
}

/// Upstream frame a first frame was inherited from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InheritedFrom {
    pub shot_id: String,
    pub variation: Variation,
    pub frame: FrameKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FirstFrameResolution {
    pub path: Option<PathBuf>,
    pub source: ContinuitySource,
    pub reason: ContinuityReason,
    pub inherited_from: Option<InheritedFrom>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastFrameResolution {
    pub path: Option<PathBuf>,
    pub source: ContinuitySource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContinuityResolution {
    pub shot_id: String,
    pub variation: Variation,
    pub first: FirstFrameResolution,
    pub last: LastFrameResolution,
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Resolve first/last frames for one variation of `shot_id`.
pub fn resolve_variation(
    inputs: ContinuityInputs<'_>,
    shot_id: &str,
    variation: Variation,
) -> ContinuityResolution {
    ContinuityResolution {
        shot_id: shot_id.to_string(),
        variation,
        first: resolve_first_frame(inputs, shot_id, variation),
        last: resolve_last_frame(inputs.renders, shot_id, variation),
    }
}

/// Resolve all four variations of `shot_id`.
pub fn resolve_shot(inputs: ContinuityInputs<'_>, shot_id: &str) -> Vec<ContinuityResolution> {
    Variation::ALL
        .iter()
        .map(|&v| resolve_variation(inputs, shot_id, v))
        .collect()
}

fn resolve_first_frame(
    inputs: ContinuityInputs<'_>,
    shot_id: &str,
    variation: Variation,
) -> FirstFrameResolution {
    if let Some(direct) = inputs.renders.get(shot_id, variation, FrameKind::First) {
        return FirstFrameResolution {
            path: Some(direct.to_path_buf()),
            source: ContinuitySource::Direct,
            reason: ContinuityReason::ManualOverride,
            inherited_from: None,
        };
    }

    let unresolved = |reason| FirstFrameResolution {
        path: None,
        source: ContinuitySource::None,
        reason,
        inherited_from: None,
    };

    if inputs.continuity_disabled {
        return unresolved(ContinuityReason::DisabledByShot);
    }

    let Some(prev) = previous_shot(inputs.order, shot_id) else {
        return unresolved(ContinuityReason::NoPreviousShot);
    };

    let prev_variation = inputs.sequence.selected_variation(prev);
    match inputs.renders.get(prev, prev_variation, FrameKind::Last) {
        None => unresolved(ContinuityReason::MissingPreviousLast),
        Some(prev_last) => FirstFrameResolution {
            path: Some(prev_last.to_path_buf()),
            source: ContinuitySource::Inherited,
            reason: ContinuityReason::InheritedFromPreviousLast,
            inherited_from: Some(InheritedFrom {
                shot_id: prev.to_string(),
                variation: prev_variation,
                frame: FrameKind::Last,
            }),
        },
    }
}

fn resolve_last_frame(
    renders: &RenderIndex,
    shot_id: &str,
    variation: Variation,
) -> LastFrameResolution {
    match renders.get(shot_id, variation, FrameKind::Last) {
        Some(path) => LastFrameResolution {
            path: Some(path.to_path_buf()),
            source: ContinuitySource::Direct,
        },
        None => LastFrameResolution {
            path: None,
            source: ContinuitySource::None,
        },
    }
}
