//! Reference image manifests, de-duplication, and provider-cap trimming.
//!
//! The provider accepts at most [`MAX_REFERENCE_IMAGES`] input images and
//! at most [`MAX_COMBINED_IMAGES`] inputs plus requested outputs. The
//! collector in the pipeline crate feeds candidates in priority order
//! through [`ReferenceSetBuilder`]; this module owns the rules.

use std::collections::HashSet;
use std::path::PathBuf;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::hashing::sha256_hex;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Hard cap on input images per provider call.
pub const MAX_REFERENCE_IMAGES: usize = 14;

/// Cap on input images plus requested outputs per provider call.
pub const MAX_COMBINED_IMAGES: usize = 15;

/// File stems tried, in order, under each character's `refs/` folder.
pub const CHARACTER_REFERENCE_STEMS: &[&str] =
    &["front", "ref_front", "portrait", "reference", "ref_01"];

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Where a reference image came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceSourceType {
    Continuity,
    UploadedRefSet,
    Character,
    Location,
}

/// One input image as reported back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceManifestEntry {
    /// 1-based position in the provider input list.
    pub order: usize,
    pub source_type: ReferenceSourceType,
    pub source_id: String,
    pub source_path: Option<PathBuf>,
}

/// A candidate image already converted into its embeddable form.
#[derive(Debug, Clone)]
pub struct ReferenceCandidate {
    pub source_type: ReferenceSourceType,
    pub source_id: String,
    pub source_path: Option<PathBuf>,
    /// `data:<mime>;base64,<payload>` URI sent to the provider.
    pub data_uri: String,
    /// SHA-256 of the raw image bytes; the de-duplication key.
    pub content_hash: String,
}

impl ReferenceCandidate {
    pub fn from_bytes(
        source_type: ReferenceSourceType,
        source_id: impl Into<String>,
        source_path: Option<PathBuf>,
        bytes: &[u8],
        mime: &str,
    ) -> Self {
        Self {
            source_type,
            source_id: source_id.into(),
            source_path,
            data_uri: data_uri(bytes, mime),
            content_hash: sha256_hex(bytes),
        }
    }
}

/// Encode raw image bytes as a data URI.
pub fn data_uri(bytes: &[u8], mime: &str) -> String {
    format!("data:{mime};base64,{}", BASE64.encode(bytes))
}

/// What happened to a candidate offered to the builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Added,
    Duplicate,
    Full,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Accumulates candidates in priority order, dropping exact-content
/// duplicates and refusing anything past the cap.
#[derive(Debug, Clone)]
pub struct ReferenceSetBuilder {
    cap: usize,
    seen: HashSet<String>,
    entries: Vec<ReferenceCandidate>,
}

impl Default for ReferenceSetBuilder {
    fn default() -> Self {
        Self::with_cap(MAX_REFERENCE_IMAGES)
    }
}

impl ReferenceSetBuilder {
    /// Builder with an explicit cap, clamped to [`MAX_REFERENCE_IMAGES`].
    pub fn with_cap(cap: usize) -> Self {
        Self {
            cap: cap.min(MAX_REFERENCE_IMAGES),
            seen: HashSet::new(),
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, candidate: ReferenceCandidate) -> PushOutcome {
        if self.seen.contains(&candidate.content_hash) {
            return PushOutcome::Duplicate;
        }
        if self.is_full() {
            return PushOutcome::Full;
        }
        self.seen.insert(candidate.content_hash.clone());
        self.entries.push(candidate);
        PushOutcome::Added
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.cap
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn finish(self) -> Vec<ReferenceCandidate> {
        self.entries
    }
}

// ---------------------------------------------------------------------------
// Trimming
// ---------------------------------------------------------------------------

/// References kept for dispatch plus how many were cut from the tail.
#[derive(Debug, Clone)]
pub struct TrimOutcome {
    pub kept: Vec<ReferenceCandidate>,
    pub trimmed_count: usize,
}

impl TrimOutcome {
    pub fn was_trimmed(&self) -> bool {
        self.trimmed_count > 0
    }
}

/// Drop references from the tail until `refs + outputs` fits
/// [`MAX_COMBINED_IMAGES`] (and refs fit [`MAX_REFERENCE_IMAGES`]).
pub fn trim_for_outputs(mut refs: Vec<ReferenceCandidate>, requested_outputs: usize) -> TrimOutcome {
    let allowed = MAX_COMBINED_IMAGES
        .saturating_sub(requested_outputs)
        .min(MAX_REFERENCE_IMAGES);
    let trimmed_count = refs.len().saturating_sub(allowed);
    refs.truncate(allowed.min(refs.len()));
    TrimOutcome {
        kept: refs,
        trimmed_count,
    }
}

/// Build the 1-based manifest for the references actually dispatched.
pub fn build_manifest(refs: &[ReferenceCandidate]) -> Vec<ReferenceManifestEntry> {
    refs.iter()
        .enumerate()
        .map(|(i, r)| ReferenceManifestEntry {
            order: i + 1,
            source_type: r.source_type,
            source_id: r.source_id.clone(),
            source_path: r.source_path.clone(),
        })
        .collect()
}
