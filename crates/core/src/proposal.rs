//! Structural checks on agent-proposed shot prompts.
//!
//! A proposal must open with a markdown `# ` header, contain every
//! required section marker, have a non-empty body under the header, and
//! stay under the length bound. Failures are not retried automatically.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Default upper bound on proposal length, in characters.
pub const DEFAULT_MAX_PROPOSAL_CHARS: usize = 8_000;

/// Section markers every shot prompt must carry.
pub const DEFAULT_REQUIRED_SECTIONS: &[&str] = &["## Prompt", "## Negative Prompt"];

fn header_regex() -> &'static Regex {
    static HEADER: OnceLock<Regex> = OnceLock::new();
    HEADER.get_or_init(|| Regex::new(r"^#[ \t]+\S").expect("static regex is valid"))
}

/// Rules applied to a proposal before it may be written.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalRules {
    pub required_sections: Vec<String>,
    pub max_chars: usize,
}

impl Default for ProposalRules {
    fn default() -> Self {
        Self {
            required_sections: DEFAULT_REQUIRED_SECTIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_chars: DEFAULT_MAX_PROPOSAL_CHARS,
        }
    }
}

/// Outcome of [`ProposalRules::check`], emitted as a `lint_result` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LintReport {
    pub ok: bool,
    pub issues: Vec<String>,
}

impl LintReport {
    /// Convert a failed report into a `VALIDATION_FAILED` error.
    pub fn into_result(self) -> Result<(), CoreError> {
        if self.ok {
            Ok(())
        } else {
            Err(CoreError::Validation(self.issues.join("; ")))
        }
    }
}

impl ProposalRules {
    pub fn check(&self, content: &str) -> LintReport {
        let mut issues = Vec::new();
        let trimmed = content.trim();

        if trimmed.is_empty() {
            issues.push("Proposal is empty".to_string());
            return LintReport { ok: false, issues };
        }

        let char_count = content.chars().count();
        if char_count > self.max_chars {
            issues.push(format!(
                "Proposal is {char_count} characters (max {})",
                self.max_chars
            ));
        }

        let first_line = trimmed.lines().next().unwrap_or_default();
        if !header_regex().is_match(first_line) {
            issues.push("Proposal must start with a '# ' header line".to_string());
        }

        for section in &self.required_sections {
            let present = trimmed.lines().any(|line| line.trim_end() == section);
            if !present {
                issues.push(format!("Missing required section '{section}'"));
            }
        }

        let body_empty = trimmed
            .lines()
            .skip(1)
            .filter(|line| !line.trim().is_empty())
            .all(|line| line.trim_start().starts_with('#'));
        if body_empty {
            issues.push("Proposal body is empty".to_string());
        }

        LintReport {
            ok: issues.is_empty(),
            issues,
        }
    }
}
