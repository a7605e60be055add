//! Verification reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result of one check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub label: String,
    pub passed: bool,
    /// `None` when the command never produced an exit code.
    pub exit_code: Option<i32>,
    /// Failing check's stderr verbatim, or stdout when stderr is empty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
    pub duration_ms: u64,
}

/// Aggregate outcome of a verification run.
///
/// Checks after the first failure are absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub run_id: String,
    pub template_ref: String,
    pub passed: bool,
    pub checks: Vec<CheckOutcome>,
    /// Teardown failure observed after a failed run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub teardown_error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl VerificationReport {
    /// Number of checks that passed.
    pub fn passed_count(&self) -> usize {
        self.checks.iter().filter(|c| c.passed).count()
    }

    /// The check that ended the run, if any.
    pub fn failed_check(&self) -> Option<&CheckOutcome> {
        self.checks.iter().find(|c| !c.passed)
    }

    /// One-line summary for terminals.
    pub fn summary(&self) -> String {
        match self.failed_check() {
            None => format!(
                "{}: all {} check(s) passed",
                self.template_ref,
                self.checks.len()
            ),
            Some(failed) => format!(
                "{}: check '{}' failed: {}",
                self.template_ref,
                failed.label,
                last_line(failed.diagnostic.as_deref().unwrap_or(""))
            ),
        }
    }
}

/// Last non-empty line of captured output, trimmed. Tools usually print
/// the actual error last.
pub(crate) fn last_line(text: &str) -> &str {
    text.lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("")
}

/// First line of `text`, marked with `...` when more lines follow.
pub(crate) fn first_line(text: &str) -> String {
    let mut lines = text.lines();
    let first = lines.next().unwrap_or("").trim_end();
    if lines.next().is_some() {
        format!("{} ...", first)
    } else {
        first.to_string()
    }
}
