//! Acceptance checks run against a provisioned sandbox.

use std::fmt;
use std::sync::Arc;

use sandcast_state::CommandOutput;
use serde::{Deserialize, Serialize};

use super::error::ValidationError;

/// Predicate deciding whether a command output counts as success.
pub type CheckPredicate = Arc<dyn Fn(&CommandOutput) -> bool + Send + Sync>;

/// What a check expects from its command.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expectation {
    /// Exit code zero.
    #[default]
    ExitZero,
    /// A specific exit code.
    ExitCode(i32),
    /// Exit code zero and stdout containing the needle.
    StdoutContains(String),
    /// Stderr containing the needle, regardless of exit code.
    StderrContains(String),
    /// Caller-supplied predicate. Not representable in manifests.
    #[serde(skip)]
    Predicate(CheckPredicate),
}

impl Expectation {
    pub fn is_satisfied_by(&self, output: &CommandOutput) -> bool {
        match self {
            Expectation::ExitZero => output.exit_code == 0,
            Expectation::ExitCode(code) => output.exit_code == *code,
            Expectation::StdoutContains(needle) => {
                output.exit_code == 0 && output.stdout.contains(needle.as_str())
            }
            Expectation::StderrContains(needle) => output.stderr.contains(needle.as_str()),
            Expectation::Predicate(predicate) => predicate(output),
        }
    }
}

impl fmt::Debug for Expectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expectation::ExitZero => write!(f, "ExitZero"),
            Expectation::ExitCode(code) => f.debug_tuple("ExitCode").field(code).finish(),
            Expectation::StdoutContains(s) => f.debug_tuple("StdoutContains").field(s).finish(),
            Expectation::StderrContains(s) => f.debug_tuple("StderrContains").field(s).finish(),
            Expectation::Predicate(_) => write!(f, "Predicate(<fn>)"),
        }
    }
}

/// One named acceptance check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckSpec {
    pub label: String,
    pub command: String,
    #[serde(default)]
    pub expect: Expectation,
}

impl CheckSpec {
    /// A check that passes when `command` exits zero.
    pub fn new(label: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            command: command.into(),
            expect: Expectation::ExitZero,
        }
    }

    pub fn expecting(mut self, expect: Expectation) -> Self {
        self.expect = expect;
        self
    }

    /// Override success with a custom predicate.
    pub fn with_predicate<F>(self, predicate: F) -> Self
    where
        F: Fn(&CommandOutput) -> bool + Send + Sync + 'static,
    {
        self.expecting(Expectation::Predicate(Arc::new(predicate)))
    }

    pub fn is_success(&self, output: &CommandOutput) -> bool {
        self.expect.is_satisfied_by(output)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.label.trim().is_empty() {
            return Err(ValidationError::EmptyField {
                field: "check label",
            });
        }
        if self.command.trim().is_empty() {
            return Err(ValidationError::EmptyField {
                field: "check command",
            });
        }
        Ok(())
    }
}
