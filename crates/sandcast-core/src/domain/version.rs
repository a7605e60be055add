//! Semantic version records.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::error::ValidationError;

fn version_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\d+\.\d+\.\d+$").expect("static regex"))
}

/// A parsed `MAJOR.MINOR.PATCH` version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VersionRecord {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl VersionRecord {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parse a stored version string. Surrounding whitespace is ignored;
    /// anything other than exactly three dot-separated non-negative
    /// integers fails with `InvalidVersionFormat`.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let value = raw.trim();
        let invalid = || ValidationError::InvalidVersionFormat {
            value: value.to_string(),
        };
        if !version_pattern().is_match(value) {
            return Err(invalid());
        }

        let mut parts = value.split('.').map(|p| p.parse::<u64>());
        match (parts.next(), parts.next(), parts.next()) {
            (Some(Ok(major)), Some(Ok(minor)), Some(Ok(patch))) => {
                Ok(Self::new(major, minor, patch))
            }
            _ => Err(invalid()),
        }
    }

    /// Primary tag for this version: `v{MAJOR}.{MINOR}.{PATCH}`.
    pub fn tag(&self) -> String {
        format!("v{}", self)
    }
}

impl std::fmt::Display for VersionRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl std::str::FromStr for VersionRecord {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
