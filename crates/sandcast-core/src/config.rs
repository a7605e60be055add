//! Explicit run configuration handed to the build executor and the
//! verification runner. Only the CLI reads the environment.

use serde::{Deserialize, Serialize};

use crate::domain::{ResourceHints, ValidationError};
use sandcast_state::template_ref;

/// Default lifetime of a verification sandbox.
pub const DEFAULT_VERIFY_TIMEOUT_MS: u64 = 60_000;

/// Build-time settings.
///
/// Resource precedence: value declared by the template, then this config,
/// then the built-in defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Builds `name:tag` instead of `name`.
    pub tag_override: Option<String>,
    pub cpu_count: Option<u32>,
    pub memory_mb: Option<u32>,
}

impl BuildConfig {
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag_override = Some(tag.into());
        self
    }

    /// Resource hints used to fill whatever the template leaves unset.
    pub fn hints(&self) -> ResourceHints {
        ResourceHints {
            cpu_count: self.cpu_count,
            memory_mb: self.memory_mb,
        }
    }

    /// Reference the build is published under.
    pub fn target(&self, template: &str) -> String {
        template_ref(template, self.tag_override.as_deref())
    }
}

/// Verification settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyConfig {
    /// Tag to provision from; plain `name` when unset.
    pub template_tag: Option<String>,
    /// Absolute session lifetime from creation.
    pub timeout_ms: u64,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            template_tag: None,
            timeout_ms: DEFAULT_VERIFY_TIMEOUT_MS,
        }
    }
}

impl VerifyConfig {
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.template_tag = Some(tag.into());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn template_ref(&self, template: &str) -> String {
        template_ref(template, self.template_tag.as_deref())
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.timeout_ms == 0 {
            return Err(ValidationError::NonPositiveResource {
                field: "timeout_ms",
            });
        }
        Ok(())
    }
}
