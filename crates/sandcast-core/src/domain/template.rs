//! Template builder and the immutable template specification.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::error::ValidationError;
use super::step::{StepSpec, DEFAULT_BASE_IMAGE};

/// vCPUs applied when neither the template nor the build config sets one.
pub const DEFAULT_CPU_COUNT: u32 = 2;

/// Memory (MiB) applied when neither the template nor the build config sets one.
pub const DEFAULT_MEMORY_MB: u32 = 1024;

/// Resource hints passed through to the build service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceHints {
    pub cpu_count: Option<u32>,
    pub memory_mb: Option<u32>,
}

impl ResourceHints {
    /// Fill unset hints from `fallback`.
    pub fn or(self, fallback: ResourceHints) -> Self {
        Self {
            cpu_count: self.cpu_count.or(fallback.cpu_count),
            memory_mb: self.memory_mb.or(fallback.memory_mb),
        }
    }

    /// Effective CPU count, defaulted when unset.
    pub fn cpu_count_or_default(&self) -> u32 {
        self.cpu_count.unwrap_or(DEFAULT_CPU_COUNT)
    }

    /// Effective memory, defaulted when unset.
    pub fn memory_mb_or_default(&self) -> u32 {
        self.memory_mb.unwrap_or(DEFAULT_MEMORY_MB)
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.cpu_count == Some(0) {
            return Err(ValidationError::NonPositiveResource { field: "cpu_count" });
        }
        if self.memory_mb == Some(0) {
            return Err(ValidationError::NonPositiveResource { field: "memory_mb" });
        }
        Ok(())
    }
}

/// Fluent accumulator of template steps.
///
/// Every method consumes the builder and returns it, so the chain order is
/// the declared step order. Structural errors are held until [`build`],
/// which reports the first one.
///
/// `build` consumes the builder: a frozen template cannot be mutated.
///
/// ```compile_fail
/// use sandcast_core::domain::template::TemplateBuilder;
///
/// let builder = TemplateBuilder::new("tool").run(["echo hi"]);
/// let spec = builder.build();
/// let builder = builder.set_workdir("/work");
/// ```
///
/// [`build`]: TemplateBuilder::build
#[derive(Debug, Clone)]
#[must_use]
pub struct TemplateBuilder {
    name: String,
    steps: Vec<StepSpec>,
    hints: ResourceHints,
    error: Option<ValidationError>,
}

impl TemplateBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            hints: ResourceHints::default(),
            error: None,
        }
    }

    /// Select the base image. Must come first and at most once.
    pub fn with_base_image(self, image: impl Into<String>) -> Self {
        self.step(StepSpec::BaseImage {
            image: image.into(),
        })
    }

    /// Install system packages.
    pub fn install_packages<I, S>(self, packages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.step(StepSpec::PackageInstall {
            packages: packages.into_iter().map(Into::into).collect(),
        })
    }

    /// Run shell commands as one step.
    pub fn run<I, S>(self, commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.step(StepSpec::RunCommand {
            commands: commands.into_iter().map(Into::into).collect(),
        })
    }

    /// Copy a local file tree into the image.
    pub fn copy(self, local_path: impl Into<PathBuf>, remote_path: impl Into<String>) -> Self {
        self.step(StepSpec::CopySource {
            local_path: local_path.into(),
            remote_path: remote_path.into(),
        })
    }

    /// Set the working directory.
    pub fn set_workdir(self, path: impl Into<String>) -> Self {
        self.step(StepSpec::SetWorkdir { path: path.into() })
    }

    pub fn cpu_count(mut self, cpu_count: u32) -> Self {
        self.hints.cpu_count = Some(cpu_count);
        self
    }

    pub fn memory_mb(mut self, memory_mb: u32) -> Self {
        self.hints.memory_mb = Some(memory_mb);
        self
    }

    /// Append an already-constructed step.
    pub fn step(mut self, step: StepSpec) -> Self {
        if self.error.is_none() {
            if let Err(e) = self.check_step(&step) {
                self.error = Some(e);
            }
        }
        self.steps.push(step);
        self
    }

    fn check_step(&self, step: &StepSpec) -> Result<(), ValidationError> {
        step.validate()?;
        if matches!(step, StepSpec::BaseImage { .. }) {
            if self
                .steps
                .iter()
                .any(|s| matches!(s, StepSpec::BaseImage { .. }))
            {
                return Err(ValidationError::DuplicateBaseImage);
            }
            if !self.steps.is_empty() {
                return Err(ValidationError::BaseImageNotFirst {
                    index: self.steps.len(),
                });
            }
        }
        Ok(())
    }

    /// Freeze the builder into an immutable [`TemplateSpec`].
    pub fn build(self) -> Result<TemplateSpec, ValidationError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyField {
                field: "template name",
            });
        }
        self.hints.validate()?;
        Ok(TemplateSpec {
            name: self.name,
            steps: self.steps,
            hints: self.hints,
        })
    }
}

impl From<&TemplateSpec> for TemplateBuilder {
    /// Start a new builder from an existing spec; the spec itself is untouched.
    fn from(spec: &TemplateSpec) -> Self {
        Self {
            name: spec.name.clone(),
            steps: spec.steps.clone(),
            hints: spec.hints,
            error: None,
        }
    }
}

/// Immutable template specification: ordered steps plus resource hints.
///
/// Changes produce a new spec via the `with_*` methods.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TemplateSpec {
    name: String,
    steps: Vec<StepSpec>,
    hints: ResourceHints,
}

impl TemplateSpec {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> &[StepSpec] {
        &self.steps
    }

    pub fn hints(&self) -> ResourceHints {
        self.hints
    }

    /// Declared base image, or the service default.
    pub fn base_image(&self) -> &str {
        match self.steps.first() {
            Some(StepSpec::BaseImage { image }) => image,
            _ => DEFAULT_BASE_IMAGE,
        }
    }

    /// New spec with `step` appended.
    pub fn with_step(&self, step: StepSpec) -> Result<TemplateSpec, ValidationError> {
        TemplateBuilder::from(self).step(step).build()
    }

    /// New spec with unset hints filled from `hints`.
    pub fn with_default_hints(&self, hints: ResourceHints) -> Result<TemplateSpec, ValidationError> {
        let mut builder = TemplateBuilder::from(self);
        builder.hints = self.hints.or(hints);
        builder.build()
    }

    /// SHA-256 over the canonical JSON of the spec (order-sensitive).
    pub fn digest(&self) -> String {
        let canonical = serde_json::json!({
            "name": self.name,
            "steps": self.steps,
            "cpu_count": self.hints.cpu_count_or_default(),
            "memory_mb": self.hints.memory_mb_or_default(),
        });
        let mut hasher = Sha256::new();
        hasher.update(canonical.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_order_is_step_order() {
        let spec = TemplateBuilder::new("amp-code")
            .with_base_image("base")
            .install_packages(["curl"])
            .run(["curl -fsSL https://ampcode.com/install.sh | bash"])
            .set_workdir("/home/user")
            .build()
            .unwrap();

        let kinds: Vec<&str> = spec.steps().iter().map(StepSpec::kind).collect();
        assert_eq!(
            kinds,
            vec!["base_image", "package_install", "run_command", "set_workdir"]
        );
        assert_eq!(spec.base_image(), "base");
    }

    #[test]
    fn test_base_image_must_be_first() {
        let err = TemplateBuilder::new("t")
            .run(["echo"])
            .with_base_image("ubuntu:25.04")
            .build()
            .unwrap_err();
        assert_eq!(err, ValidationError::BaseImageNotFirst { index: 1 });
    }

    #[test]
    fn test_single_base_image() {
        let err = TemplateBuilder::new("t")
            .with_base_image("a")
            .with_base_image("b")
            .build()
            .unwrap_err();
        assert_eq!(err, ValidationError::DuplicateBaseImage);
    }

    #[test]
    fn test_first_error_wins() {
        let err = TemplateBuilder::new("t")
            .set_workdir("")
            .install_packages(Vec::<String>::new())
            .build()
            .unwrap_err();
        assert_eq!(err, ValidationError::EmptyField { field: "workdir" });
    }

    #[test]
    fn test_zero_resources_rejected() {
        let err = TemplateBuilder::new("t").cpu_count(0).build().unwrap_err();
        assert_eq!(
            err,
            ValidationError::NonPositiveResource { field: "cpu_count" }
        );
    }

    #[test]
    fn test_default_base_image_when_absent() {
        let spec = TemplateBuilder::new("t").run(["true"]).build().unwrap();
        assert_eq!(spec.base_image(), DEFAULT_BASE_IMAGE);
    }

    #[test]
    fn test_functional_update_leaves_original_unchanged() {
        let spec = TemplateBuilder::new("t").run(["true"]).build().unwrap();
        let before = spec.clone();

        let updated = spec
            .with_step(StepSpec::SetWorkdir {
                path: "/w".to_string(),
            })
            .unwrap();

        assert_eq!(spec, before);
        assert_eq!(spec.steps().len(), 1);
        assert_eq!(updated.steps().len(), 2);
    }

    #[test]
    fn test_functional_update_keeps_invariants() {
        let spec = TemplateBuilder::new("t").run(["true"]).build().unwrap();
        let err = spec
            .with_step(StepSpec::BaseImage {
                image: "late".to_string(),
            })
            .unwrap_err();
        assert_eq!(err, ValidationError::BaseImageNotFirst { index: 1 });
    }

    #[test]
    fn test_hint_precedence() {
        let spec = TemplateBuilder::new("t").cpu_count(8).build().unwrap();
        let filled = spec
            .with_default_hints(ResourceHints {
                cpu_count: Some(4),
                memory_mb: Some(4096),
            })
            .unwrap();
        assert_eq!(filled.hints().cpu_count, Some(8));
        assert_eq!(filled.hints().memory_mb, Some(4096));
        assert_eq!(spec.hints().memory_mb_or_default(), DEFAULT_MEMORY_MB);
    }

    #[test]
    fn test_digest_stable_and_order_sensitive() {
        let a = TemplateBuilder::new("t").run(["a"]).run(["b"]).build().unwrap();
        let a2 = TemplateBuilder::new("t").run(["a"]).run(["b"]).build().unwrap();
        let b = TemplateBuilder::new("t").run(["b"]).run(["a"]).build().unwrap();

        assert_eq!(a.digest(), a2.digest());
        assert_ne!(a.digest(), b.digest());
        assert_eq!(a.digest().len(), 64);
    }
}
