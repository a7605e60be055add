//! Template manifests on disk and the catalog that finds them.
//!
//! Layout: `<root>/<name>/template.toml` plus `<root>/<name>/version`.
//!
//! ```toml
//! name = "amp-code"
//!
//! [resources]
//! cpu_count = 2
//! memory_mb = 2048
//!
//! [[steps]]
//! kind = "base_image"
//!
//! [[steps]]
//! kind = "package_install"
//! packages = ["curl"]
//!
//! [[checks]]
//! label = "amp"
//! command = "amp --version"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::{CheckSpec, CoreError, ResourceHints, Result, StepSpec, TemplateBuilder, TemplateSpec};

/// File name of a template manifest inside its directory.
pub const MANIFEST_FILE: &str = "template.toml";

/// Raw manifest as written on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TemplateManifest {
    /// Defaults to the directory name.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub resources: ResourceHints,
    #[serde(default)]
    pub steps: Vec<StepSpec>,
    #[serde(default)]
    pub checks: Vec<CheckSpec>,
}

impl TemplateManifest {
    pub fn parse(raw: &str, path: &Path) -> Result<Self> {
        toml::from_str(raw).map_err(|e| CoreError::InvalidManifest {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// Replay the steps through [`TemplateBuilder`] so the usual structural
    /// rules apply. Relative copy sources resolve against `base_dir`.
    pub fn into_template(self, fallback_name: &str, base_dir: &Path) -> Result<LoadedTemplate> {
        let name = self.name.unwrap_or_else(|| fallback_name.to_string());

        let mut builder = TemplateBuilder::new(name);
        for step in self.steps {
            builder = builder.step(resolve_copy_source(step, base_dir));
        }
        if let Some(cpu) = self.resources.cpu_count {
            builder = builder.cpu_count(cpu);
        }
        if let Some(mem) = self.resources.memory_mb {
            builder = builder.memory_mb(mem);
        }
        let spec = builder.build()?;

        for check in &self.checks {
            check.validate()?;
        }

        Ok(LoadedTemplate {
            spec,
            checks: self.checks,
            dir: base_dir.to_path_buf(),
        })
    }
}

fn resolve_copy_source(step: StepSpec, base_dir: &Path) -> StepSpec {
    match step {
        StepSpec::CopySource {
            local_path,
            remote_path,
        } if local_path.is_relative() && !local_path.as_os_str().is_empty() => {
            StepSpec::CopySource {
                local_path: base_dir.join(local_path),
                remote_path,
            }
        }
        other => other,
    }
}

/// A manifest turned into a frozen spec plus its acceptance checks.
#[derive(Debug, Clone)]
pub struct LoadedTemplate {
    pub spec: TemplateSpec,
    pub checks: Vec<CheckSpec>,
    pub dir: PathBuf,
}

impl LoadedTemplate {
    pub fn name(&self) -> &str {
        self.spec.name()
    }
}

/// Directory of templates, one subdirectory each.
#[derive(Debug, Clone)]
pub struct TemplateCatalog {
    root: PathBuf,
}

impl TemplateCatalog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Names of every directory holding a manifest, sorted.
    pub async fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            if tokio::fs::try_exists(entry.path().join(MANIFEST_FILE)).await? {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Load and validate one template.
    pub async fn load(&self, name: &str) -> Result<LoadedTemplate> {
        let dir = self.template_dir(name)?;
        let path = dir.join(MANIFEST_FILE);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CoreError::MissingTemplate(name.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        tracing::debug!(template = %name, path = %path.display(), "loading manifest");
        TemplateManifest::parse(&raw, &path)?.into_template(name, &dir)
    }

    fn template_dir(&self, name: &str) -> Result<PathBuf> {
        let unsafe_name = name.is_empty()
            || name == "."
            || name == ".."
            || name.contains(['/', '\\']);
        if unsafe_name {
            return Err(CoreError::MissingTemplate(name.to_string()));
        }
        Ok(self.root.join(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Expectation, ValidationError};

    const AMP_CODE: &str = r#"
name = "amp-code"

[resources]
cpu_count = 2
memory_mb = 2048

[[steps]]
kind = "base_image"

[[steps]]
kind = "package_install"
packages = ["curl"]

[[steps]]
kind = "copy_source"
local_path = "files"
remote_path = "/opt/files"

[[checks]]
label = "amp"
command = "amp --version"
expect = { stdout_contains = "amp" }
"#;

    #[test]
    fn test_manifest_replays_through_builder() {
        let manifest = TemplateManifest::parse(AMP_CODE, Path::new("template.toml")).unwrap();
        let loaded = manifest
            .into_template("ignored", Path::new("/srv/templates/amp-code"))
            .unwrap();

        assert_eq!(loaded.name(), "amp-code");
        assert_eq!(loaded.spec.steps().len(), 3);
        assert_eq!(loaded.spec.hints().memory_mb, Some(2048));
        assert_eq!(
            loaded.spec.steps()[2],
            StepSpec::CopySource {
                local_path: PathBuf::from("/srv/templates/amp-code/files"),
                remote_path: "/opt/files".to_string(),
            }
        );
        assert!(matches!(
            loaded.checks[0].expect,
            Expectation::StdoutContains(_)
        ));
    }

    #[test]
    fn test_name_defaults_to_directory() {
        let manifest = TemplateManifest::parse(
            "[[steps]]\nkind = \"run_command\"\ncommands = [\"true\"]\n",
            Path::new("template.toml"),
        )
        .unwrap();
        let loaded = manifest.into_template("codex", Path::new("/t/codex")).unwrap();
        assert_eq!(loaded.name(), "codex");
    }

    #[test]
    fn test_misplaced_base_image_is_a_validation_error() {
        let raw = r#"
[[steps]]
kind = "run_command"
commands = ["true"]

[[steps]]
kind = "base_image"
image = "ubuntu:25.04"
"#;
        let err = TemplateManifest::parse(raw, Path::new("template.toml"))
            .unwrap()
            .into_template("t", Path::new("/t"))
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::Validation(ValidationError::BaseImageNotFirst { index: 1 })
        ));
    }

    #[test]
    fn test_unknown_step_kind_is_invalid_manifest() {
        let err = TemplateManifest::parse(
            "[[steps]]\nkind = \"reboot\"\n",
            Path::new("x/template.toml"),
        )
        .unwrap_err();
        match err {
            CoreError::InvalidManifest { path, .. } => assert_eq!(path, "x/template.toml"),
            other => panic!("expected InvalidManifest, got {:?}", other),
        }
    }

    #[test]
    fn test_misspelled_resource_is_invalid_manifest() {
        let err = TemplateManifest::parse(
            "[resources]\ncpu = 4\n\n[[steps]]\nkind = \"run_command\"\ncommands = [\"true\"]\n",
            Path::new("t/template.toml"),
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::InvalidManifest { .. }));
    }

    #[test]
    fn test_path_like_names_are_missing() {
        let catalog = TemplateCatalog::new("/srv/templates");
        for name in ["", "..", "a/b", "."] {
            assert!(matches!(
                catalog.template_dir(name),
                Err(CoreError::MissingTemplate(_))
            ));
        }
    }
}
