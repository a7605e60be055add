//! Provisioning steps.

use std::path::PathBuf;

use sandcast_state::BuildStep;
use serde::{Deserialize, Serialize};

use super::error::ValidationError;

/// Base image used when a template does not name one.
pub const DEFAULT_BASE_IMAGE: &str = "base";

/// One provisioning action in a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepSpec {
    /// Select the image the template starts from.
    BaseImage {
        #[serde(default = "default_base_image")]
        image: String,
    },

    /// Install system packages, in order.
    PackageInstall { packages: Vec<String> },

    /// Run shell commands, in order, in one layer.
    RunCommand { commands: Vec<String> },

    /// Copy a local file tree into the image.
    CopySource {
        local_path: PathBuf,
        remote_path: String,
    },

    /// Set the working directory for later steps and for sandboxes.
    SetWorkdir { path: String },
}

fn default_base_image() -> String {
    DEFAULT_BASE_IMAGE.to_string()
}

impl StepSpec {
    /// Short step kind, as used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            StepSpec::BaseImage { .. } => "base_image",
            StepSpec::PackageInstall { .. } => "package_install",
            StepSpec::RunCommand { .. } => "run_command",
            StepSpec::CopySource { .. } => "copy_source",
            StepSpec::SetWorkdir { .. } => "set_workdir",
        }
    }

    /// One-line human description.
    pub fn describe(&self) -> String {
        match self {
            StepSpec::BaseImage { image } => format!("FROM {}", image),
            StepSpec::PackageInstall { packages } => format!("INSTALL {}", packages.join(" ")),
            StepSpec::RunCommand { commands } => format!("RUN {}", commands.join(" && ")),
            StepSpec::CopySource {
                local_path,
                remote_path,
            } => format!("COPY {} {}", local_path.display(), remote_path),
            StepSpec::SetWorkdir { path } => format!("WORKDIR {}", path),
        }
    }

    /// Structural checks only: no empty lists, paths or entries.
    ///
    /// Shell commands are not parsed; a bad command fails at build time.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            StepSpec::BaseImage { image } => non_empty(image, "base image"),
            StepSpec::PackageInstall { packages } => non_empty_list(packages, "package list"),
            StepSpec::RunCommand { commands } => non_empty_list(commands, "command list"),
            StepSpec::CopySource {
                local_path,
                remote_path,
            } => {
                if local_path.as_os_str().is_empty() {
                    return Err(ValidationError::EmptyField {
                        field: "copy local path",
                    });
                }
                non_empty(remote_path, "copy remote path")
            }
            StepSpec::SetWorkdir { path } => non_empty(path, "workdir"),
        }
    }
}

fn non_empty(value: &str, field: &'static str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::EmptyField { field });
    }
    Ok(())
}

fn non_empty_list(values: &[String], field: &'static str) -> Result<(), ValidationError> {
    if values.is_empty() || values.iter().any(|v| v.trim().is_empty()) {
        return Err(ValidationError::EmptyField { field });
    }
    Ok(())
}

impl From<&StepSpec> for BuildStep {
    fn from(step: &StepSpec) -> Self {
        match step {
            StepSpec::BaseImage { image } => BuildStep::BaseImage {
                image: image.clone(),
            },
            StepSpec::PackageInstall { packages } => BuildStep::PackageInstall {
                packages: packages.clone(),
            },
            StepSpec::RunCommand { commands } => BuildStep::RunCommand {
                commands: commands.clone(),
            },
            StepSpec::CopySource {
                local_path,
                remote_path,
            } => BuildStep::CopySource {
                local_path: local_path.clone(),
                remote_path: remote_path.clone(),
            },
            StepSpec::SetWorkdir { path } => BuildStep::SetWorkdir { path: path.clone() },
        }
    }
}
