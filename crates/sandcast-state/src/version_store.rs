//! Filesystem version store: one `version` file per template directory.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::error::ServiceError;
use crate::service_traits::{ServiceResult, VersionStore};

/// File name holding the `MAJOR.MINOR.PATCH` string inside a template directory.
pub const VERSION_FILE: &str = "version";

/// Reads `<root>/<template>/version`.
#[derive(Debug, Clone)]
pub struct FsVersionStore {
    root: PathBuf,
}

impl FsVersionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the version file for `template`.
    pub fn version_path(&self, template: &str) -> PathBuf {
        self.root.join(template).join(VERSION_FILE)
    }
}

#[async_trait]
impl VersionStore for FsVersionStore {
    async fn read_version(&self, template: &str) -> ServiceResult<String> {
        let path = self.version_path(template);
        debug!(path = %path.display(), "reading version file");
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Ok(contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ServiceError::NotFound {
                reference: path.display().to_string(),
            }),
            Err(e) => Err(ServiceError::Io(e)),
        }
    }
}
