//! Service trait definitions for sandcast
//!
//! These traits define the external collaborators the core talks to:
//! - `BuildService`: turns a build request into a stream of build events
//! - `TagRegistry`: atomic tag (pointer) assignment on built artifacts
//! - `SandboxProvider`: sandbox lifecycle and command channel
//! - `VersionStore`: read-only `MAJOR.MINOR.PATCH` records per template
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! for testing via the `fakes` module.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::ServiceError;

/// Result type for service operations
pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

/// Compose a template reference: `name` or `name:tag`.
pub fn template_ref(name: &str, tag: Option<&str>) -> String {
    match tag {
        Some(tag) if !tag.is_empty() => format!("{}:{}", name, tag),
        _ => name.to_string(),
    }
}

/// Split `name:tag` into its parts. A bare name has no tag.
pub fn split_template_ref(reference: &str) -> (&str, Option<&str>) {
    match reference.split_once(':') {
        Some((name, tag)) => (name, Some(tag)),
        None => (reference, None),
    }
}

// ---------------------------------------------------------------------------
// BuildService: template image builds
// ---------------------------------------------------------------------------

/// Opaque reference to a built artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactRef(pub String);

impl ArtifactRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One provisioning step as sent to the build service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BuildStep {
    BaseImage { image: String },
    PackageInstall { packages: Vec<String> },
    RunCommand { commands: Vec<String> },
    CopySource { local_path: PathBuf, remote_path: String },
    SetWorkdir { path: String },
}

/// Payload submitted to the build service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRequest {
    /// Template name
    pub template: String,
    /// Tag applied to the artifact on success (bare name when absent)
    pub tag: Option<String>,
    /// Ordered steps
    pub steps: Vec<BuildStep>,
    /// vCPUs for the template's sandboxes
    pub cpu_count: u32,
    /// Memory in MiB for the template's sandboxes
    pub memory_mb: u32,
}

impl BuildRequest {
    /// Reference the artifact is published under (`name` or `name:tag`).
    pub fn target(&self) -> String {
        template_ref(&self.template, self.tag.as_deref())
    }
}

/// Severity of a build log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// A single log line produced by the build service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    /// Index of the step that produced the line, if any
    pub step: Option<usize>,
}

impl LogRecord {
    pub fn info(step: Option<usize>, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level: LogLevel::Info,
            message: message.into(),
            step,
        }
    }
}

/// Events emitted while a build runs.
///
/// `StepFailed`, `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BuildEvent {
    StepStarted {
        index: usize,
    },
    Log(LogRecord),
    StepFailed {
        index: usize,
        exit_code: Option<i32>,
        output: String,
    },
    Completed {
        artifact: ArtifactRef,
    },
    Failed {
        reason: String,
    },
}

impl BuildEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BuildEvent::StepFailed { .. } | BuildEvent::Completed { .. } | BuildEvent::Failed { .. }
        )
    }
}

/// Finite stream of build events; transport errors surface as `Err` items.
pub type BuildEventStream = BoxStream<'static, ServiceResult<BuildEvent>>;

/// Remote template build service.
///
/// Guarantees:
/// - Steps run in the order given; the first failing step ends the build.
/// - The stream ends after exactly one terminal event.
/// - A failed build publishes no artifact.
#[async_trait]
pub trait BuildService: Send + Sync {
    /// Submit a build and return its event stream.
    async fn submit(&self, request: &BuildRequest) -> ServiceResult<BuildEventStream>;
}

// ---------------------------------------------------------------------------
// TagRegistry: tag pointers on built artifacts
// ---------------------------------------------------------------------------

/// Artifact tag registry.
///
/// Semantics:
/// - `assign_tags` resolves `target` (`name:tag`) to an artifact and points
///   every tag in `tags` at it, all or nothing.
/// - Re-tagging never rebuilds.
#[async_trait]
pub trait TagRegistry: Send + Sync {
    /// Assign `tags` to the artifact currently referenced by `target`.
    async fn assign_tags(&self, target: &str, tags: &[String]) -> ServiceResult<ArtifactRef>;

    /// Resolve `name` or `name:tag` to the artifact it points at.
    async fn resolve(&self, reference: &str) -> ServiceResult<ArtifactRef>;
}

// ---------------------------------------------------------------------------
// SandboxProvider: sandbox lifecycle and command channel
// ---------------------------------------------------------------------------

/// Handle to a provisioned sandbox
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionHandle {
    pub session_id: String,
    pub template_ref: String,
}

impl std::fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.session_id)
    }
}

/// Captured result of one command run inside a sandbox
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

/// Sandbox provisioning service.
///
/// Guarantees:
/// - `create` either returns a running session or an error (nothing to tear down).
/// - The service terminates a session on its own once `timeout_ms` elapses.
/// - `terminate` is idempotent: terminating a gone session succeeds.
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    /// Provision a sandbox from `template_ref` with an absolute lifetime.
    async fn create(&self, template_ref: &str, timeout_ms: u64) -> ServiceResult<SessionHandle>;

    /// Run a shell command inside the sandbox and capture its output.
    async fn run(&self, handle: &SessionHandle, command: &str) -> ServiceResult<CommandOutput>;

    /// Tear the sandbox down.
    async fn terminate(&self, handle: &SessionHandle) -> ServiceResult<()>;
}

// ---------------------------------------------------------------------------
// VersionStore: persisted template versions
// ---------------------------------------------------------------------------

/// Read-only version records keyed by template name.
#[async_trait]
pub trait VersionStore: Send + Sync {
    /// Raw stored version string for `template`.
    async fn read_version(&self, template: &str) -> ServiceResult<String>;
}

// ---------------------------------------------------------------------------
// Shared handles
// ---------------------------------------------------------------------------

#[async_trait]
impl<T: BuildService + ?Sized> BuildService for std::sync::Arc<T> {
    async fn submit(&self, request: &BuildRequest) -> ServiceResult<BuildEventStream> {
        (**self).submit(request).await
    }
}

#[async_trait]
impl<T: TagRegistry + ?Sized> TagRegistry for std::sync::Arc<T> {
    async fn assign_tags(&self, target: &str, tags: &[String]) -> ServiceResult<ArtifactRef> {
        (**self).assign_tags(target, tags).await
    }

    async fn resolve(&self, reference: &str) -> ServiceResult<ArtifactRef> {
        (**self).resolve(reference).await
    }
}

#[async_trait]
impl<T: SandboxProvider + ?Sized> SandboxProvider for std::sync::Arc<T> {
    async fn create(&self, template_ref: &str, timeout_ms: u64) -> ServiceResult<SessionHandle> {
        (**self).create(template_ref, timeout_ms).await
    }

    async fn run(&self, handle: &SessionHandle, command: &str) -> ServiceResult<CommandOutput> {
        (**self).run(handle, command).await
    }

    async fn terminate(&self, handle: &SessionHandle) -> ServiceResult<()> {
        (**self).terminate(handle).await
    }
}

#[async_trait]
impl<T: VersionStore + ?Sized> VersionStore for std::sync::Arc<T> {
    async fn read_version(&self, template: &str) -> ServiceResult<String> {
        (**self).read_version(template).await
    }
}
