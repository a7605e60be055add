//! Template build execution against the remote build service.

use std::time::{Duration, Instant};

use futures::StreamExt;
use sandcast_core::domain::{StepSpec, TemplateSpec, ValidationError};
use sandcast_core::{obs, BuildConfig};
use sandcast_state::{
    ArtifactRef, BuildEvent, BuildEventStream, BuildRequest, BuildService, BuildStep, ServiceError,
};
use serde::Serialize;
use tracing::Instrument;

use crate::report::{first_line, last_line};
use crate::sink::BuildLogSink;

/// Errors that end a build without a [`BuildResult`], plus the
/// conversion of a failed result via [`BuildResult::ensure_success`].
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error(
        "build of {target} failed at step {index} ({}): {}",
        first_line(.step),
        last_line(.output)
    )]
    StepFailed {
        target: String,
        index: usize,
        step: String,
        exit_code: Option<i32>,
        output: String,
    },

    #[error("build of {target} failed: {}", last_line(.reason))]
    Failed { target: String, reason: String },

    #[error("build service unavailable while building {target}: {source}")]
    ServiceUnavailable {
        target: String,
        #[source]
        source: ServiceError,
    },

    #[error("build service rejected {target}: {source}")]
    Service {
        target: String,
        #[source]
        source: ServiceError,
    },

    #[error("build service protocol error for {target}: {reason}")]
    Protocol { target: String, reason: String },

    #[error("build of {target} timed out after {timeout_ms}ms")]
    TimedOut { target: String, timeout_ms: u64 },
}

impl BuildError {
    fn from_service(target: &str, source: ServiceError) -> Self {
        if source.is_transport() {
            BuildError::ServiceUnavailable {
                target: target.to_string(),
                source,
            }
        } else {
            BuildError::Service {
                target: target.to_string(),
                source,
            }
        }
    }
}

/// The step a failed build stopped at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedStep {
    pub index: usize,
    /// Human description of the step, e.g. `RUN curl -V`.
    pub step: String,
    pub exit_code: Option<i32>,
    /// Output captured from the failing step.
    pub output: String,
}

/// Outcome of one build attempt. Owned by the caller.
#[derive(Debug, Clone, Serialize)]
pub struct BuildResult {
    /// Reference the build publishes under (`name` or `name:tag`).
    pub target: String,
    /// Tag applied by this build, if one was requested.
    pub applied_tag: Option<String>,
    /// Present only when the build succeeded.
    pub artifact_ref: Option<ArtifactRef>,
    pub succeeded: bool,
    pub failed_step: Option<FailedStep>,
    /// Service-side failure not tied to a step.
    pub failure_reason: Option<String>,
    /// Every event received, in arrival order.
    pub log_events: Vec<BuildEvent>,
    pub spec_digest: String,
    pub duration_ms: u64,
}

impl BuildResult {
    /// Turn a failed result into the matching [`BuildError`].
    pub fn ensure_success(self) -> Result<Self, BuildError> {
        if self.succeeded {
            return Ok(self);
        }
        match self.failed_step {
            Some(failed) => Err(BuildError::StepFailed {
                target: self.target,
                index: failed.index,
                step: failed.step,
                exit_code: failed.exit_code,
                output: failed.output,
            }),
            None => Err(BuildError::Failed {
                target: self.target,
                reason: self
                    .failure_reason
                    .unwrap_or_else(|| "unknown failure".to_string()),
            }),
        }
    }
}

/// Drives a [`TemplateSpec`] through a build service.
///
/// The executor holds no per-build state: every `execute` call is an
/// independent attempt, and a failed build is never resumed.
pub struct BuildExecutor<S> {
    service: S,
    timeout: Option<Duration>,
}

impl<S> BuildExecutor<S>
where
    S: BuildService,
{
    pub fn new(service: S) -> Self {
        Self {
            service,
            timeout: None,
        }
    }

    /// Abandon the build if no terminal event arrives within `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build `spec` and stream progress to `sink`.
    ///
    /// A failing step yields `Ok` with `succeeded == false`; transport and
    /// protocol problems yield `Err`.
    pub async fn execute(
        &self,
        spec: &TemplateSpec,
        config: &BuildConfig,
        sink: &mut dyn BuildLogSink,
    ) -> Result<BuildResult, BuildError> {
        let spec = spec.with_default_hints(config.hints())?;
        let target = config.target(spec.name());
        let digest = spec.digest();
        let request = BuildRequest {
            template: spec.name().to_string(),
            tag: config.tag_override.clone(),
            steps: spec.steps().iter().map(BuildStep::from).collect(),
            cpu_count: spec.hints().cpu_count_or_default(),
            memory_mb: spec.hints().memory_mb_or_default(),
        };

        let span = obs::build_span(&target, &digest);
        let drive = self.drive(&spec, &request, &target, &digest, sink);
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, drive.instrument(span))
                .await
                .map_err(|_| BuildError::TimedOut {
                    target: target.clone(),
                    timeout_ms: limit.as_millis() as u64,
                })?,
            None => drive.instrument(span).await,
        }
    }

    async fn drive(
        &self,
        spec: &TemplateSpec,
        request: &BuildRequest,
        target: &str,
        digest: &str,
        sink: &mut dyn BuildLogSink,
    ) -> Result<BuildResult, BuildError> {
        let start = Instant::now();
        obs::emit_build_started(target, digest, spec.steps().len());

        let stream = self
            .service
            .submit(request)
            .await
            .map_err(|e| BuildError::from_service(target, e))?;

        let outcome = consume(stream, spec.steps(), target, sink).await?;

        let duration_ms = start.elapsed().as_millis() as u64;
        let (artifact_ref, failed_step, failure_reason) = match outcome.terminal {
            Terminal::Completed(artifact) => (Some(artifact), None, None),
            Terminal::StepFailed(failed) => (None, Some(failed), None),
            Terminal::Failed(reason) => (None, None, Some(reason)),
        };
        let succeeded = artifact_ref.is_some();
        obs::emit_build_finished(
            target,
            duration_ms,
            succeeded,
            failed_step.as_ref().map(|f| f.index),
        );

        Ok(BuildResult {
            target: target.to_string(),
            applied_tag: request.tag.clone(),
            artifact_ref,
            succeeded,
            failed_step,
            failure_reason,
            log_events: outcome.events,
            spec_digest: digest.to_string(),
            duration_ms,
        })
    }
}

enum Terminal {
    Completed(ArtifactRef),
    StepFailed(FailedStep),
    Failed(String),
}

struct StreamOutcome {
    events: Vec<BuildEvent>,
    terminal: Terminal,
}

/// Read events until the first terminal one, checking that step indices
/// only move forward and stay within the declared steps.
async fn consume(
    mut stream: BuildEventStream,
    steps: &[StepSpec],
    target: &str,
    sink: &mut dyn BuildLogSink,
) -> Result<StreamOutcome, BuildError> {
    let protocol = |reason: String| BuildError::Protocol {
        target: target.to_string(),
        reason,
    };
    let mut events = Vec::new();
    let mut current: Option<usize> = None;

    while let Some(item) = stream.next().await {
        let event = item.map_err(|e| BuildError::from_service(target, e))?;
        sink.on_event(&event);
        events.push(event.clone());

        match event {
            BuildEvent::StepStarted { index } => {
                if index >= steps.len() {
                    return Err(protocol(format!(
                        "step {} started but only {} declared",
                        index,
                        steps.len()
                    )));
                }
                if current.is_some_and(|c| index <= c) {
                    return Err(protocol(format!("step {} started out of order", index)));
                }
                current = Some(index);
                obs::emit_build_step(target, index, steps[index].kind());
            }
            BuildEvent::Log(_) => {}
            BuildEvent::StepFailed {
                index,
                exit_code,
                output,
            } => {
                let step = steps
                    .get(index)
                    .ok_or_else(|| protocol(format!("unknown failing step {}", index)))?;
                if current != Some(index) {
                    return Err(protocol(format!(
                        "step {} failed but the running step is {:?}",
                        index, current
                    )));
                }
                return Ok(StreamOutcome {
                    events,
                    terminal: Terminal::StepFailed(FailedStep {
                        index,
                        step: step.describe(),
                        exit_code,
                        output,
                    }),
                });
            }
            BuildEvent::Completed { artifact } => {
                return Ok(StreamOutcome {
                    events,
                    terminal: Terminal::Completed(artifact),
                });
            }
            BuildEvent::Failed { reason } => {
                return Ok(StreamOutcome {
                    events,
                    terminal: Terminal::Failed(reason),
                });
            }
        }
    }

    Err(BuildError::ServiceUnavailable {
        target: target.to_string(),
        source: ServiceError::Unavailable("event stream ended before the build finished".into()),
    })
}
