//! In-memory fakes for service traits (testing only)
//!
//! Provides `MemoryControlPlane` (build service, tag registry and sandbox
//! provider over one shared state) and `MemoryVersionStore`, satisfying the
//! trait contracts without any network access.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use sha2::{Digest, Sha256};
use tokio::time::Instant;

use crate::error::ServiceError;
use crate::service_traits::*;

// ---------------------------------------------------------------------------
// MemoryControlPlane
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct FakeSession {
    template_ref: String,
    deadline: Instant,
    terminated: bool,
}

#[derive(Debug, Default)]
struct PlaneState {
    /// `name` / `name:tag` -> artifact
    refs: HashMap<String, ArtifactRef>,
    /// command line -> (exit code, output) for failing build steps
    step_failures: HashMap<String, (i32, String)>,
    /// build target -> indices of steps executed by the last build
    executed_steps: HashMap<String, Vec<usize>>,
    builds_submitted: u64,
    responses: HashMap<String, CommandOutput>,
    delays: HashMap<String, Duration>,
    sessions: HashMap<String, FakeSession>,
    commands_run: HashMap<String, Vec<String>>,
    teardowns: HashMap<String, u32>,
    unavailable: bool,
    fail_teardown: bool,
}

/// In-memory control plane: builds, tags and sandboxes share one registry.
///
/// Build steps succeed unless a command line was scripted to fail with
/// [`MemoryControlPlane::fail_step`]. Sandbox commands answer from
/// [`MemoryControlPlane::respond`]; anything else exits 127.
#[derive(Debug, Default)]
pub struct MemoryControlPlane {
    state: Mutex<PlaneState>,
}

impl MemoryControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make any build step containing `command_line` fail.
    pub fn fail_step(&self, command_line: &str, exit_code: i32, output: &str) {
        let mut state = self.state.lock().unwrap();
        state
            .step_failures
            .insert(command_line.to_string(), (exit_code, output.to_string()));
    }

    /// Script the output of a sandbox command.
    pub fn respond(&self, command: &str, output: CommandOutput) {
        let mut state = self.state.lock().unwrap();
        state.responses.insert(command.to_string(), output);
    }

    /// Make a sandbox command take `delay` before answering.
    pub fn delay(&self, command: &str, delay: Duration) {
        let mut state = self.state.lock().unwrap();
        state.delays.insert(command.to_string(), delay);
    }

    /// Simulate a transport outage for every call.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unwrap().unavailable = unavailable;
    }

    /// Make `terminate` fail (the session is still marked terminated).
    pub fn set_fail_teardown(&self, fail: bool) {
        self.state.lock().unwrap().fail_teardown = fail;
    }

    /// Point `reference` at an artifact without building.
    pub fn publish(&self, reference: &str, artifact: ArtifactRef) {
        let mut state = self.state.lock().unwrap();
        state.refs.insert(reference.to_string(), artifact);
    }

    /// Step indices executed by the most recent build of `target`.
    pub fn executed_steps(&self, target: &str) -> Vec<usize> {
        let state = self.state.lock().unwrap();
        state.executed_steps.get(target).cloned().unwrap_or_default()
    }

    pub fn builds_submitted(&self) -> u64 {
        self.state.lock().unwrap().builds_submitted
    }

    /// Commands run in a session, in order.
    pub fn commands_run(&self, session_id: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state.commands_run.get(session_id).cloned().unwrap_or_default()
    }

    /// Number of `terminate` calls received for a session.
    pub fn teardown_count(&self, session_id: &str) -> u32 {
        let state = self.state.lock().unwrap();
        state.teardowns.get(session_id).copied().unwrap_or(0)
    }

    /// Ids of every session ever created.
    pub fn session_ids(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let mut ids: Vec<String> = state.sessions.keys().cloned().collect();
        ids.sort();
        ids
    }

    fn check_available(state: &PlaneState) -> ServiceResult<()> {
        if state.unavailable {
            return Err(ServiceError::Unavailable(
                "control plane unreachable".to_string(),
            ));
        }
        Ok(())
    }
}

/// Command lines a step executes, as the fake matches them.
fn step_command_lines(step: &BuildStep) -> Vec<String> {
    match step {
        BuildStep::BaseImage { image } => vec![format!("FROM {}", image)],
        BuildStep::PackageInstall { packages } => {
            vec![format!("apt-get install -y {}", packages.join(" "))]
        }
        BuildStep::RunCommand { commands } => commands.clone(),
        BuildStep::CopySource {
            local_path,
            remote_path,
        } => vec![format!("COPY {} {}", local_path.display(), remote_path)],
        BuildStep::SetWorkdir { path } => vec![format!("WORKDIR {}", path)],
    }
}

fn artifact_for(request: &BuildRequest) -> ServiceResult<ArtifactRef> {
    let payload = serde_json::to_vec(request)?;
    let mut hasher = Sha256::new();
    hasher.update(&payload);
    Ok(ArtifactRef(format!("sha256:{}", hex::encode(hasher.finalize()))))
}

#[async_trait]
impl BuildService for MemoryControlPlane {
    async fn submit(&self, request: &BuildRequest) -> ServiceResult<BuildEventStream> {
        let mut state = self.state.lock().unwrap();
        Self::check_available(&state)?;
        state.builds_submitted += 1;

        let target = request.target();
        let mut events = Vec::new();
        let mut executed = Vec::new();
        let mut failed = false;

        'steps: for (index, step) in request.steps.iter().enumerate() {
            events.push(BuildEvent::StepStarted { index });
            executed.push(index);
            for line in step_command_lines(step) {
                events.push(BuildEvent::Log(LogRecord::info(
                    Some(index),
                    format!("RUN {}", line),
                )));
                if let Some((exit_code, output)) = state.step_failures.get(&line) {
                    events.push(BuildEvent::StepFailed {
                        index,
                        exit_code: Some(*exit_code),
                        output: output.clone(),
                    });
                    failed = true;
                    break 'steps;
                }
            }
        }

        if !failed {
            let artifact = artifact_for(request)?;
            state.refs.insert(target.clone(), artifact.clone());
            events.push(BuildEvent::Log(LogRecord::info(
                None,
                format!("published {} as {}", artifact, target),
            )));
            events.push(BuildEvent::Completed { artifact });
        }
        state.executed_steps.insert(target, executed);

        Ok(stream::iter(events.into_iter().map(Ok)).boxed())
    }
}

#[async_trait]
impl TagRegistry for MemoryControlPlane {
    async fn assign_tags(&self, target: &str, tags: &[String]) -> ServiceResult<ArtifactRef> {
        let mut state = self.state.lock().unwrap();
        Self::check_available(&state)?;

        let artifact = state
            .refs
            .get(target)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound {
                reference: target.to_string(),
            })?;
        let (name, _) = split_template_ref(target);
        for tag in tags {
            state
                .refs
                .insert(template_ref(name, Some(tag)), artifact.clone());
        }
        Ok(artifact)
    }

    async fn resolve(&self, reference: &str) -> ServiceResult<ArtifactRef> {
        let state = self.state.lock().unwrap();
        Self::check_available(&state)?;
        state
            .refs
            .get(reference)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound {
                reference: reference.to_string(),
            })
    }
}

#[async_trait]
impl SandboxProvider for MemoryControlPlane {
    async fn create(&self, template_ref: &str, timeout_ms: u64) -> ServiceResult<SessionHandle> {
        let mut state = self.state.lock().unwrap();
        Self::check_available(&state)?;
        if !state.refs.contains_key(template_ref) {
            return Err(ServiceError::NotFound {
                reference: template_ref.to_string(),
            });
        }

        let session_id = format!("sbx-{}", uuid::Uuid::new_v4().simple());
        state.sessions.insert(
            session_id.clone(),
            FakeSession {
                template_ref: template_ref.to_string(),
                deadline: Instant::now() + Duration::from_millis(timeout_ms),
                terminated: false,
            },
        );
        Ok(SessionHandle {
            session_id,
            template_ref: template_ref.to_string(),
        })
    }

    async fn run(&self, handle: &SessionHandle, command: &str) -> ServiceResult<CommandOutput> {
        let delay = {
            let mut state = self.state.lock().unwrap();
            Self::check_available(&state)?;
            let session = state
                .sessions
                .get_mut(&handle.session_id)
                .ok_or_else(|| ServiceError::NotFound {
                    reference: handle.session_id.clone(),
                })?;
            if Instant::now() >= session.deadline {
                session.terminated = true;
            }
            if session.terminated {
                return Err(ServiceError::SessionTerminated {
                    session_id: handle.session_id.clone(),
                });
            }
            debug_assert_eq!(session.template_ref, handle.template_ref);
            state
                .commands_run
                .entry(handle.session_id.clone())
                .or_default()
                .push(command.to_string());
            state.delays.get(command).copied()
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let state = self.state.lock().unwrap();
        Ok(state.responses.get(command).cloned().unwrap_or_else(|| {
            CommandOutput::failure(127, format!("sh: 1: {}: not found\n", command))
        }))
    }

    async fn terminate(&self, handle: &SessionHandle) -> ServiceResult<()> {
        let mut state = self.state.lock().unwrap();
        *state
            .teardowns
            .entry(handle.session_id.clone())
            .or_insert(0) += 1;
        if let Some(session) = state.sessions.get_mut(&handle.session_id) {
            session.terminated = true;
        }
        if state.fail_teardown {
            return Err(ServiceError::Unavailable(format!(
                "teardown of {} failed",
                handle.session_id
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryVersionStore
// ---------------------------------------------------------------------------

/// In-memory version records backed by a `HashMap<template, version>`.
#[derive(Debug, Default)]
pub struct MemoryVersionStore {
    versions: Mutex<HashMap<String, String>>,
}

impl MemoryVersionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, template: &str, version: &str) {
        let mut versions = self.versions.lock().unwrap();
        versions.insert(template.to_string(), version.to_string());
    }
}

#[async_trait]
impl VersionStore for MemoryVersionStore {
    async fn read_version(&self, template: &str) -> ServiceResult<String> {
        let versions = self.versions.lock().unwrap();
        versions
            .get(template)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound {
                reference: template.to_string(),
            })
    }
}
