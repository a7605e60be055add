//! Host-side sandbox provider for dry-running checks.
//!
//! Each session is a private temporary directory; commands run through
//! `sh -c` inside it. No image is involved, so the template reference is
//! only recorded.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use sandcast_state::{CommandOutput, SandboxProvider, ServiceError, ServiceResult, SessionHandle};
use tempfile::TempDir;
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::time::Instant;

struct LocalSession {
    dir: TempDir,
    deadline: Instant,
}

/// Runs sandbox commands on the local host.
#[derive(Default)]
pub struct LocalShellProvider {
    shell: Option<PathBuf>,
    sessions: Mutex<HashMap<String, LocalSession>>,
}

impl LocalShellProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific shell binary instead of `sh` from `PATH`.
    pub fn with_shell(mut self, shell: impl Into<PathBuf>) -> Self {
        self.shell = Some(shell.into());
        self
    }

    /// Working directory of a live session.
    pub async fn session_dir(&self, session_id: &str) -> Option<PathBuf> {
        let sessions = self.sessions.lock().await;
        sessions.get(session_id).map(|s| s.dir.path().to_path_buf())
    }
}

#[async_trait]
impl SandboxProvider for LocalShellProvider {
    async fn create(&self, template_ref: &str, timeout_ms: u64) -> ServiceResult<SessionHandle> {
        let dir = tempfile::Builder::new().prefix("sandcast-").tempdir()?;
        let session_id = dir
            .path()
            .file_name()
            .map(|n| format!("local-{}", n.to_string_lossy()))
            .ok_or_else(|| ServiceError::Unavailable("temporary directory has no name".into()))?;

        tracing::debug!(
            session_id = %session_id,
            dir = %dir.path().display(),
            "local session created"
        );
        self.sessions.lock().await.insert(
            session_id.clone(),
            LocalSession {
                dir,
                deadline: Instant::now() + Duration::from_millis(timeout_ms),
            },
        );

        Ok(SessionHandle {
            session_id,
            template_ref: template_ref.to_string(),
        })
    }

    async fn run(&self, handle: &SessionHandle, command: &str) -> ServiceResult<CommandOutput> {
        let dir = {
            let sessions = self.sessions.lock().await;
            match sessions.get(&handle.session_id) {
                Some(s) if Instant::now() < s.deadline => s.dir.path().to_path_buf(),
                _ => {
                    return Err(ServiceError::SessionTerminated {
                        session_id: handle.session_id.clone(),
                    })
                }
            }
        };

        let shell = self
            .shell
            .clone()
            .unwrap_or_else(|| PathBuf::from("sh"));
        let output = Command::new(shell)
            .arg("-c")
            .arg(command)
            .current_dir(&dir)
            .env("HOME", &dir)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        Ok(CommandOutput {
            // Killed by a signal: no exit code.
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn terminate(&self, handle: &SessionHandle) -> ServiceResult<()> {
        let removed = self.sessions.lock().await.remove(&handle.session_id);
        if let Some(session) = removed {
            session.dir.close()?;
        }
        Ok(())
    }
}
