//! One provisioned sandbox and its command channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use sandcast_state::{CommandOutput, SandboxProvider, ServiceError, SessionHandle};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::error::{SessionError, SessionResult};
use crate::obs;

/// Lifecycle of a session.
///
/// `Requested` covers provisioning; a [`SandboxSession`] value only exists
/// once provisioning succeeded, so it reports `Running` or `Terminated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Requested,
    Running,
    Terminated,
}

/// A running sandbox created from a template reference.
///
/// Guarantees:
/// - `run` calls are serialized; a second caller waits for the first.
/// - After `timeout_ms` from creation every `run` fails with `TimedOut`,
///   including one already in flight.
/// - `teardown` reaches the provider at most once. A session dropped
///   without teardown schedules one on the current runtime.
pub struct SandboxSession {
    provider: Arc<dyn SandboxProvider>,
    handle: SessionHandle,
    created_at: DateTime<Utc>,
    timeout_ms: u64,
    deadline: Instant,
    run_lock: Mutex<()>,
    expired: AtomicBool,
    teardown_issued: AtomicBool,
}

/// Outcome of [`SandboxSession::scoped`]: the body's value plus the
/// teardown result, kept apart so one never masks the other.
#[derive(Debug)]
pub struct Scoped<T> {
    pub value: T,
    pub teardown: SessionResult<()>,
}

impl SandboxSession {
    /// Provision a session from `template_ref` (`name` or `name:tag`).
    ///
    /// A provisioning failure leaves nothing to tear down.
    pub async fn open(
        provider: Arc<dyn SandboxProvider>,
        template_ref: &str,
        timeout_ms: u64,
    ) -> SessionResult<Self> {
        if timeout_ms == 0 {
            return Err(SessionError::InvalidConfig(
                "timeout_ms must be positive".to_string(),
            ));
        }

        // The provider's clock starts when it receives the request.
        let requested_at = Instant::now();
        let created_at = Utc::now();
        let handle = provider
            .create(template_ref, timeout_ms)
            .await
            .map_err(|source| SessionError::ProvisionFailed {
                template_ref: template_ref.to_string(),
                source,
            })?;

        obs::emit_session_created(&handle.session_id, &handle.template_ref, timeout_ms);

        Ok(Self {
            provider,
            handle,
            created_at,
            timeout_ms,
            deadline: requested_at + Duration::from_millis(timeout_ms),
            run_lock: Mutex::new(()),
            expired: AtomicBool::new(false),
            teardown_issued: AtomicBool::new(false),
        })
    }

    /// Open a session, run `body` against it, then tear it down whatever
    /// `body` returned.
    pub async fn scoped<T, F>(
        provider: Arc<dyn SandboxProvider>,
        template_ref: &str,
        timeout_ms: u64,
        body: F,
    ) -> SessionResult<Scoped<T>>
    where
        F: for<'a> FnOnce(&'a SandboxSession) -> BoxFuture<'a, T>,
    {
        let session = Self::open(provider, template_ref, timeout_ms).await?;
        let value = body(&session).await;
        let teardown = session.teardown().await;
        Ok(Scoped { value, teardown })
    }

    pub fn id(&self) -> &str {
        &self.handle.session_id
    }

    pub fn template_ref(&self) -> &str {
        &self.handle.template_ref
    }

    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    pub fn state(&self) -> SessionState {
        if self.teardown_issued.load(Ordering::SeqCst)
            || self.expired.load(Ordering::SeqCst)
            || Instant::now() >= self.deadline
        {
            SessionState::Terminated
        } else {
            SessionState::Running
        }
    }

    /// Time left before the session expires.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Run one shell command and capture its output.
    ///
    /// A non-zero exit code is a normal result, not an error.
    pub async fn run(&self, command: &str) -> SessionResult<CommandOutput> {
        self.ensure_live()?;

        let _guard = tokio::time::timeout_at(self.deadline, self.run_lock.lock())
            .await
            .map_err(|_| self.expire())?;
        self.ensure_live()?;

        tracing::debug!(session_id = %self.id(), command = %command, "running command");
        match tokio::time::timeout_at(self.deadline, self.provider.run(&self.handle, command)).await
        {
            Err(_elapsed) => Err(self.expire()),
            Ok(Ok(output)) => Ok(output),
            Ok(Err(ServiceError::SessionTerminated { .. })) => {
                if Instant::now() >= self.deadline {
                    Err(self.expire())
                } else {
                    Err(SessionError::Terminated {
                        session_id: self.id().to_string(),
                    })
                }
            }
            Ok(Err(source)) => Err(SessionError::Transport {
                session_id: self.id().to_string(),
                command: command.to_string(),
                source,
            }),
        }
    }

    /// Release the sandbox. Terminal and idempotent: only the first call
    /// reaches the provider, later calls return `Ok(())`.
    pub async fn teardown(&self) -> SessionResult<()> {
        if self.teardown_issued.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        match self.provider.terminate(&self.handle).await {
            Ok(()) => {
                obs::emit_session_terminated(self.id(), "teardown");
                Ok(())
            }
            Err(source) => {
                obs::emit_session_teardown_error(self.id(), &source);
                Err(SessionError::TeardownFailed {
                    session_id: self.id().to_string(),
                    source,
                })
            }
        }
    }

    fn ensure_live(&self) -> SessionResult<()> {
        if self.teardown_issued.load(Ordering::SeqCst) {
            return Err(SessionError::Terminated {
                session_id: self.id().to_string(),
            });
        }
        if self.expired.load(Ordering::SeqCst) || Instant::now() >= self.deadline {
            return Err(self.expire());
        }
        Ok(())
    }

    fn expire(&self) -> SessionError {
        if !self.expired.swap(true, Ordering::SeqCst) {
            obs::emit_session_terminated(self.id(), "timeout");
        }
        SessionError::TimedOut {
            session_id: self.id().to_string(),
            timeout_ms: self.timeout_ms,
        }
    }
}

impl std::fmt::Debug for SandboxSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxSession")
            .field("handle", &self.handle)
            .field("created_at", &self.created_at)
            .field("timeout_ms", &self.timeout_ms)
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for SandboxSession {
    fn drop(&mut self) {
        if self.teardown_issued.swap(true, Ordering::SeqCst) {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(
                session_id = %self.id(),
                "session dropped outside a runtime; teardown skipped"
            );
            return;
        };

        let provider = Arc::clone(&self.provider);
        let handle = self.handle.clone();
        runtime.spawn(async move {
            match provider.terminate(&handle).await {
                Ok(()) => obs::emit_session_terminated(&handle.session_id, "dropped"),
                Err(e) => obs::emit_session_teardown_error(&handle.session_id, &e),
            }
        });
    }
}
