//! Session lifecycle against the in-memory control plane and the local
//! shell provider.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use sandcast_core::sandbox::{LocalShellProvider, SandboxSession, SessionError, SessionState};
use sandcast_state::fakes::MemoryControlPlane;
use sandcast_state::{
    ArtifactRef, CommandOutput, SandboxProvider, ServiceResult, SessionHandle,
};

fn plane() -> Arc<MemoryControlPlane> {
    let plane = Arc::new(MemoryControlPlane::new());
    plane.publish("tool:v1.2.3", ArtifactRef("sha256:tool".to_string()));
    plane
}

// -------------------------------------------------------------------------
// Command serialization
// -------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_concurrent_runs_are_serialized() {
    let plane = plane();
    plane.respond("first", CommandOutput::success("1"));
    plane.respond("second", CommandOutput::success("2"));
    plane.delay("first", Duration::from_millis(200));

    let session = SandboxSession::open(plane.clone(), "tool:v1.2.3", 60_000)
        .await
        .unwrap();

    let (a, b) = tokio::join!(session.run("first"), session.run("second"));
    assert_eq!(a.unwrap().stdout, "1");
    assert_eq!(b.unwrap().stdout, "2");
    assert_eq!(plane.commands_run(session.id()), vec!["first", "second"]);

    session.teardown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_waiting_run_times_out_with_the_session() {
    let plane = plane();
    plane.respond("slow", CommandOutput::default());
    plane.delay("slow", Duration::from_secs(30));

    let session = SandboxSession::open(plane.clone(), "tool:v1.2.3", 5_000)
        .await
        .unwrap();

    let (a, b) = tokio::join!(session.run("slow"), session.run("true"));
    assert!(matches!(a, Err(SessionError::TimedOut { .. })));
    assert!(matches!(b, Err(SessionError::TimedOut { .. })));
    assert_eq!(session.state(), SessionState::Terminated);

    // Teardown is still owed after expiry.
    session.teardown().await.unwrap();
    assert_eq!(plane.teardown_count(session.id()), 1);
}

/// Provider whose `create` returns only after the sandbox has started.
struct SlowProvision {
    inner: Arc<MemoryControlPlane>,
    delay: Duration,
}

#[async_trait]
impl SandboxProvider for SlowProvision {
    async fn create(&self, template_ref: &str, timeout_ms: u64) -> ServiceResult<SessionHandle> {
        let handle = self.inner.create(template_ref, timeout_ms).await?;
        tokio::time::sleep(self.delay).await;
        Ok(handle)
    }

    async fn run(&self, handle: &SessionHandle, command: &str) -> ServiceResult<CommandOutput> {
        self.inner.run(handle, command).await
    }

    async fn terminate(&self, handle: &SessionHandle) -> ServiceResult<()> {
        self.inner.terminate(handle).await
    }
}

#[tokio::test(start_paused = true)]
async fn test_timeout_counts_from_provision_request() {
    let plane = plane();
    plane.respond("true", CommandOutput::default());
    let provider = Arc::new(SlowProvision {
        inner: plane.clone(),
        delay: Duration::from_millis(500),
    });

    let session = SandboxSession::open(provider, "tool:v1.2.3", 1_000)
        .await
        .unwrap();
    assert!(session.remaining() <= Duration::from_millis(500));

    // 1200ms after the provider started the sandbox.
    tokio::time::advance(Duration::from_millis(700)).await;
    assert_eq!(session.state(), SessionState::Terminated);
    assert!(matches!(
        session.run("true").await,
        Err(SessionError::TimedOut { .. })
    ));
    session.teardown().await.unwrap();
}

// -------------------------------------------------------------------------
// Scoped sessions
// -------------------------------------------------------------------------

#[tokio::test]
async fn test_scoped_tears_down_on_body_error() {
    let plane = plane();

    let scoped = SandboxSession::scoped(plane.clone(), "tool:v1.2.3", 60_000, |s| {
        async move {
            match s.run("missing-binary").await {
                Ok(out) if out.exit_code != 0 => Err(SessionError::InvalidConfig(out.stderr)),
                other => other,
            }
        }
        .boxed()
    })
    .await
    .unwrap();

    assert!(scoped.value.is_err());
    assert!(scoped.teardown.is_ok());
    let ids = plane.session_ids();
    assert_eq!(ids.len(), 1);
    assert_eq!(plane.teardown_count(&ids[0]), 1);
}

#[tokio::test]
async fn test_scoped_provision_failure_runs_nothing() {
    let plane = plane();
    let mut ran = false;

    let result = SandboxSession::scoped(plane.clone(), "tool:v9.9.9", 60_000, |_s| {
        ran = true;
        async {}.boxed()
    })
    .await;

    assert!(matches!(result, Err(SessionError::ProvisionFailed { .. })));
    assert!(!ran);
    assert!(plane.session_ids().is_empty());
}

#[tokio::test]
async fn test_abandoned_session_is_torn_down() {
    let plane = plane();
    plane.respond("hang", CommandOutput::default());
    plane.delay("hang", Duration::from_secs(3600));

    let provider = plane.clone();
    let outcome = tokio::time::timeout(Duration::from_millis(50), async move {
        let session = SandboxSession::open(provider, "tool:v1.2.3", 60_000)
            .await
            .unwrap();
        session.run("hang").await
    })
    .await;
    assert!(outcome.is_err());

    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    let ids = plane.session_ids();
    assert_eq!(plane.teardown_count(&ids[0]), 1);
}

// -------------------------------------------------------------------------
// LocalShellProvider
// -------------------------------------------------------------------------

#[tokio::test]
async fn test_local_session_end_to_end() {
    let provider = Arc::new(LocalShellProvider::new());
    let session = SandboxSession::open(provider.clone(), "tool", 60_000)
        .await
        .unwrap();

    let out = session.run("printf 'ok'").await.unwrap();
    assert_eq!(out.exit_code, 0);
    assert_eq!(out.stdout, "ok");

    let out = session.run("ls /definitely/not/here").await.unwrap();
    assert_ne!(out.exit_code, 0);
    assert!(!out.stderr.is_empty());

    let dir = provider.session_dir(session.id()).await.unwrap();
    session.teardown().await.unwrap();
    assert!(!dir.exists());
}
