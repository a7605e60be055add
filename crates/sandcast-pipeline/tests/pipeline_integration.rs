//! Integration tests for building, tagging and verifying templates against
//! the in-memory control plane.

use std::sync::Arc;
use std::time::Duration;

use sandcast_core::domain::{CheckSpec, Expectation, TemplateBuilder, TemplateSpec};
use sandcast_core::sandbox::{LocalShellProvider, SessionError};
use sandcast_core::{BuildConfig, ReleaseTagger, VerifyConfig};
use sandcast_pipeline::{
    verify_template, BuildError, BuildExecutor, CollectingSink, VerifyError,
};
use sandcast_state::fakes::{MemoryControlPlane, MemoryVersionStore};
use sandcast_state::{BuildEvent, CommandOutput, ServiceError, TagRegistry};

fn three_step_spec() -> TemplateSpec {
    TemplateBuilder::new("tool")
        .run(["echo A"])
        .run(["echo B"])
        .run(["echo C"])
        .build()
        .unwrap()
}

// -------------------------------------------------------------------------
// End to end
// -------------------------------------------------------------------------

#[tokio::test]
async fn test_build_tag_verify_end_to_end() {
    let plane = Arc::new(MemoryControlPlane::new());
    plane.respond("curl -V", CommandOutput::success("curl 8.5.0 (x86_64-pc-linux-gnu)\n"));

    // Build tool:dev
    let spec = TemplateBuilder::new("tool")
        .with_base_image("base")
        .install_packages(["curl"])
        .run(["curl -V"])
        .build()
        .unwrap();
    let mut sink = CollectingSink::default();
    let result = BuildExecutor::new(plane.clone())
        .execute(&spec, &BuildConfig::default().with_tag("dev"), &mut sink)
        .await
        .unwrap()
        .ensure_success()
        .unwrap();
    assert_eq!(result.target, "tool:dev");
    assert_eq!(sink.events, result.log_events);
    assert!(matches!(
        result.log_events.last(),
        Some(BuildEvent::Completed { .. })
    ));

    // Tag the dev artifact with the release version
    let versions = MemoryVersionStore::new();
    versions.set("tool", "1.2.3");
    let outcome = ReleaseTagger::new(plane.clone(), versions)
        .tag_release("tool", None)
        .await
        .unwrap();
    assert_eq!(outcome.assignment.tags.as_slice(), ["v1.2.3", "lts"]);
    assert_eq!(Some(&outcome.artifact), result.artifact_ref.as_ref());

    // Verify from the version tag
    let report = verify_template(
        plane.clone(),
        "tool",
        &[CheckSpec::new("curl", "curl -V")],
        &VerifyConfig::default().with_tag("v1.2.3"),
    )
    .await
    .unwrap();

    assert!(report.passed);
    assert_eq!(report.template_ref, "tool:v1.2.3");
    assert_eq!(report.checks.len(), 1);
    assert_eq!(report.checks[0].label, "curl");
    assert!(report.checks[0].passed);

    let ids = plane.session_ids();
    assert_eq!(ids.len(), 1);
    assert_eq!(plane.teardown_count(&ids[0]), 1);
}

// -------------------------------------------------------------------------
// Build failures
// -------------------------------------------------------------------------

#[tokio::test]
async fn test_failing_middle_step_stops_build() {
    let plane = Arc::new(MemoryControlPlane::new());
    plane.fail_step("echo B", 2, "B exploded");
    let executor = BuildExecutor::new(plane.clone());
    let spec = three_step_spec();

    let result = executor
        .execute(&spec, &BuildConfig::default(), &mut |_: &BuildEvent| {})
        .await
        .unwrap();

    assert!(!result.succeeded);
    assert!(result.artifact_ref.is_none());
    let failed = result.failed_step.clone().unwrap();
    assert_eq!(failed.index, 1);
    assert_eq!(failed.step, "RUN echo B");
    assert_eq!(failed.exit_code, Some(2));
    assert_eq!(failed.output, "B exploded");
    assert_eq!(plane.executed_steps("tool"), vec![0, 1]);
    assert!(matches!(
        plane.resolve("tool").await,
        Err(ServiceError::NotFound { .. })
    ));

    match result.ensure_success() {
        Err(BuildError::StepFailed { index, .. }) => assert_eq!(index, 1),
        other => panic!("expected StepFailed, got {:?}", other),
    }
}

#[tokio::test]
async fn test_rerun_fails_at_same_step() {
    let plane = Arc::new(MemoryControlPlane::new());
    plane.fail_step("echo B", 1, "nope");
    let executor = BuildExecutor::new(plane.clone());
    let spec = three_step_spec();

    let first = executor
        .execute(&spec, &BuildConfig::default(), &mut |_: &BuildEvent| {})
        .await
        .unwrap();
    let second = executor
        .execute(&spec, &BuildConfig::default(), &mut |_: &BuildEvent| {})
        .await
        .unwrap();

    assert_eq!(first.failed_step, second.failed_step);
    assert_eq!(plane.executed_steps("tool"), vec![0, 1]);
    assert_eq!(plane.builds_submitted(), 2);
}

#[tokio::test]
async fn test_unavailable_build_service() {
    let plane = Arc::new(MemoryControlPlane::new());
    plane.set_unavailable(true);

    let err = BuildExecutor::new(plane)
        .execute(&three_step_spec(), &BuildConfig::default(), &mut |_: &BuildEvent| {})
        .await
        .unwrap_err();
    assert!(matches!(err, BuildError::ServiceUnavailable { .. }));
}

// -------------------------------------------------------------------------
// Verification
// -------------------------------------------------------------------------

fn published_plane() -> Arc<MemoryControlPlane> {
    let plane = Arc::new(MemoryControlPlane::new());
    plane.publish("tool", sandcast_state::ArtifactRef("sha256:t".to_string()));
    plane
}

#[tokio::test]
async fn test_verification_stops_at_first_failure() {
    let plane = published_plane();
    plane.respond("check-1", CommandOutput::success("ok"));
    plane.respond("check-2", CommandOutput::failure(1, "second check broke\n"));
    plane.respond("check-3", CommandOutput::success("ok"));

    let checks = vec![
        CheckSpec::new("one", "check-1"),
        CheckSpec::new("two", "check-2"),
        CheckSpec::new("three", "check-3"),
    ];
    let report = verify_template(plane.clone(), "tool", &checks, &VerifyConfig::default())
        .await
        .unwrap();

    assert!(!report.passed);
    assert_eq!(report.checks.len(), 2);
    assert!(report.checks[0].passed);
    assert!(!report.checks[1].passed);
    assert_eq!(
        report.checks[1].diagnostic.as_deref(),
        Some("second check broke\n")
    );

    let ids = plane.session_ids();
    assert_eq!(plane.commands_run(&ids[0]), vec!["check-1", "check-2"]);
    assert_eq!(plane.teardown_count(&ids[0]), 1);
}

#[tokio::test]
async fn test_per_check_expectation_override() {
    let plane = published_plane();
    plane.respond("which nope", CommandOutput::failure(1, ""));

    let checks = vec![CheckSpec::new("absent", "which nope").expecting(Expectation::ExitCode(1))];
    let report = verify_template(plane, "tool", &checks, &VerifyConfig::default())
        .await
        .unwrap();
    assert!(report.passed);
}

#[tokio::test]
async fn test_provision_failure_is_an_error() {
    let plane = published_plane();
    let err = verify_template(
        plane.clone(),
        "tool",
        &[CheckSpec::new("x", "true")],
        &VerifyConfig::default().with_tag("v0.0.0"),
    )
    .await
    .unwrap_err();

    assert!(matches!(
        err,
        VerifyError::Session(SessionError::ProvisionFailed { .. })
    ));
    assert!(plane.session_ids().is_empty());
}

#[tokio::test]
async fn test_teardown_failure_does_not_mask_check_failure() {
    let plane = published_plane();
    plane.set_fail_teardown(true);

    let report = verify_template(
        plane.clone(),
        "tool",
        &[CheckSpec::new("missing", "definitely-missing")],
        &VerifyConfig::default(),
    )
    .await
    .unwrap();

    assert!(!report.passed);
    assert!(report.checks[0]
        .diagnostic
        .as_deref()
        .unwrap()
        .contains("not found"));
    assert!(report.teardown_error.is_some());
}

#[tokio::test]
async fn test_teardown_failure_after_success_is_surfaced() {
    let plane = published_plane();
    plane.respond("true", CommandOutput::default());
    plane.set_fail_teardown(true);

    let err = verify_template(
        plane,
        "tool",
        &[CheckSpec::new("ok", "true")],
        &VerifyConfig::default(),
    )
    .await
    .unwrap_err();
    assert!(matches!(
        err,
        VerifyError::Teardown(SessionError::TeardownFailed { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_session_timeout_fails_check_and_still_tears_down() {
    let plane = published_plane();
    plane.respond("slow", CommandOutput::default());
    plane.delay("slow", Duration::from_secs(120));
    plane.respond("after", CommandOutput::default());

    let checks = vec![CheckSpec::new("slow", "slow"), CheckSpec::new("after", "after")];
    let report = verify_template(
        plane.clone(),
        "tool",
        &checks,
        &VerifyConfig::default().with_timeout_ms(1_000),
    )
    .await
    .unwrap();

    assert!(!report.passed);
    assert_eq!(report.checks.len(), 1);
    assert!(report.checks[0].exit_code.is_none());
    assert!(report.checks[0]
        .diagnostic
        .as_deref()
        .unwrap()
        .contains("timed out"));

    let ids = plane.session_ids();
    assert_eq!(plane.teardown_count(&ids[0]), 1);
}

#[tokio::test]
async fn test_zero_timeout_rejected_before_provisioning() {
    let plane = published_plane();
    let err = verify_template(
        plane.clone(),
        "tool",
        &[],
        &VerifyConfig::default().with_timeout_ms(0),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, VerifyError::Validation(_)));
    assert!(plane.session_ids().is_empty());
}

#[tokio::test]
async fn test_local_provider_verification() {
    let provider = Arc::new(LocalShellProvider::new());
    let checks = vec![
        CheckSpec::new("write", "echo hi > marker"),
        CheckSpec::new("read", "cat marker")
            .expecting(Expectation::StdoutContains("hi".to_string())),
        CheckSpec::new("fail", "echo 'tool missing' >&2; exit 4"),
        CheckSpec::new("never", "true"),
    ];

    let report = verify_template(provider, "tool", &checks, &VerifyConfig::default())
        .await
        .unwrap();

    assert!(!report.passed);
    assert_eq!(report.passed_count(), 2);
    assert_eq!(report.checks.len(), 3);
    let failed = report.failed_check().unwrap();
    assert_eq!(failed.label, "fail");
    assert_eq!(failed.exit_code, Some(4));
    assert_eq!(failed.diagnostic.as_deref(), Some("tool missing\n"));
}
