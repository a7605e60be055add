//! Structured lifecycle events for builds, tagging and verification.
//!
//! Every event carries a stable `event` field so log pipelines can filter
//! on it regardless of the human-readable message.

use tracing::{info, warn, Span};

/// Span covering one build. Attach with `tracing::Instrument` so it
/// follows the future across await points.
///
/// ```ignore
/// executor.drive(request).instrument(obs::build_span("codex:dev", &digest)).await
/// ```
pub fn build_span(target: &str, digest: &str) -> Span {
    tracing::info_span!("sandcast.build", target = %target, digest = %digest)
}

/// Span covering one verification session.
pub fn session_span(template_ref: &str) -> Span {
    tracing::info_span!("sandcast.session", template_ref = %template_ref)
}

pub fn emit_build_started(target: &str, digest: &str, steps: usize) {
    info!(event = "build.started", target = %target, digest = %digest, steps = steps);
}

pub fn emit_build_step(target: &str, index: usize, kind: &str) {
    info!(event = "build.step", target = %target, index = index, kind = %kind);
}

/// Emit event: build finished, with the failing step index if any.
pub fn emit_build_finished(
    target: &str,
    duration_ms: u64,
    succeeded: bool,
    failed_step: Option<usize>,
) {
    info!(
        event = "build.finished",
        target = %target,
        duration_ms = duration_ms,
        succeeded = succeeded,
        failed_step = ?failed_step,
    );
}

pub fn emit_tags_assigned(target: &str, tags: &[String], artifact: &str) {
    info!(
        event = "tags.assigned",
        target = %target,
        tags = %tags.join(","),
        artifact = %artifact,
    );
}

pub fn emit_session_created(session_id: &str, template_ref: &str, timeout_ms: u64) {
    info!(
        event = "session.created",
        session_id = %session_id,
        template_ref = %template_ref,
        timeout_ms = timeout_ms,
    );
}

pub fn emit_session_terminated(session_id: &str, reason: &str) {
    info!(event = "session.terminated", session_id = %session_id, reason = %reason);
}

pub fn emit_check_finished(label: &str, passed: bool, exit_code: Option<i32>) {
    info!(
        event = "check.finished",
        label = %label,
        passed = passed,
        exit_code = ?exit_code,
    );
}

pub fn emit_verify_finished(template_ref: &str, passed: bool, checks_run: usize) {
    info!(
        event = "verify.finished",
        template_ref = %template_ref,
        passed = passed,
        checks_run = checks_run,
    );
}

/// Emit event: teardown failed (warning level).
pub fn emit_session_teardown_error(session_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "session.teardown_error", session_id = %session_id, error = %error);
}
