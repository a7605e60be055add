//! Fail-fast acceptance checks against a sandbox session.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::FutureExt;
use sandcast_core::domain::{CheckSpec, ValidationError};
use sandcast_core::sandbox::{SandboxSession, SessionError};
use sandcast_core::{obs, VerifyConfig};
use sandcast_state::{CommandOutput, SandboxProvider};
use tracing::Instrument;
use uuid::Uuid;

use crate::report::{CheckOutcome, VerificationReport};

/// Errors that prevent a [`VerificationReport`] from being produced or
/// trusted. A failing check is not an error; it lives in the report.
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("all checks passed but teardown failed: {0}")]
    Teardown(#[source] SessionError),
}

/// Runs checks in order on one session and stops at the first failure.
pub struct VerificationHarness;

impl VerificationHarness {
    /// Run `checks` against `session`.
    ///
    /// A session error while running a check (timeout, transport) fails
    /// that check with the error text as diagnostic.
    pub async fn verify(session: &SandboxSession, checks: &[CheckSpec]) -> VerificationReport {
        let started_at = Utc::now();
        let start = Instant::now();
        let mut outcomes = Vec::with_capacity(checks.len());
        let mut passed = true;

        for check in checks {
            let check_start = Instant::now();
            let outcome = match session.run(&check.command).await {
                Ok(output) => judge(check, &output, check_start),
                Err(e) => {
                    tracing::warn!(label = %check.label, error = %e, "check could not run");
                    CheckOutcome {
                        label: check.label.clone(),
                        passed: false,
                        exit_code: None,
                        diagnostic: Some(e.to_string()),
                        duration_ms: check_start.elapsed().as_millis() as u64,
                    }
                }
            };
            obs::emit_check_finished(&outcome.label, outcome.passed, outcome.exit_code);

            let failed = !outcome.passed;
            outcomes.push(outcome);
            if failed {
                passed = false;
                break;
            }
        }

        obs::emit_verify_finished(session.template_ref(), passed, outcomes.len());
        VerificationReport {
            run_id: Uuid::new_v4().to_string(),
            template_ref: session.template_ref().to_string(),
            passed,
            checks: outcomes,
            teardown_error: None,
            started_at,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }
}

fn judge(check: &CheckSpec, output: &CommandOutput, started: Instant) -> CheckOutcome {
    let passed = check.is_success(output);
    let diagnostic = if passed {
        None
    } else if output.stderr.is_empty() {
        Some(output.stdout.clone())
    } else {
        Some(output.stderr.clone())
    };
    CheckOutcome {
        label: check.label.clone(),
        passed,
        exit_code: Some(output.exit_code),
        diagnostic,
        duration_ms: started.elapsed().as_millis() as u64,
    }
}

/// Provision `template` (or `template:tag`), verify it, and tear the
/// session down on every path.
///
/// Provisioning failures are errors. A teardown failure becomes an error
/// only when every check passed; otherwise it is recorded on the report
/// next to the failing check.
pub async fn verify_template(
    provider: Arc<dyn SandboxProvider>,
    template: &str,
    checks: &[CheckSpec],
    config: &VerifyConfig,
) -> Result<VerificationReport, VerifyError> {
    config.validate()?;
    for check in checks {
        check.validate()?;
    }

    let template_ref = config.template_ref(template);
    let checks = checks.to_vec();
    let scoped = SandboxSession::scoped(provider, &template_ref, config.timeout_ms, |session| {
        async move { VerificationHarness::verify(session, &checks).await }.boxed()
    })
    .instrument(obs::session_span(&template_ref))
    .await?;

    let mut report = scoped.value;
    match scoped.teardown {
        Ok(()) => Ok(report),
        Err(e) if report.passed => Err(VerifyError::Teardown(e)),
        Err(e) => {
            report.teardown_error = Some(e.to_string());
            Ok(report)
        }
    }
}
