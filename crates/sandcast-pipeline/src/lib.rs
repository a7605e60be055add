//! sandcast pipeline - building and verifying templates
//!
//! - `BuildExecutor` drives a template spec through the build service and
//!   streams progress to a `BuildLogSink`
//! - `VerificationHarness` runs acceptance checks on a sandbox session,
//!   stopping at the first failure
//! - `verify_template` wraps provisioning, checks and teardown in one call

pub mod executor;
pub mod harness;
pub mod report;
pub mod sink;

// Re-export key types
pub use executor::{BuildError, BuildExecutor, BuildResult, FailedStep};
pub use harness::{verify_template, VerificationHarness, VerifyError};
pub use report::{CheckOutcome, VerificationReport};
pub use sink::{BuildLogSink, CollectingSink, TracingLogSink};
