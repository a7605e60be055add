//! sandcast core library
//!
//! Template specifications, release tag resolution, acceptance checks and
//! sandbox sessions. External services are reached only through the
//! traits in `sandcast_state`.

pub mod config;
pub mod domain;
pub mod manifest;
pub mod obs;
pub mod release;
pub mod sandbox;
pub mod telemetry;

pub use config::{BuildConfig, VerifyConfig, DEFAULT_VERIFY_TIMEOUT_MS};
pub use domain::{
    CheckPredicate, CheckSpec, CoreError, Expectation, ResourceHints, Result, StepSpec,
    TagAssignment, TagResolver, TagSet, TemplateBuilder, TemplateSpec, ValidationError,
    VersionRecord,
};
pub use manifest::{LoadedTemplate, TemplateCatalog, TemplateManifest, MANIFEST_FILE};
pub use release::{ReleaseTagger, TagOutcome};
pub use sandbox::{
    LocalShellProvider, SandboxSession, Scoped, SessionError, SessionResult, SessionState,
};
pub use telemetry::init_tracing;
