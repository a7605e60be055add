//! Template domain: steps, specs, versions, tags and checks.

pub mod check;
pub mod error;
pub mod step;
pub mod tags;
pub mod template;
pub mod version;

pub use check::{CheckPredicate, CheckSpec, Expectation};
pub use error::{CoreError, Result, ValidationError};
pub use step::{StepSpec, DEFAULT_BASE_IMAGE};
pub use tags::{TagAssignment, TagResolver, TagSet, DEFAULT_SOURCE_CHANNEL, LTS_ALIAS};
pub use template::{
    ResourceHints, TemplateBuilder, TemplateSpec, DEFAULT_CPU_COUNT, DEFAULT_MEMORY_MB,
};
pub use version::VersionRecord;
