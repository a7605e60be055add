//! sandcast-state: external service contracts for sandcast
//!
//! This crate holds everything the core treats as an opaque collaborator:
//! the template build service, the artifact tag registry, the sandbox
//! provisioning service and the version store.
//!
//! ## Key Components
//!
//! - `service_traits`: async traits plus their wire types
//! - `HttpControlPlane`: REST client implementing build, tag and sandbox traits
//! - `FsVersionStore`: `<templates>/<name>/version` files
//! - `fakes`: in-memory implementations for tests

mod error;
pub mod fakes;
pub mod http;
pub mod service_traits;
pub mod version_store;

pub use error::ServiceError;
pub use http::{ControlPlaneConfig, HttpControlPlane};
pub use service_traits::{
    split_template_ref, template_ref, ArtifactRef, BuildEvent, BuildEventStream, BuildRequest,
    BuildService, BuildStep, CommandOutput, LogLevel, LogRecord, SandboxProvider, ServiceResult,
    SessionHandle, TagRegistry, VersionStore,
};
pub use version_store::{FsVersionStore, VERSION_FILE};
