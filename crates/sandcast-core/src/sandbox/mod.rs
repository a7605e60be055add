//! Sandbox sessions: provisioned, time-bounded instances of a built template.
//!
//! - [`session`]: `SandboxSession` lifecycle (`Requested → Running → Terminated`)
//! - [`local`]:   `LocalShellProvider`, a host-side provider for dry runs
//! - [`error`]:   `SessionError` / `SessionResult`

pub mod error;
pub mod local;
pub mod session;

pub use error::{SessionError, SessionResult};
pub use local::LocalShellProvider;
pub use session::{SandboxSession, Scoped, SessionState};
