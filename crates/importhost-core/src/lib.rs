//! A fake source host for integration tests of a dependency-fetching tool.
//!
//! [`HarnessController`] serves go-import meta tags over HTTP and runs a
//! real VCS daemon (currently `git daemon`) on an ephemeral port. Test code
//! creates repositories through [`VcsHandle`]s, commits into them, and
//! points the tool under test at [`HarnessController::http_addr`].

pub mod backend;
pub mod config;
pub mod context;
pub mod controller;
pub mod error;
pub mod port;
pub mod routes;
pub mod server;
pub mod supervisor;
pub mod vcs;

pub use backend::Backend;
pub use config::HarnessConfig;
pub use context::{CleanupAction, Sandbox, TestContext};
pub use controller::{ControllerState, HarnessController};
pub use error::{HarnessError, Result};
pub use supervisor::{ProcessState, ProcessSupervisor, Readiness, SpawnSpec, SupervisedProcess};
pub use vcs::{CommitResult, VcsHandle};
