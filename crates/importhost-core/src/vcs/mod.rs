//! Repository handles: the test-facing side of one simulated remote repo.
//!
//! Each backend implements [`VcsHandle`]. The trait is object-safe so the
//! routing table can hold `Arc<dyn VcsHandle>` regardless of backend.

pub mod git;
pub mod runner;

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::Result;

pub use git::GitHandle;
pub use runner::CommandRunner;

/// Revision and author time of the most recent commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitResult {
    pub revision: String,
    pub time: DateTime<Utc>,
}

impl CommitResult {
    /// Commit time as RFC 3339 in UTC, e.g. `2016-03-01T17:04:05Z`.
    pub fn time_rfc3339(&self) -> String {
        self.time.to_rfc3339_opts(SecondsFormat::Secs, true)
    }
}

#[async_trait]
pub trait VcsHandle: Send + Sync {
    /// Import path; also the HTTP route prefix.
    fn package_path(&self) -> &str;

    fn working_dir(&self) -> &Path;

    /// Initialize the repository and its committer identity.
    async fn create(&self) -> Result<()>;

    /// Drop this handle from the routing table. Files stay on disk.
    fn remove(&self);

    /// Stage everything, commit, and report the new revision.
    async fn commit(&self) -> Result<CommitResult>;
}

const _: () = {
    fn _assert_object_safe(_: &dyn VcsHandle) {}
};
