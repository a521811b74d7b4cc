use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{CommitResult, VcsHandle};
use crate::error::{HarnessError, Result};
use crate::routes::WeakRouteTable;
use crate::vcs::runner::CommandRunner;

/// Format of `%ai` in `git show --pretty`: `2016-03-01 09:04:05 -0800`.
const GIT_AUTHOR_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S %z";

/// Committer identity and message used for every commit in a handle.
#[derive(Debug, Clone)]
pub struct Identity {
    pub name: String,
    pub email: String,
    pub message: String,
}

/// A git repository served by the harness's `git daemon`.
#[derive(Debug)]
pub struct GitHandle {
    runner: CommandRunner,
    package: String,
    dir: PathBuf,
    identity: Identity,
    routes: WeakRouteTable,
}

impl GitHandle {
    pub fn new(
        git: impl Into<PathBuf>,
        dir: impl Into<PathBuf>,
        package: impl Into<String>,
        identity: Identity,
        routes: WeakRouteTable,
    ) -> Self {
        let dir = dir.into();
        Self {
            runner: CommandRunner::new(git, dir.clone()),
            package: package.into(),
            dir,
            identity,
            routes,
        }
    }
}

#[async_trait]
impl VcsHandle for GitHandle {
    fn package_path(&self) -> &str {
        &self.package
    }

    fn working_dir(&self) -> &Path {
        &self.dir
    }

    async fn create(&self) -> Result<()> {
        self.runner.run(&["init"]).await?;
        self.runner
            .run(&["config", "user.name", &self.identity.name])
            .await?;
        self.runner
            .run(&["config", "user.email", &self.identity.email])
            .await?;
        tracing::debug!(package = %self.package, dir = %self.dir.display(), "initialized git repo");
        Ok(())
    }

    fn remove(&self) {
        self.routes.remove_handle(self);
    }

    async fn commit(&self) -> Result<CommitResult> {
        self.runner.run(&["add", "-A"]).await?;
        self.runner
            .run(&["commit", "-a", "-m", &self.identity.message])
            .await?;
        let out = self
            .runner
            .run(&["show", "--pretty=format:%H@%ai", "-s"])
            .await?;
        let result = parse_show_output(&out)?;
        tracing::debug!(
            package = %self.package,
            revision = %result.revision,
            time = %result.time_rfc3339(),
            "committed"
        );
        Ok(result)
    }
}

/// Parse the `<hash>@<author date>` line printed by
/// `git show --pretty=format:%H@%ai -s`.
pub fn parse_show_output(output: &str) -> Result<CommitResult> {
    let line = output.trim();
    let malformed = |reason: String| HarnessError::MalformedCommitOutput {
        output: line.to_owned(),
        reason,
    };

    let (revision, stamp) = line
        .split_once('@')
        .ok_or_else(|| malformed("missing '@' separator".to_owned()))?;
    if revision.is_empty() {
        return Err(malformed("empty revision".to_owned()));
    }
    let time = DateTime::parse_from_str(stamp, GIT_AUTHOR_DATE_FORMAT)
        .map_err(|e| malformed(format!("failed to parse time {stamp:?}: {e}")))?
        .with_timezone(&Utc);

    Ok(CommitResult {
        revision: revision.to_owned(),
        time,
    })
}
