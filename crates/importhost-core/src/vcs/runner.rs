use std::path::{Path, PathBuf};

use tokio::process::Command;

use crate::error::{HarnessError, Result};

/// Runs one VCS executable synchronously in a fixed directory.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    program: PathBuf,
    cwd: PathBuf,
}

impl CommandRunner {
    pub fn new(program: impl Into<PathBuf>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            cwd: cwd.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// Run the executable with `args` and return stdout followed by stderr.
    ///
    /// A non-zero exit is [`HarnessError::CommandFailed`] carrying the same
    /// combined output. There are no retries.
    pub async fn run(&self, args: &[&str]) -> Result<String> {
        let output = Command::new(&self.program)
            .args(args)
            .current_dir(&self.cwd)
            .output()
            .await
            .map_err(|source| HarnessError::Spawn {
                program: self.program.clone(),
                args: owned(args),
                source,
            })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            return Err(HarnessError::CommandFailed {
                program: self.program.clone(),
                args: owned(args),
                code: output.status.code().unwrap_or(-1),
                output: combined,
            });
        }

        tracing::debug!(
            program = %self.program.display(),
            ?args,
            cwd = %self.cwd.display(),
            "command succeeded"
        );
        Ok(combined)
    }
}

fn owned(args: &[&str]) -> Vec<String> {
    args.iter().map(|a| (*a).to_owned()).collect()
}
