//! Error type shared by every harness operation.
//!
//! Nothing in the core aborts the process. Each failure is returned as a
//! [`HarnessError`] and the test layer decides whether it means "fail" or
//! "skip" (see [`HarnessError::is_skip`]).

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors produced while starting, driving, or tearing down a harness.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// The HTTP listener could not be bound.
    #[error("failed to bind listener on {addr}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// No ephemeral port could be obtained for the backend daemon.
    #[error("failed to find free port")]
    PortAllocation(#[source] std::io::Error),

    /// The backend executable is not installed.
    #[error("{0} executable not found on PATH")]
    BackendNotFound(String),

    /// The requested backend name is not one the harness knows how to drive.
    #[error("unsupported vcs {0:?}")]
    UnsupportedBackend(String),

    /// A subprocess could not be spawned at all.
    #[error("failed to start {program} {args:?}")]
    Spawn {
        program: PathBuf,
        args: Vec<String>,
        #[source]
        source: std::io::Error,
    },

    /// A synchronous command exited non-zero.
    #[error("{program} {args:?} failed (exit {code}):\n{output}")]
    CommandFailed {
        program: PathBuf,
        args: Vec<String>,
        code: i32,
        output: String,
    },

    /// A supervised process exited before printing its readiness marker.
    #[error("unexpected stop {program} {args:?}\nstdout:\n{stdout}\nstderr:\n{stderr}")]
    PrematureExit {
        program: PathBuf,
        args: Vec<String>,
        stdout: String,
        stderr: String,
    },

    /// The readiness marker never appeared within the allowed time.
    #[error(
        "failed to read expected output {marker:?} from {program} {args:?} within {timeout:?}\n\
         stdout:\n{stdout}\nstderr:\n{stderr}"
    )]
    ReadinessTimeout {
        marker: String,
        program: PathBuf,
        args: Vec<String>,
        timeout: Duration,
        stdout: String,
        stderr: String,
    },

    /// `show --pretty=format:%H@%ai` output did not have the expected shape.
    #[error("malformed commit query output {output:?}: {reason}")]
    MalformedCommitOutput { output: String, reason: String },

    /// A handle for this package path is already registered.
    #[error("package {0:?} is already registered")]
    DuplicatePackage(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    /// Whether this error means the environment lacks a precondition
    /// (the test should be skipped rather than failed).
    pub fn is_skip(&self) -> bool {
        matches!(
            self,
            HarnessError::BackendNotFound(_)
                | HarnessError::UnsupportedBackend(_)
                | HarnessError::Bind { .. }
        )
    }
}

pub type Result<T, E = HarnessError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_backend_is_skip() {
        assert!(HarnessError::BackendNotFound("git".into()).is_skip());
        assert!(HarnessError::UnsupportedBackend("hg".into()).is_skip());
    }

    #[test]
    fn command_failure_is_not_skip() {
        let err = HarnessError::CommandFailed {
            program: PathBuf::from("/usr/bin/git"),
            args: vec!["commit".into()],
            code: 1,
            output: "nothing to commit".into(),
        };
        assert!(!err.is_skip());
        let msg = err.to_string();
        assert!(msg.contains("commit"), "got: {msg}");
        assert!(msg.contains("nothing to commit"), "got: {msg}");
    }

    #[test]
    fn readiness_timeout_reports_both_streams() {
        let err = HarnessError::ReadinessTimeout {
            marker: " Ready ".into(),
            program: PathBuf::from("git"),
            args: vec!["daemon".into()],
            timeout: Duration::from_secs(1),
            stdout: "out-text".into(),
            stderr: "err-text".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("out-text"));
        assert!(msg.contains("err-text"));
    }
}
