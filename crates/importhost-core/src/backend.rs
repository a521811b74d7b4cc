//! Supported VCS backends and how to drive their daemons.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::HarnessError;

/// A VCS implementation the harness can serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    Git,
}

impl Backend {
    /// Executable looked up on `PATH`.
    pub fn executable_name(self) -> &'static str {
        match self {
            Backend::Git => "git",
        }
    }

    /// The vcs token advertised in the go-import meta tag.
    pub fn vcs_kind(self) -> &'static str {
        match self {
            Backend::Git => "git",
        }
    }

    /// Text the daemon prints once it accepts connections.
    pub fn readiness_marker(self) -> &'static str {
        match self {
            Backend::Git => " Ready ",
        }
    }

    /// Suffix appended after the package path in transport URLs.
    pub fn transport_suffix(self) -> &'static str {
        match self {
            Backend::Git => "/.git",
        }
    }

    /// Base transport address for a daemon on `host:port`, with trailing `/`.
    pub fn transport_base(self, host: &str, port: u16) -> String {
        match self {
            Backend::Git => format!("git://{host}:{port}/"),
        }
    }

    /// Daemon arguments exporting every repository under `base_path`,
    /// restricted to `serve_dir` and its subdirectories.
    pub fn daemon_args(self, host: &str, port: u16, base_path: &Path, serve_dir: &Path) -> Vec<String> {
        match self {
            Backend::Git => vec![
                "daemon".to_owned(),
                format!("--listen={host}"),
                format!("--port={port}"),
                "--export-all".to_owned(),
                "--verbose".to_owned(),
                "--informative-errors".to_owned(),
                format!("--base-path={}", base_path.display()),
                serve_dir.display().to_string(),
            ],
        }
    }

    /// Locate the backend executable on `PATH`.
    pub fn locate(self) -> Option<PathBuf> {
        find_executable(self.executable_name())
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.executable_name())
    }
}

impl FromStr for Backend {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "git" => Ok(Backend::Git),
            other => Err(HarnessError::UnsupportedBackend(other.to_owned())),
        }
    }
}

/// Search `PATH` for an executable named `name`.
pub fn find_executable(name: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path).find_map(|dir| {
        candidates(&dir, name)
            .into_iter()
            .find(|candidate| is_executable(candidate))
    })
}

#[cfg(windows)]
fn candidates(dir: &Path, name: &str) -> Vec<PathBuf> {
    vec![dir.join(format!("{name}.exe")), dir.join(name)]
}

#[cfg(not(windows))]
fn candidates(dir: &Path, name: &str) -> Vec<PathBuf> {
    vec![dir.join(name)]
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
