//! Shared test utilities for importhost integration tests.
//!
//! Provides temp-dir backed sandboxes, a "start the harness or skip"
//! helper for machines without the backend installed, fake daemons for
//! exercising the supervisor, and a tiny HTTP client.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use importhost_core::{Backend, HarnessConfig, HarnessController, Sandbox};

/// A sandbox rooted in a fresh temp dir.
///
/// The temp dir is removed when this value is dropped, so keep it alive
/// until after [`Sandbox::teardown`].
pub struct TestSandbox {
    pub sandbox: Arc<Sandbox>,
    dir: TempDir,
}

impl TestSandbox {
    pub fn new() -> Self {
        let dir = tempfile::Builder::new()
            .prefix("importhost-test-")
            .tempdir()
            .expect("failed to create sandbox dir");
        // Canonical so paths compare equal to what subprocesses report.
        let root = dir
            .path()
            .canonicalize()
            .expect("failed to canonicalize sandbox dir");
        Self {
            sandbox: Arc::new(Sandbox::new(root)),
            dir,
        }
    }

    pub fn root(&self) -> &Path {
        self.sandbox.root()
    }

    pub fn temp_path(&self) -> &Path {
        self.dir.path()
    }

    /// Create the package directory and make it current.
    pub fn setup(&self, package: &str) -> PathBuf {
        self.sandbox
            .setup(package)
            .unwrap_or_else(|e| panic!("failed to set up package {package}: {e}"))
    }

    pub async fn teardown(&self) {
        self.sandbox.teardown().await;
    }
}

impl Default for TestSandbox {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether `backend`'s executable is installed.
pub fn backend_available(backend: Backend) -> bool {
    backend.locate().is_some()
}

/// Start a harness, or return `None` (after printing why) when the
/// environment cannot run it. Any other failure panics.
pub async fn start_or_skip(
    sandbox: &TestSandbox,
    backend: Backend,
    config: HarnessConfig,
) -> Option<HarnessController> {
    match HarnessController::start(sandbox.sandbox.clone(), backend, config).await {
        Ok(harness) => Some(harness),
        Err(e) if e.is_skip() => {
            eprintln!("skipping: {e}");
            sandbox.teardown().await;
            None
        }
        Err(e) => panic!("failed to start harness: {e}"),
    }
}

/// Write `contents` to `dir/rel`, creating parent directories.
pub fn write_file(dir: &Path, rel: &str, contents: &str) -> PathBuf {
    let path = dir.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("failed to create parent dirs");
    }
    std::fs::write(&path, contents)
        .unwrap_or_else(|e| panic!("failed to write {}: {e}", path.display()));
    path
}

/// Write an executable `sh` script named `name` into `dir`.
///
/// Used to stand in for a daemon with scripted output and timing.
#[cfg(unix)]
pub fn fake_daemon(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = write_file(dir, name, &format!("#!/bin/sh\n{body}\n"));
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("failed to make fake daemon executable");
    path
}

/// Plain GET against `http://{addr}{path}`. Returns status and body.
pub async fn http_get(addr: &str, path: &str) -> (u16, String) {
    let url = format!("http://{addr}{path}");
    let response = reqwest::get(&url)
        .await
        .unwrap_or_else(|e| panic!("GET {url} failed: {e}"));
    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .unwrap_or_else(|e| panic!("reading body of {url} failed: {e}"));
    (status, body)
}

/// Extract the `content` attribute of the go-import meta tag.
pub fn go_import_content(body: &str) -> Option<&str> {
    let start = body.find("content=\"")? + "content=\"".len();
    let len = body[start..].find('"')?;
    Some(&body[start..start + len])
}
