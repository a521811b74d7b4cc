//! The test context a harness runs inside.
//!
//! The harness never owns the sandbox directory or decides when teardown
//! happens. It only registers cleanup actions and asks the context where
//! things live. [`Sandbox`] is the stock implementation used by the test
//! utilities and the CLI.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use futures::future::BoxFuture;

/// A deferred teardown step. Runs at most once.
pub type CleanupAction = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// What the harness needs from the surrounding test.
pub trait TestContext: Send + Sync {
    /// Record a diagnostic line for the current test.
    fn log(&self, message: &str);

    /// Register a cleanup action. Every registered action must eventually run.
    fn on_clean(&self, action: CleanupAction);

    /// Current working directory inside the sandbox.
    fn current(&self) -> PathBuf;

    /// `suffix` joined onto the sandbox root. An empty suffix yields the root.
    fn path(&self, suffix: &str) -> PathBuf;

    /// Import path of the package the test is currently working on.
    fn package(&self) -> String;
}

#[derive(Debug)]
struct Cursor {
    current: PathBuf,
    package: String,
}

/// A [`TestContext`] rooted at a directory on disk.
///
/// Cleanup actions run in reverse registration order when [`Sandbox::teardown`]
/// is awaited. Log lines go to `tracing` and are kept for inspection.
pub struct Sandbox {
    root: PathBuf,
    cursor: Mutex<Cursor>,
    cleanups: Mutex<Vec<CleanupAction>>,
    logs: Mutex<Vec<String>>,
}

impl Sandbox {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            cursor: Mutex::new(Cursor {
                current: root.clone(),
                package: String::new(),
            }),
            root,
            cleanups: Mutex::new(Vec::new()),
            logs: Mutex::new(Vec::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create `<root>/<package>`, make it the current directory, and make
    /// `package` the current package. Returns the directory.
    pub fn setup(&self, package: &str) -> std::io::Result<PathBuf> {
        let dir = self.root.join(package);
        std::fs::create_dir_all(&dir)?;
        let mut cursor = self.cursor.lock().unwrap_or_else(|e| e.into_inner());
        cursor.current = dir.clone();
        cursor.package = package.to_owned();
        Ok(dir)
    }

    /// Change the current directory without touching the package.
    pub fn cd(&self, dir: impl Into<PathBuf>) {
        let mut cursor = self.cursor.lock().unwrap_or_else(|e| e.into_inner());
        cursor.current = dir.into();
    }

    /// Snapshot of every line passed to [`TestContext::log`].
    pub fn logs(&self) -> Vec<String> {
        self.logs.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of cleanup actions still waiting to run.
    pub fn pending_cleanups(&self) -> usize {
        self.cleanups.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Run all registered cleanup actions, last registered first.
    ///
    /// Actions registered while teardown is in progress are run as well.
    pub async fn teardown(&self) {
        loop {
            let next = self.cleanups.lock().unwrap_or_else(|e| e.into_inner()).pop();
            let Some(action) = next else { break };
            action().await;
        }
    }
}

impl TestContext for Sandbox {
    fn log(&self, message: &str) {
        tracing::info!(target: "importhost::sandbox", "{message}");
        self.logs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(message.to_owned());
    }

    fn on_clean(&self, action: CleanupAction) {
        self.cleanups
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(action);
    }

    fn current(&self) -> PathBuf {
        self.cursor
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .current
            .clone()
    }

    fn path(&self, suffix: &str) -> PathBuf {
        if suffix.is_empty() {
            self.root.clone()
        } else {
            self.root.join(suffix)
        }
    }

    fn package(&self) -> String {
        self.cursor
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .package
            .clone()
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        let pending = self.pending_cleanups();
        if pending > 0 {
            tracing::warn!(
                root = %self.root.display(),
                pending,
                "sandbox dropped without teardown; supervised children are killed on drop"
            );
        }
    }
}

impl std::fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sandbox")
            .field("root", &self.root)
            .field("pending_cleanups", &self.pending_cleanups())
            .finish()
    }
}
