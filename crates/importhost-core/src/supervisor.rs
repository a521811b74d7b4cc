//! Supervision of long-running helper daemons.
//!
//! A daemon is spawned with its stdout/stderr captured into shared buffers
//! by background reader tasks. Readiness is detected by scanning those
//! buffers for a known marker, since a bound socket alone does not mean the
//! daemon is ready to serve. Teardown is registered with the owning
//! [`TestContext`] at spawn time: interrupt, wait up to a grace period,
//! force-kill, then log whatever the daemon printed.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::context::TestContext;
use crate::error::{HarnessError, Result};

/// How long to wait for reader tasks to drain a pipe after the process is gone.
const DRAIN_TIMEOUT: Duration = Duration::from_millis(100);

/// Lifecycle of a supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Spawned, readiness not yet confirmed.
    Starting,
    /// Readiness marker seen, or no marker was requested.
    Ready,
    /// Observed to have exited on its own. `None` means killed by a signal.
    Exited(Option<i32>),
    /// Torn down by the cleanup action.
    Reaped,
}

/// Growable byte buffer shared between a pipe reader and its observers.
#[derive(Debug, Clone, Default)]
pub struct OutputBuffer(Arc<Mutex<Vec<u8>>>);

impl OutputBuffer {
    fn append(&self, chunk: &[u8]) {
        self.0
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend_from_slice(chunk);
    }

    /// Lossy UTF-8 copy of everything captured so far.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap_or_else(|e| e.into_inner())).into_owned()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.text().contains(needle)
    }
}

/// What to run and where.
#[derive(Debug, Clone)]
pub struct SpawnSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
}

impl SpawnSpec {
    pub fn new(program: impl Into<PathBuf>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: working_dir.into(),
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

/// Readiness check parameters.
#[derive(Debug, Clone)]
pub struct Readiness {
    /// Substring expected on stdout or stderr once the daemon is up.
    pub marker: String,
    /// Total time budget for the marker to appear.
    pub timeout: Duration,
    /// Delay between checks.
    pub interval: Duration,
}

struct Inner {
    spec: SpawnSpec,
    pid: Option<u32>,
    child: tokio::sync::Mutex<Child>,
    stdout: OutputBuffer,
    stderr: OutputBuffer,
    readers: Mutex<Vec<JoinHandle<()>>>,
    state: Mutex<ProcessState>,
}

/// Shared handle to one spawned daemon.
///
/// Clones refer to the same process. The child is killed if the last clone
/// is dropped without teardown having run.
#[derive(Clone)]
pub struct SupervisedProcess {
    inner: Arc<Inner>,
}

impl SupervisedProcess {
    pub fn program(&self) -> &Path {
        &self.inner.spec.program
    }

    pub fn args(&self) -> &[String] {
        &self.inner.spec.args
    }

    pub fn working_dir(&self) -> &Path {
        &self.inner.spec.working_dir
    }

    /// OS pid assigned at spawn time.
    pub fn pid(&self) -> Option<u32> {
        self.inner.pid
    }

    pub fn state(&self) -> ProcessState {
        *self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: ProcessState) {
        *self.inner.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    pub fn stdout(&self) -> String {
        self.inner.stdout.text()
    }

    pub fn stderr(&self) -> String {
        self.inner.stderr.text()
    }

    /// Block until `marker` appears in the captured output.
    ///
    /// Checks every `interval` for at most `timeout`. Each check first looks
    /// for an early exit, which is reported as [`HarnessError::PrematureExit`],
    /// then scans both buffers. Running out of attempts yields
    /// [`HarnessError::ReadinessTimeout`]. Both errors carry the captured
    /// output.
    pub async fn await_ready(
        &self,
        marker: &str,
        timeout: Duration,
        interval: Duration,
    ) -> Result<()> {
        let interval = interval.max(Duration::from_millis(1));
        let attempts = timeout.as_millis().div_ceil(interval.as_millis()).max(1);

        for _ in 0..attempts {
            if let Some(code) = self.try_exit().await? {
                self.set_state(ProcessState::Exited(code));
                self.drain_readers().await;
                return Err(HarnessError::PrematureExit {
                    program: self.inner.spec.program.clone(),
                    args: self.inner.spec.args.clone(),
                    stdout: self.stdout(),
                    stderr: self.stderr(),
                });
            }
            if self.inner.stdout.contains(marker) || self.inner.stderr.contains(marker) {
                self.set_state(ProcessState::Ready);
                debug!(program = %self.program().display(), pid = ?self.pid(), "process ready");
                return Ok(());
            }
            tokio::time::sleep(interval).await;
        }

        Err(HarnessError::ReadinessTimeout {
            marker: marker.to_owned(),
            program: self.inner.spec.program.clone(),
            args: self.inner.spec.args.clone(),
            timeout,
            stdout: self.stdout(),
            stderr: self.stderr(),
        })
    }

    /// `Some(code)` once the child has exited, `None` while it is running.
    async fn try_exit(&self) -> Result<Option<Option<i32>>> {
        let mut child = self.inner.child.lock().await;
        Ok(child.try_wait()?.map(|status| status.code()))
    }

    /// Interrupt the process, force-kill it if it outlives `grace`, and log
    /// its captured output through `ctx` (when still alive).
    ///
    /// Safe to call on a process that has already exited. Returns the final
    /// state, which is always [`ProcessState::Reaped`].
    pub async fn terminate(&self, grace: Duration, ctx: Option<&dyn TestContext>) -> ProcessState {
        {
            let mut child = self.inner.child.lock().await;
            if child.id().is_some() {
                send_interrupt(&mut child);
                match tokio::time::timeout(grace, child.wait()).await {
                    Ok(Ok(status)) => {
                        debug!(pid = ?self.pid(), %status, "process exited after interrupt");
                    }
                    Ok(Err(e)) => {
                        warn!(pid = ?self.pid(), error = %e, "error waiting for process, killing");
                        if let Err(e) = child.kill().await {
                            warn!(pid = ?self.pid(), error = %e, "kill failed");
                        }
                    }
                    Err(_) => {
                        debug!(pid = ?self.pid(), ?grace, "process ignored interrupt, killing");
                        if let Err(e) = child.kill().await {
                            warn!(pid = ?self.pid(), error = %e, "kill failed");
                        }
                    }
                }
            } else {
                debug!(pid = ?self.pid(), "process already reaped, skipping interrupt");
            }
        }

        self.drain_readers().await;
        self.set_state(ProcessState::Reaped);

        let program = self.inner.spec.program.display().to_string();
        let stdout = self.stdout();
        let stderr = self.stderr();
        info!(%program, %stdout, %stderr, "supervised process torn down");
        if let Some(ctx) = ctx {
            ctx.log(&format!("{program:?} StdOut: {stdout}"));
            ctx.log(&format!("{program:?} StdErr: {stderr}"));
        }
        ProcessState::Reaped
    }

    /// Give reader tasks a moment to copy the last bytes out of the pipes.
    async fn drain_readers(&self) {
        let readers: Vec<_> = self
            .inner
            .readers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for reader in readers {
            if tokio::time::timeout(DRAIN_TIMEOUT, reader).await.is_err() {
                debug!(pid = ?self.pid(), "output reader still busy after drain timeout");
            }
        }
    }
}

impl std::fmt::Debug for SupervisedProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupervisedProcess")
            .field("program", &self.inner.spec.program)
            .field("args", &self.inner.spec.args)
            .field("pid", &self.inner.pid)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(unix)]
fn send_interrupt(child: &mut Child) {
    if let Some(pid) = child.id() {
        // SAFETY: pid belongs to a child we spawned and have not yet reaped.
        let ret = unsafe { libc::kill(pid as libc::pid_t, libc::SIGINT) };
        if ret != 0 {
            debug!(pid, error = %std::io::Error::last_os_error(), "SIGINT failed");
        }
    }
}

#[cfg(not(unix))]
fn send_interrupt(child: &mut Child) {
    // No console interrupt for detached children here; fall back to kill.
    if let Err(e) = child.start_kill() {
        debug!(error = %e, "start_kill failed");
    }
}

fn spawn_reader<R>(mut pipe: R, buffer: OutputBuffer) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = [0u8; 4096];
        loop {
            match pipe.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => buffer.append(&chunk[..n]),
                Err(e) => {
                    debug!(error = %e, "output pipe read failed");
                    break;
                }
            }
        }
    })
}

/// Starts daemons on behalf of a test context and wires their teardown
/// into it.
pub struct ProcessSupervisor {
    ctx: Arc<dyn TestContext>,
    stop_grace: Duration,
}

impl ProcessSupervisor {
    pub fn new(ctx: Arc<dyn TestContext>, stop_grace: Duration) -> Self {
        Self { ctx, stop_grace }
    }

    /// Spawn `spec` and register its teardown with the context.
    ///
    /// With `readiness` set, stdout and stderr are captured and this call
    /// returns only once the marker has been seen (or fails, see
    /// [`SupervisedProcess::await_ready`]). Without it the child inherits
    /// the parent's streams and this returns right after spawning.
    ///
    /// The cleanup action is registered before readiness is awaited, so a
    /// daemon that never becomes ready is still torn down.
    pub async fn start_async(
        &self,
        spec: SpawnSpec,
        readiness: Option<Readiness>,
    ) -> Result<SupervisedProcess> {
        let capture = readiness.is_some();

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .current_dir(&spec.working_dir)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if capture {
            cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        } else {
            cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        }

        let mut child = cmd.spawn().map_err(|source| HarnessError::Spawn {
            program: spec.program.clone(),
            args: spec.args.clone(),
            source,
        })?;
        let pid = child.id();

        let stdout = OutputBuffer::default();
        let stderr = OutputBuffer::default();
        let mut readers = Vec::new();
        if let Some(pipe) = child.stdout.take() {
            readers.push(spawn_reader(pipe, stdout.clone()));
        }
        if let Some(pipe) = child.stderr.take() {
            readers.push(spawn_reader(pipe, stderr.clone()));
        }

        info!(
            program = %spec.program.display(),
            args = ?spec.args,
            dir = %spec.working_dir.display(),
            pid = ?pid,
            "started supervised process"
        );

        let process = SupervisedProcess {
            inner: Arc::new(Inner {
                spec,
                pid,
                child: tokio::sync::Mutex::new(child),
                stdout,
                stderr,
                readers: Mutex::new(readers),
                state: Mutex::new(ProcessState::Starting),
            }),
        };

        self.register_teardown(&process);

        match readiness {
            Some(r) => {
                process.await_ready(&r.marker, r.timeout, r.interval).await?;
            }
            None => process.set_state(ProcessState::Ready),
        }
        Ok(process)
    }

    fn register_teardown(&self, process: &SupervisedProcess) {
        let process = process.clone();
        let grace = self.stop_grace;
        // Weak so a sandbox that is dropped without teardown is not kept
        // alive by its own cleanup list.
        let ctx: Weak<dyn TestContext> = Arc::downgrade(&self.ctx);
        self.ctx.on_clean(Box::new(move || {
            Box::pin(async move {
                let ctx = ctx.upgrade();
                process.terminate(grace, ctx.as_deref()).await;
            })
        }));
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::context::Sandbox;

    fn sandbox() -> (tempfile::TempDir, Arc<Sandbox>) {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = Arc::new(Sandbox::new(dir.path()));
        (dir, sandbox)
    }

    fn sh(dir: &Path, script: &str) -> SpawnSpec {
        SpawnSpec::new("sh", dir).args(["-c", script])
    }

    fn readiness(marker: &str, timeout_ms: u64) -> Option<Readiness> {
        Some(Readiness {
            marker: marker.to_owned(),
            timeout: Duration::from_millis(timeout_ms),
            interval: Duration::from_millis(10),
        })
    }

    #[tokio::test]
    async fn marker_on_stderr_is_detected() {
        let (dir, sandbox) = sandbox();
        let supervisor = ProcessSupervisor::new(sandbox.clone(), Duration::from_millis(300));

        let process = supervisor
            .start_async(
                sh(dir.path(), "sleep 0.1; echo '[1] Ready to rumble' >&2; exec sleep 30"),
                readiness(" Ready ", 2000),
            )
            .await
            .expect("daemon should become ready");

        assert_eq!(process.state(), ProcessState::Ready);
        assert!(process.stderr().contains("Ready to rumble"));
        assert_eq!(sandbox.pending_cleanups(), 1);

        sandbox.teardown().await;
        assert_eq!(process.state(), ProcessState::Reaped);
    }

    #[tokio::test]
    async fn early_exit_is_reported_with_output() {
        let (dir, sandbox) = sandbox();
        let supervisor = ProcessSupervisor::new(sandbox.clone(), Duration::from_millis(300));

        let err = supervisor
            .start_async(
                sh(dir.path(), "echo booting; echo 'bad flag' >&2; exit 3"),
                readiness(" Ready ", 2000),
            )
            .await
            .expect_err("daemon exits before ready");

        match err {
            HarnessError::PrematureExit { stdout, stderr, .. } => {
                assert!(stdout.contains("booting"), "stdout: {stdout:?}");
                assert!(stderr.contains("bad flag"), "stderr: {stderr:?}");
            }
            other => panic!("expected PrematureExit, got {other:?}"),
        }
        // Teardown still registered and harmless on a dead process.
        sandbox.teardown().await;
    }

    #[tokio::test]
    async fn missing_marker_times_out() {
        let (dir, sandbox) = sandbox();
        let supervisor = ProcessSupervisor::new(sandbox.clone(), Duration::from_millis(100));

        let err = supervisor
            .start_async(
                sh(dir.path(), "echo out-line; echo err-line >&2; exec sleep 30"),
                readiness(" Ready ", 200),
            )
            .await
            .expect_err("marker never printed");

        match err {
            HarnessError::ReadinessTimeout { stdout, stderr, .. } => {
                assert!(stdout.contains("out-line"), "stdout: {stdout:?}");
                assert!(stderr.contains("err-line"), "stderr: {stderr:?}");
            }
            other => panic!("expected ReadinessTimeout, got {other:?}"),
        }
        sandbox.teardown().await;
    }

    #[tokio::test]
    async fn interrupt_ignoring_process_is_killed_after_grace() {
        let (dir, sandbox) = sandbox();
        let supervisor = ProcessSupervisor::new(sandbox.clone(), Duration::from_millis(100));

        let process = supervisor
            .start_async(
                sh(dir.path(), "trap '' INT; echo ' Ready '; exec sleep 30"),
                readiness(" Ready ", 2000),
            )
            .await
            .unwrap();

        let started = std::time::Instant::now();
        sandbox.teardown().await;

        assert_eq!(process.state(), ProcessState::Reaped);
        assert!(started.elapsed() < Duration::from_secs(5));
        let logs = sandbox.logs();
        assert!(logs.iter().any(|l| l.contains("StdOut") && l.contains("Ready")));
        assert!(logs.iter().any(|l| l.contains("StdErr")));
    }

    #[tokio::test]
    async fn teardown_after_natural_exit_still_logs() {
        let (dir, sandbox) = sandbox();
        let supervisor = ProcessSupervisor::new(sandbox.clone(), Duration::from_millis(300));

        let process = supervisor
            .start_async(sh(dir.path(), "echo ' Ready '; sleep 0.05"), readiness(" Ready ", 2000))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        sandbox.teardown().await;

        assert_eq!(process.state(), ProcessState::Reaped);
        assert_eq!(sandbox.logs().len(), 2);
    }

    #[tokio::test]
    async fn without_marker_returns_immediately() {
        let (dir, sandbox) = sandbox();
        let supervisor = ProcessSupervisor::new(sandbox.clone(), Duration::from_millis(300));

        let process = supervisor
            .start_async(sh(dir.path(), "exec sleep 30"), None)
            .await
            .unwrap();

        assert_eq!(process.state(), ProcessState::Ready);
        assert!(process.pid().is_some());
        assert!(process.stdout().is_empty());
        sandbox.teardown().await;
    }

    #[tokio::test]
    async fn missing_program_fails_to_spawn() {
        let (dir, sandbox) = sandbox();
        let supervisor = ProcessSupervisor::new(sandbox.clone(), Duration::from_millis(300));

        let err = supervisor
            .start_async(
                SpawnSpec::new("importhost-no-such-binary", dir.path()),
                readiness(" Ready ", 100),
            )
            .await
            .expect_err("spawn should fail");

        assert!(matches!(err, HarnessError::Spawn { .. }), "got {err:?}");
        assert_eq!(sandbox.pending_cleanups(), 0);
    }
}
