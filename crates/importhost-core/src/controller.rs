//! The harness as test code sees it.
//!
//! ```text
//! HarnessController::start(ctx, Backend::Git, config)
//!     |-- RedirectServer::start
//!     |-- Backend::locate            (or skip)
//!     |-- allocate_free_port
//!     |-- ProcessSupervisor::start_async("git daemon ...")
//!     v
//!   Ready --setup()--> Arc<dyn VcsHandle> registered in RouteTable
//!     |
//!   ctx teardown: remove handles, stop daemon, close listener  (Closed)
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info};

use crate::backend::Backend;
use crate::config::HarnessConfig;
use crate::context::TestContext;
use crate::error::{HarnessError, Result};
use crate::port::allocate_free_port;
use crate::routes::RouteTable;
use crate::server::RedirectServer;
use crate::supervisor::{ProcessSupervisor, Readiness, SpawnSpec, SupervisedProcess};
use crate::vcs::git::Identity;
use crate::vcs::{GitHandle, VcsHandle};

/// Whether a constructed controller still answers HTTP requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Ready,
    Closed,
}

pub struct HarnessController {
    ctx: Arc<dyn TestContext>,
    backend: Backend,
    config: HarnessConfig,
    executable: PathBuf,
    transport: String,
    server: RedirectServer,
    routes: RouteTable,
    daemon: SupervisedProcess,
}

impl HarnessController {
    /// Bring up the redirect server and the backend daemon.
    ///
    /// Errors for which [`HarnessError::is_skip`] holds mean the environment
    /// cannot run the test (no listener, backend not installed). Every
    /// resource acquired before a failure has its teardown registered with
    /// `ctx` already.
    pub async fn start(
        ctx: Arc<dyn TestContext>,
        backend: Backend,
        config: HarnessConfig,
    ) -> Result<Self> {
        debug!(%backend, "starting harness");

        let routes = RouteTable::new();
        let server = RedirectServer::start(&config.listen_host, backend, routes.clone()).await?;
        let token = server.shutdown_token();
        ctx.on_clean(Box::new(move || {
            Box::pin(async move {
                token.cancel();
            })
        }));
        debug!(addr = %server.http_addr(), "harness listening");

        let executable = backend
            .locate()
            .ok_or_else(|| HarnessError::BackendNotFound(backend.executable_name().to_owned()))?;
        debug!(executable = %executable.display(), "backend found");

        let port = allocate_free_port(config.port_release_delay).await?;
        let transport = backend.transport_base(&config.listen_host, port);
        server.state().set_transport(transport.clone());

        let base_path = ctx.path("");
        let serve_dir = ctx.current();
        let spec = SpawnSpec::new(&executable, &serve_dir).args(backend.daemon_args(
            &config.listen_host,
            port,
            &base_path,
            &serve_dir,
        ));
        debug!(port, "starting backend daemon");

        let supervisor = ProcessSupervisor::new(Arc::clone(&ctx), config.stop_grace);
        let daemon = supervisor
            .start_async(
                spec,
                Some(Readiness {
                    marker: backend.readiness_marker().to_owned(),
                    timeout: config.readiness_timeout,
                    interval: config.poll_interval,
                }),
            )
            .await?;

        info!(
            base_path = %base_path.display(),
            serve = %serve_dir.display(),
            http = %server.http_addr(),
            %transport,
            "harness ready"
        );

        Ok(Self {
            ctx,
            backend,
            config,
            executable,
            transport,
            server,
            routes,
            daemon,
        })
    }

    /// Create, initialize, and register a handle for the context's current
    /// package in its current directory.
    pub async fn setup(&self) -> Result<Arc<dyn VcsHandle>> {
        let package = self.ctx.package();
        let dir = self.ctx.current();
        self.setup_at(package, dir).await
    }

    /// Like [`setup`](Self::setup) with an explicit package path and directory.
    ///
    /// The package slot is claimed before the repository is initialized, so
    /// concurrent calls for one package yield exactly one handle. The handle
    /// is removed from routing when the context tears down.
    pub async fn setup_at(
        &self,
        package: impl Into<String>,
        dir: impl Into<PathBuf>,
    ) -> Result<Arc<dyn VcsHandle>> {
        let package = package.into();
        let handle: Arc<dyn VcsHandle> = match self.backend {
            Backend::Git => Arc::new(GitHandle::new(
                &self.executable,
                dir,
                package,
                Identity {
                    name: self.config.committer_name.clone(),
                    email: self.config.committer_email.clone(),
                    message: self.config.commit_message.clone(),
                },
                self.routes.downgrade(),
            )),
        };
        self.routes.insert(Arc::clone(&handle))?;
        if let Err(e) = handle.create().await {
            handle.remove();
            return Err(e);
        }

        let registered = Arc::clone(&handle);
        self.ctx.on_clean(Box::new(move || {
            Box::pin(async move {
                registered.remove();
            })
        }));
        info!(package = handle.package_path(), dir = %handle.working_dir().display(), "handle ready");
        Ok(handle)
    }

    /// Close the HTTP listener. The daemon is stopped by its own cleanup.
    pub fn close(&self) {
        self.server.close();
    }

    pub fn state(&self) -> ControllerState {
        if self.server.is_closed() {
            ControllerState::Closed
        } else {
            ControllerState::Ready
        }
    }

    /// `host:port` of the redirect server.
    pub fn http_addr(&self) -> String {
        self.server.http_addr()
    }

    /// Daemon transport base, e.g. `git://localhost:9418/`.
    pub fn transport_base(&self) -> &str {
        &self.transport
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn daemon(&self) -> &SupervisedProcess {
        &self.daemon
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }
}

impl std::fmt::Debug for HarnessController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HarnessController")
            .field("backend", &self.backend)
            .field("http_addr", &self.server.http_addr())
            .field("transport", &self.transport)
            .field("routes", &self.routes)
            .field("daemon", &self.daemon)
            .finish()
    }
}
