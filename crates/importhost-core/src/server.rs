//! HTTP side of the fake host: answers `?go-import=1` style lookups with a
//! meta tag pointing at the daemon's transport URL.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, OnceLock};

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::response::{Html, IntoResponse, Response};
use percent_encoding::percent_decode_str;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::backend::Backend;
use crate::error::{HarnessError, Result};
use crate::routes::RouteTable;
use crate::vcs::VcsHandle;

/// Everything a request needs to build its answer.
#[derive(Clone)]
pub struct RedirectState {
    http_addr: String,
    backend: Backend,
    transport: Arc<OnceLock<String>>,
    routes: RouteTable,
}

impl RedirectState {
    pub fn new(http_addr: impl Into<String>, backend: Backend, routes: RouteTable) -> Self {
        Self {
            http_addr: http_addr.into(),
            backend,
            transport: Arc::new(OnceLock::new()),
            routes,
        }
    }

    /// Publish the daemon's transport base (e.g. `git://localhost:9418/`).
    ///
    /// Only the first call has an effect; returns whether it was this one.
    pub fn set_transport(&self, base: impl Into<String>) -> bool {
        self.transport.set(base.into()).is_ok()
    }

    pub fn transport(&self) -> Option<&str> {
        self.transport.get().map(String::as_str)
    }

    /// The go-import document for `handle`.
    pub fn meta_document(&self, handle: &dyn VcsHandle) -> String {
        let pkg = handle.package_path();
        format!(
            "<html><head><meta name=\"go-import\" content=\"{addr}/{pkg} {kind} {transport}{pkg}{suffix}\"></head></html>\n",
            addr = self.http_addr,
            kind = self.backend.vcs_kind(),
            transport = self.transport().unwrap_or_default(),
            suffix = self.backend.transport_suffix(),
        )
    }
}

/// Router that answers every path from the live routing table.
pub fn build_router(state: RedirectState) -> Router {
    Router::new()
        .fallback(redirect)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn redirect(State(state): State<RedirectState>, uri: Uri) -> Response {
    // Package paths are registered unescaped.
    let decoded = percent_decode_str(uri.path()).decode_utf8_lossy();
    let path = decoded.strip_prefix('/').unwrap_or(&decoded);

    match state.routes.resolve(path) {
        Some(handle) => {
            tracing::debug!(path, package = handle.package_path(), "go-import hit");
            Html(state.meta_document(handle.as_ref())).into_response()
        }
        None => {
            tracing::debug!(path, "go-import miss");
            (StatusCode::NOT_FOUND, "repo not found").into_response()
        }
    }
}

/// A running redirect server bound to an ephemeral local port.
pub struct RedirectServer {
    addr: SocketAddr,
    state: RedirectState,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RedirectServer {
    /// Bind `host:0` and start serving in the background.
    pub async fn start(host: &str, backend: Backend, routes: RouteTable) -> Result<Self> {
        let bind_addr = format!("{host}:0");
        let listener = TcpListener::bind(&bind_addr)
            .await
            .map_err(|source| HarnessError::Bind {
                addr: bind_addr.clone(),
                source,
            })?;
        let addr = listener.local_addr().map_err(|source| HarnessError::Bind {
            addr: bind_addr,
            source,
        })?;

        let state = RedirectState::new(addr.to_string(), backend, routes);
        let app = build_router(state.clone());
        let shutdown = CancellationToken::new();
        let stop = shutdown.clone();

        let task = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { stop.cancelled().await })
                .await;
            if let Err(e) = result {
                tracing::error!(%addr, error = %e, "redirect server failed");
            }
            tracing::debug!(%addr, "redirect server stopped");
        });

        tracing::info!(%addr, "redirect server listening");
        Ok(Self {
            addr,
            state,
            shutdown,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// `host:port` as advertised in meta tags.
    pub fn http_addr(&self) -> String {
        self.addr.to_string()
    }

    pub fn state(&self) -> &RedirectState {
        &self.state
    }

    /// Stop accepting connections. Later calls do nothing.
    pub fn close(&self) {
        if !self.shutdown.is_cancelled() {
            tracing::debug!(addr = %self.addr, "closing redirect listener");
            self.shutdown.cancel();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Close and wait for the serve loop to finish.
    pub async fn shutdown(&self) {
        self.close();
        let task = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!(addr = %self.addr, error = %e, "redirect server task panicked");
            }
        }
    }

    /// Token that closes this server when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}

impl std::fmt::Debug for RedirectServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedirectServer")
            .field("addr", &self.addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}
