//! HTTP/HTTPS server lifecycle.
//!
//! A `StaticTlsServer` moves through `Configured → Running → Stopped`. Only
//! `start` can fail, and only before the first connection is accepted: address
//! resolution, bind, and TLS context loading all happen up front. Stopping is
//! done through a cloneable `ServerHandle`.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum_server::tls_rustls::RustlsAcceptor;
use axum_server::{Handle, Server};
use hyper_util::rt::TokioTimer;
use tokio::sync::watch;

use crate::config::{ServerConfig, ServerLimits, TlsMode};
use crate::routes::create_router;
use crate::state::AppState;

use super::tls;

/// Server startup error
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to load TLS configuration: {0}")]
    TlsConfig(String),

    #[error("Server cannot start from the {0:?} state")]
    NotConfigured(ServerState),

    #[error("Server error: {0}")]
    Server(#[from] std::io::Error),
}

/// Lifecycle state of a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Configured,
    Running,
    Stopped,
}

/// Cloneable control handle for a running (or not yet started) server.
#[derive(Clone)]
pub struct ServerHandle {
    inner: Handle,
    state: Arc<watch::Sender<ServerState>>,
    stop_requested: Arc<AtomicBool>,
    grace: Duration,
}

impl ServerHandle {
    fn new(grace: Duration) -> Self {
        let (state, _) = watch::channel(ServerState::Configured);
        Self {
            inner: Handle::new(),
            state: Arc::new(state),
            stop_requested: Arc::new(AtomicBool::new(false)),
            grace,
        }
    }

    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    /// Stop accepting connections and drain in-flight ones.
    ///
    /// Idempotent. In-flight connections are closed once the grace period
    /// runs out. A server that never started goes straight to `Stopped`;
    /// a running one reaches `Stopped` only after its listener is closed
    /// and the drain has finished.
    pub fn stop(&self) {
        if self.stop_requested.swap(true, Ordering::SeqCst) {
            tracing::debug!("Stop already requested");
            return;
        }

        let never_started = self.state.send_if_modified(|state| {
            if *state == ServerState::Configured {
                *state = ServerState::Stopped;
                true
            } else {
                false
            }
        });
        if never_started {
            tracing::info!("Server stopped before it started");
            return;
        }

        tracing::info!(
            grace_secs = self.grace.as_secs(),
            "Stopping server, draining in-flight connections"
        );
        self.inner.graceful_shutdown(Some(self.grace));
    }

    /// Wait until the listener is accepting and return its address.
    ///
    /// Returns `None` if the server stops without ever listening.
    pub async fn listening(&self) -> Option<SocketAddr> {
        tokio::select! {
            addr = self.inner.listening() => addr,
            _ = self.stopped() => None,
        }
    }

    /// Wait until the server reaches `Stopped`.
    pub async fn stopped(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|state| *state == ServerState::Stopped).await;
    }

    /// Move `Configured → Running`; false if a stop got there first.
    fn mark_running(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == ServerState::Configured {
                *state = ServerState::Running;
                true
            } else {
                false
            }
        })
    }
}

/// Static file server for OTA images, over HTTP or HTTPS.
pub struct StaticTlsServer {
    config: Arc<ServerConfig>,
    limits: ServerLimits,
    handle: ServerHandle,
}

impl StaticTlsServer {
    pub fn new(config: ServerConfig) -> Self {
        Self::with_limits(config, ServerLimits::default())
    }

    pub fn with_limits(config: ServerConfig, limits: ServerLimits) -> Self {
        Self {
            config: Arc::new(config),
            handle: ServerHandle::new(limits.shutdown_grace),
            limits,
        }
    }

    pub fn handle(&self) -> ServerHandle {
        self.handle.clone()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bind and serve until `stop` is called.
    ///
    /// The server ends in `Stopped` whether this returns `Ok` or `Err`.
    pub async fn start(&self) -> Result<(), ServerError> {
        let state = self.handle.state();
        if state != ServerState::Configured {
            return Err(ServerError::NotConfigured(state));
        }

        let result = self.run().await;
        self.handle.state.send_replace(ServerState::Stopped);

        match &result {
            Ok(()) => tracing::info!("Server stopped"),
            Err(e) => tracing::error!(error = %e, "Server failed"),
        }
        result
    }

    async fn run(&self) -> Result<(), ServerError> {
        let tls_context = match self.config.tls() {
            TlsMode::Plain => None,
            TlsMode::Tls {
                cert_path,
                key_path,
            } => Some(tls::load_tls_context(cert_path, key_path).await?),
        };

        let listener = bind_listener(self.config.bind_host(), self.config.bind_port()).await?;
        let addr = listener.local_addr()?;

        let app = create_router(AppState::new(self.config.clone()))
            .into_make_service_with_connect_info::<SocketAddr>();

        if !self.handle.mark_running() {
            tracing::info!(%addr, "Stop requested before serving began");
            return Ok(());
        }

        let root = self.config.root_dir().display().to_string();
        match tls_context {
            None => {
                tracing::warn!(
                    %addr,
                    root = %root,
                    "Serving OTA images over plain HTTP (TLS disabled)"
                );
                let server = self.configure(axum_server::from_tcp(listener));
                server.serve(app).await?;
            }
            Some(tls_context) => {
                tracing::info!(%addr, root = %root, "Serving OTA images over HTTPS");
                let acceptor = RustlsAcceptor::new(tls_context)
                    .handshake_timeout(self.limits.tls_handshake_timeout);
                let server = self.configure(axum_server::from_tcp(listener).acceptor(acceptor));
                server.serve(app).await?;
            }
        }

        Ok(())
    }

    fn configure<A>(&self, server: Server<A>) -> Server<A> {
        let mut server = server.handle(self.handle.inner.clone());
        server
            .http_builder()
            .http1()
            .timer(TokioTimer::new())
            .header_read_timeout(self.limits.header_read_timeout);
        server
    }
}

/// Resolve `(host, port)` and bind a non-blocking listener on the first address.
async fn bind_listener(host: &str, port: u16) -> Result<std::net::TcpListener, ServerError> {
    let display = format!("{host}:{port}");
    let bind_error = |source: std::io::Error| ServerError::Bind {
        addr: display.clone(),
        source,
    };

    let addr = tokio::net::lookup_host((host, port))
        .await
        .map_err(bind_error)?
        .next()
        .ok_or_else(|| {
            bind_error(std::io::Error::new(
                std::io::ErrorKind::AddrNotAvailable,
                "host resolved to no addresses",
            ))
        })?;

    let listener = std::net::TcpListener::bind(addr).map_err(bind_error)?;
    listener.set_nonblocking(true).map_err(bind_error)?;
    Ok(listener)
}
