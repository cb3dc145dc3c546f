//! HTTP server and graceful shutdown.
//!
//! # Graceful shutdown and Kubernetes
//!
//! When Kubernetes terminates a pod it sends **SIGTERM** and waits
//! `terminationGracePeriodSeconds` (default 30 s) before sending SIGKILL.
//!
//! The server reacts by:
//! 1. Immediately stopping `listener.accept()`, so no new connections are made.
//! 2. Asking every open connection to finish its in-flight request and close.
//! 3. Returning from [`Server::serve`] once all of them have, which lets
//!    `main` exit cleanly.
//!
//! Upgraded WebSocket connections are detached from the server once the
//! handshake completes; their handlers decide when they end.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::error::Result;
use crate::router::Router;

/// How long a client may take to send a complete request head.
const HEADER_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// The HTTP server. Speaks HTTP/1.1 and HTTP/2, whichever the client picks.
pub struct Server {
    listener: TcpListener,
    header_read_timeout: Option<Duration>,
}

impl Server {
    /// Binds a listener on `addr`.
    ///
    /// ```rust,no_run
    /// # async fn run() -> kumo::Result<()> {
    /// use kumo::{Router, Server};
    /// let server = Server::bind("0.0.0.0:3000").await?;
    /// server.serve(Router::new()).await
    /// # }
    /// ```
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Self> {
        Ok(Self::from_listener(TcpListener::bind(addr).await?))
    }

    /// Serves on an already-bound listener.
    pub fn from_listener(listener: TcpListener) -> Self {
        Self { listener, header_read_timeout: Some(HEADER_READ_TIMEOUT) }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Limits how long an HTTP/1 client may take to send its request head
    /// (default 10 s). `None` waits forever.
    pub fn header_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.header_read_timeout = timeout;
        self
    }

    /// Starts accepting connections and dispatching them through `router`.
    ///
    /// Returns only after a full graceful shutdown (SIGTERM or Ctrl-C,
    /// followed by all in-flight requests completing).
    pub async fn serve(self, router: Router) -> Result<()> {
        self.serve_with_shutdown(router, shutdown_signal()).await
    }

    /// Like [`serve`](Self::serve), but stops when `signal` resolves.
    pub async fn serve_with_shutdown<F>(self, router: Router, signal: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let addr = self.listener.local_addr()?;
        let router = Arc::new(router);

        info!(%addr, "kumo listening");

        // every connection watches this; flipping it starts their shutdown
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut tasks = tokio::task::JoinSet::new();

        tokio::pin!(signal);

        loop {
            tokio::select! {
                // shutdown first, so a queued backlog cannot delay it
                biased;

                () = &mut signal => {
                    info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                    break;
                }

                res = self.listener.accept() => {
                    let (stream, peer) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!(error = %e, "accept error");
                            continue;
                        }
                    };
                    let router = Arc::clone(&router);
                    let stop = stop_rx.clone();
                    let timeout = self.header_read_timeout;
                    tasks.spawn(serve_connection(TokioIo::new(stream), peer, router, stop, timeout));
                }

                // reap finished connections so the set does not grow without bound
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        let _ = stop_tx.send(true);
        while tasks.join_next().await.is_some() {}

        info!("kumo stopped");
        Ok(())
    }
}

async fn serve_connection(
    io: TokioIo<tokio::net::TcpStream>,
    peer: SocketAddr,
    router: Arc<Router>,
    mut stop: watch::Receiver<bool>,
    header_read_timeout: Option<Duration>,
) {
    // called once per request on the connection, not once per connection
    let svc = service_fn(move |req| {
        let router = Arc::clone(&router);
        async move { Ok::<_, Infallible>(router.handle(req).await) }
    });

    let mut builder = ConnBuilder::new(TokioExecutor::new());
    if let Some(timeout) = header_read_timeout {
        builder.http1().timer(TokioTimer::new()).header_read_timeout(timeout);
    }

    let conn = builder.serve_connection_with_upgrades(io, svc);
    tokio::pin!(conn);

    let res = tokio::select! {
        res = conn.as_mut() => res,
        _ = stop.changed() => {
            conn.as_mut().graceful_shutdown();
            conn.await
        }
    };
    if let Err(e) = res {
        debug!(%peer, error = %e, "connection closed with error");
    }
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first shutdown signal the process receives.
///
/// On Unix this listens for both **SIGTERM** (sent by `kubectl` and the
/// Kubernetes control plane) and **SIGINT** (Ctrl-C, for local dev).
/// On Windows only Ctrl-C is available.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let sigterm = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}
