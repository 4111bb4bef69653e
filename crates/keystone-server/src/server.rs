//! HTTP/1 server loop.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use keystone_config::ServerConfig;
use keystone_core::{Response, StructuredError};
use tokio::net::{TcpListener, TcpStream};

use crate::error::ServerError;
use crate::router::Router;
use crate::shutdown::{ConnectionTracker, ShutdownSignal};
use crate::transport::{into_http_response, RemoteAddr};

/// Serves a [`Router`] over HTTP/1.1.
///
/// ```no_run
/// use keystone_config::ServerConfig;
/// use keystone_server::{Router, Server};
///
/// # async fn run() -> Result<(), keystone_server::ServerError> {
/// let server = Server::new(Router::new(), ServerConfig::default());
/// server.run().await
/// # }
/// ```
#[derive(Debug)]
pub struct Server {
    router: Arc<Router>,
    config: ServerConfig,
}

impl Server {
    /// Creates a server for `router`.
    #[must_use]
    pub fn new(router: Router, config: ServerConfig) -> Self {
        Self {
            router: Arc::new(router),
            config,
        }
    }

    /// The routes being served.
    #[must_use]
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// The transport configuration.
    #[must_use]
    pub const fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Runs until SIGINT/SIGTERM.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid or cannot be bound.
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_with_shutdown(ShutdownSignal::with_os_signals()).await
    }

    /// Binds the configured address and runs until `shutdown` fires.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid or cannot be bound.
    pub async fn run_with_shutdown(self, shutdown: ShutdownSignal) -> Result<(), ServerError> {
        let addr: SocketAddr = self
            .config
            .http_addr
            .parse()
            .map_err(|_| ServerError::InvalidAddress(self.config.http_addr.clone()))?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        self.serve(listener, shutdown).await
    }

    /// Serves connections from an already bound listener.
    ///
    /// After `shutdown` fires no new connections are accepted, open ones are
    /// asked to close, and the call waits up to the configured shutdown
    /// timeout for them to drain.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener's local address cannot be read.
    pub async fn serve(self, listener: TcpListener, shutdown: ShutdownSignal) -> Result<(), ServerError> {
        let local = listener.local_addr()?;
        tracing::info!(addr = %local, routes = self.router.len(), "Server listening");

        let tracker = ConnectionTracker::new();
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let guard = tracker.acquire();
                        let router = Arc::clone(&self.router);
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            serve_connection(stream, peer, router, shutdown).await;
                            drop(guard);
                        });
                    }
                    Err(err) => tracing::warn!(error = %err, "Failed to accept connection"),
                },
                () = shutdown.wait() => break,
            }
        }
        drop(listener);

        tracing::info!(active = tracker.active(), "Draining connections");
        if tokio::time::timeout(self.config.shutdown_timeout(), tracker.drained())
            .await
            .is_err()
        {
            tracing::warn!(
                active = tracker.active(),
                "Shutdown timeout elapsed with connections still open"
            );
        }
        tracing::info!("Server stopped");
        Ok(())
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    router: Arc<Router>,
    shutdown: ShutdownSignal,
) {
    let service = service_fn(move |request: http::Request<Incoming>| {
        let router = Arc::clone(&router);
        async move { Ok::<_, Infallible>(respond(&router, request, peer).await) }
    });

    let connection = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
    tokio::pin!(connection);

    tokio::select! {
        result = connection.as_mut() => {
            if let Err(err) = result {
                tracing::debug!(peer = %peer, error = %err, "Connection ended with error");
            }
        }
        () = shutdown.wait() => {
            connection.as_mut().graceful_shutdown();
            if let Err(err) = connection.await {
                tracing::debug!(peer = %peer, error = %err, "Connection closed during shutdown");
            }
        }
    }
}

async fn respond(
    router: &Router,
    request: http::Request<Incoming>,
    peer: SocketAddr,
) -> http::Response<Full<Bytes>> {
    let (mut parts, body) = request.into_parts();
    parts.extensions.insert(RemoteAddr(peer));

    match body.collect().await {
        Ok(collected) => {
            let request = http::Request::from_parts(parts, Full::new(collected.to_bytes()));
            router.handle(request).await
        }
        Err(err) => {
            let error = StructuredError::validation(format!("Failed to read request body: {err}"));
            into_http_response(Response::from_error(&error, false))
        }
    }
}
