//! Accept loop with per-connection lifecycle tracking.
//!
//! Every accepted socket is registered with the [`ResourceTracker`] and
//! served on its own task inside the controller's connection
//! [`TaskTracker`](tokio_util::task::TaskTracker):
//!
//! ```text
//!   accept ──► add_connection ──► [TLS handshake] ──► serve HTTP/1 or HTTP/2
//!                                                       │
//!                  close token cancelled ◄──────────────┤
//!                          │                            │ peer closes
//!                          ▼                            ▼
//!          graceful_shutdown + drain grace ──► remove_connection
//! ```
//!
//! The loop stops when the controller cancels its accept token. Connections
//! still open at that point finish in-flight requests until their grace
//! period expires, then they are dropped.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::ConnectInfo;
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tokio_rustls::rustls::pki_types::pem::PemObject;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::{self, ServerConfig};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::lifecycle::ShutdownController;

/// Pause after a failed `accept`, typically file-descriptor exhaustion.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

trait ConnectionIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> ConnectionIo for T {}

pub struct Server {
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
    connection_drain: Duration,
}

impl Server {
    /// Bind the configured address.
    ///
    /// In production with both TLS paths set the server speaks HTTPS; if the
    /// certificate or key cannot be loaded it logs a warning and serves
    /// plain HTTP.
    pub async fn bind(config: &Config) -> AppResult<Self> {
        let listener = TcpListener::bind(config.server_addr()).await?;
        let mut server = Self::from_listener(listener, config.connection_drain);

        match config.tls_paths() {
            Some((cert, key)) => match load_tls(cert, key) {
                Ok(acceptor) => {
                    info!(cert = %cert.display(), "TLS enabled");
                    server.tls = Some(acceptor);
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load TLS certificate, falling back to HTTP");
                }
            },
            None if config.is_production() => {
                warn!("TLS_CERT_PATH/TLS_KEY_PATH not set, serving plain HTTP in production");
            }
            None => {}
        }

        Ok(server)
    }

    /// Wrap an already bound listener (plain HTTP).
    pub fn from_listener(listener: TcpListener, connection_drain: Duration) -> Self {
        Self {
            listener,
            tls: None,
            connection_drain,
        }
    }

    pub fn with_tls(mut self, acceptor: TlsAcceptor) -> Self {
        self.tls = Some(acceptor);
        self
    }

    pub fn local_addr(&self) -> AppResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    /// Serve `router` until the controller stops accepting.
    pub async fn run(self, router: Router, controller: Arc<ShutdownController>) -> AppResult<()> {
        let accept = controller.accept_token();

        loop {
            let (stream, peer) = tokio::select! {
                biased;

                _ = accept.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "Failed to accept connection");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                        continue;
                    }
                },
            };

            self.spawn_connection(stream, peer, &router, &controller);
        }

        info!("Listener closed");
        Ok(())
    }

    fn spawn_connection(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        router: &Router,
        controller: &ShutdownController,
    ) {
        let tracker = controller.tracker().clone();
        let (id, close) = tracker.add_connection();
        let router = router.clone();
        let tls = self.tls.clone();
        let grace = self.connection_drain;

        controller.connection_tasks().spawn(async move {
            debug!(%peer, "Connection opened");

            let io: Option<Box<dyn ConnectionIo>> = match tls {
                None => Some(Box::new(stream) as Box<dyn ConnectionIo>),
                Some(acceptor) => tokio::select! {
                    _ = close.cancelled() => None,
                    handshake = acceptor.accept(stream) => match handshake {
                        Ok(tls_stream) => Some(Box::new(tls_stream) as Box<dyn ConnectionIo>),
                        Err(e) => {
                            debug!(%peer, error = %e, "TLS handshake failed");
                            None
                        }
                    },
                },
            };

            if let Some(io) = io {
                serve_connection(io, peer, router, close, grace).await;
            }

            tracker.remove_connection(id);
            debug!(%peer, "Connection closed");
        });
    }
}

async fn serve_connection(
    io: Box<dyn ConnectionIo>,
    peer: SocketAddr,
    router: Router,
    close: CancellationToken,
    grace: Duration,
) {
    let service = hyper::service::service_fn(move |mut req: hyper::Request<Incoming>| {
        req.extensions_mut().insert(ConnectInfo(peer));
        router.clone().oneshot(req)
    });

    let builder = auto::Builder::new(TokioExecutor::new());
    let conn = builder.serve_connection(TokioIo::new(io), service);
    tokio::pin!(conn);

    tokio::select! {
        result = conn.as_mut() => {
            if let Err(e) = result {
                debug!(%peer, error = %e, "Connection error");
            }
        }
        _ = close.cancelled() => {
            conn.as_mut().graceful_shutdown();
            match tokio::time::timeout(grace, conn.as_mut()).await {
                Ok(Ok(())) => debug!(%peer, "Connection drained"),
                Ok(Err(e)) => debug!(%peer, error = %e, "Connection error while draining"),
                Err(_) => debug!(%peer, "Drain grace expired, dropping connection"),
            }
        }
    }
}

/// Build a TLS acceptor from PEM certificate chain and private key files.
///
/// Negotiates HTTP/2 or HTTP/1.1 via ALPN.
pub fn load_tls(cert_path: &Path, key_path: &Path) -> AppResult<TlsAcceptor> {
    let certs = CertificateDer::pem_file_iter(cert_path)
        .and_then(|certs| certs.collect::<Result<Vec<_>, _>>())
        .map_err(|e| {
            AppError::Config(format!(
                "Invalid TLS certificate {}: {e}",
                cert_path.display()
            ))
        })?;
    if certs.is_empty() {
        return Err(AppError::Config(format!(
            "No certificates found in {}",
            cert_path.display()
        )));
    }

    let key = PrivateKeyDer::from_pem_file(key_path)
        .map_err(|e| AppError::Config(format!("Invalid TLS key {}: {e}", key_path.display())))?;

    let mut tls_config =
        ServerConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()
            .map_err(|e| AppError::Config(format!("TLS setup failed: {e}")))?
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| AppError::Config(format!("TLS certificate rejected: {e}")))?;
    tls_config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    Ok(TlsAcceptor::from(Arc::new(tls_config)))
}
