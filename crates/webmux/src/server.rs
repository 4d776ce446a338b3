//! HTTP serving through axum
//!
//! Each request gets a [`StreamingTransport`] that forwards the response head
//! and body chunks to hyper as they are flushed, so long-lived responses such
//! as SSE streams reach the client immediately. A per-request cancellation
//! token fires when the client disconnects, the write deadline passes or the
//! server shuts down.
//!
//! HTTPS is delegated to rustls through `axum-server`; the same
//! [`RouterService`] answers on both listeners.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{self, HeaderMap, Response, StatusCode};
use axum_server::tls_rustls::RustlsConfig;
use bytes::{Bytes, BytesMut};
use std::future::IntoFuture;
use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::context::Request;
use crate::error::{Error, Result};
use crate::responses;
use crate::router::{Router, RouterService};
use crate::writer::Transport;

/// Buffered body bytes before a write forces a chunk out
const CHUNK_SIZE: usize = 8 * 1024;

/// Body chunks queued towards hyper
const BODY_CHANNEL_CAPACITY: usize = 16;

type BodyChunk = io::Result<Bytes>;

/// Transport feeding an axum response
pub struct StreamingTransport {
    headers: HeaderMap,
    status: Option<StatusCode>,
    head: Option<oneshot::Sender<Response<Body>>>,
    body_rx: Option<mpsc::Receiver<BodyChunk>>,
    body_tx: mpsc::Sender<BodyChunk>,
    buf: BytesMut,
}

impl StreamingTransport {
    /// A transport and the receiver its response head is delivered on
    pub fn new() -> (Self, oneshot::Receiver<Response<Body>>) {
        let (head_tx, head_rx) = oneshot::channel();
        let (body_tx, body_rx) = mpsc::channel(BODY_CHANNEL_CAPACITY);
        let transport = Self {
            headers: HeaderMap::new(),
            status: None,
            head: Some(head_tx),
            body_rx: Some(body_rx),
            body_tx,
            buf: BytesMut::new(),
        };
        (transport, head_rx)
    }

    /// Hand the head to hyper. Later calls do nothing.
    fn send_head(&mut self) {
        let Some(head) = self.head.take() else {
            return;
        };
        let body = match self.body_rx.take() {
            Some(rx) => Body::from_stream(ReceiverStream::new(rx)),
            None => Body::empty(),
        };
        let mut response = Response::new(body);
        *response.status_mut() = self.status.unwrap_or(StatusCode::OK);
        *response.headers_mut() = std::mem::take(&mut self.headers);
        if head.send(response).is_err() {
            debug!("Response head dropped, client is gone");
        }
    }

    async fn send_chunk(&mut self) -> io::Result<()> {
        self.send_head();
        if self.buf.is_empty() {
            return Ok(());
        }
        let chunk = self.buf.split().freeze();
        self.body_tx
            .send(Ok(chunk))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "client disconnected"))
    }

    /// Send whatever is left and end the body
    pub async fn finish(mut self) {
        if self.status.is_none() {
            self.write_head(StatusCode::OK);
        }
        if let Err(e) = self.send_chunk().await {
            debug!(error = %e, "Dropping unsent response bytes");
        }
    }
}

#[async_trait]
impl Transport for StreamingTransport {
    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn write_head(&mut self, status: StatusCode) {
        if self.status.is_none() {
            self.status = Some(status);
        }
    }

    async fn write_body(&mut self, chunk: &[u8]) -> io::Result<()> {
        if self.status.is_none() {
            self.write_head(StatusCode::OK);
        }
        self.buf.extend_from_slice(chunk);
        if self.buf.len() >= CHUNK_SIZE {
            self.send_chunk().await?;
        }
        Ok(())
    }

    fn can_flush(&self) -> bool {
        true
    }

    async fn flush(&mut self) -> io::Result<()> {
        self.send_chunk().await
    }
}

impl RouterService {
    /// Serve one HTTP request.
    ///
    /// The router runs in its own task so that streaming responses can be
    /// returned to hyper while handlers keep writing.
    pub async fn handle(&self, request: http::Request<Body>) -> Response<Body> {
        let cancel = self.inner.shutdown.child_token();
        let deadline = self.inner.config.write_timeout();
        let (mut transport, head) = StreamingTransport::new();
        let request = match self.inner.config.read_timeout() {
            Some(limit) => request.map(|body| with_read_timeout(body, limit)),
            None => request,
        };
        let req = Request::with_cancellation(request, cancel.clone());
        let service = self.clone();

        tokio::spawn(async move {
            let disconnected = transport.body_tx.clone();
            let watchdog = async {
                match deadline {
                    Some(limit) => tokio::select! {
                        _ = disconnected.closed() => {}
                        _ = tokio::time::sleep(limit) => debug!("Write deadline exceeded"),
                    },
                    None => disconnected.closed().await,
                }
                cancel.cancel();
                std::future::pending::<()>().await
            };

            tokio::select! {
                () = service.dispatch(&mut transport, req) => {}
                () = watchdog => {}
            }
            drop(disconnected);
            transport.finish().await;
        });

        match head.await {
            Ok(response) => response,
            Err(_) => {
                error!("Request handler ended without a response");
                let mut response = Response::new(Body::from(responses::ERR_INTERNAL_SERVER));
                *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                response
            }
        }
    }

    /// An axum application serving every request through this router
    pub fn into_axum(self) -> axum::Router {
        axum::Router::new()
            .fallback(move |request: axum::extract::Request| {
                let service = self.clone();
                async move { service.handle(request).await }
            })
            .layer(TraceLayer::new_for_http())
    }

    /// Serve connections from `listener` until shutdown.
    ///
    /// After shutdown begins, in-flight requests get the configured shutdown
    /// timeout to finish.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let shutdown = self.shutdown_token();
        let grace = self.inner.config.shutdown_timeout();

        let graceful = shutdown.clone();
        let server = axum::serve(listener, self.into_axum())
            .with_graceful_shutdown(async move { graceful.cancelled().await })
            .into_future();
        let drain_deadline = async {
            shutdown.cancelled().await;
            tokio::time::sleep(grace).await;
        };

        tokio::select! {
            served = server => served?,
            () = drain_deadline => warn!(timeout_ms = grace.as_millis() as u64, "Shutdown timeout reached, dropping open connections"),
        }

        info!("Server shutdown complete");
        Ok(())
    }
}

impl RouterService {
    /// Serve HTTPS on `addr` until shutdown, draining like [`RouterService::serve`]
    pub async fn serve_tls(self, addr: SocketAddr, tls: RustlsConfig) -> Result<()> {
        let shutdown = self.shutdown_token();
        let grace = self.inner.config.shutdown_timeout();

        let handle = axum_server::Handle::new();
        let draining = handle.clone();
        tokio::spawn(async move {
            shutdown.cancelled().await;
            draining.graceful_shutdown(Some(grace));
        });

        info!(%addr, "HTTPS server listening");
        axum_server::bind_rustls(addr, tls)
            .handle(handle)
            .serve(self.into_axum().into_make_service())
            .await?;

        info!("HTTPS server shutdown complete");
        Ok(())
    }
}

impl Router {
    /// Bind the configured address and serve until Ctrl+C or SIGTERM.
    ///
    /// When a certificate and key are configured, HTTPS is served on the
    /// HTTPS port as well.
    pub async fn start(self) -> Result<()> {
        let addr = self.config().socket_addr()?;
        let tls = match self.config().tls_files() {
            Some((cert, key)) => Some((self.config().https_addr()?, load_tls(cert, key).await?)),
            None => None,
        };
        let service = self.into_service();

        let listener = TcpListener::bind(addr).await?;
        info!(%addr, "HTTP server listening");
        spawn_signal_handler(&service);

        match tls {
            Some((https_addr, tls)) => {
                tokio::try_join!(
                    service.clone().serve(listener),
                    service.serve_tls(https_addr, tls)
                )?;
                Ok(())
            }
            None => service.serve(listener).await,
        }
    }

    /// Serve HTTPS only, using the configured certificate and key
    pub async fn start_https(self) -> Result<()> {
        let Some((cert, key)) = self.config().tls_files() else {
            return Err(Error::Config("certFile and keyFile are required for HTTPS".into()));
        };
        let tls = load_tls(cert, key).await?;
        let addr = self.config().https_addr()?;
        let service = self.into_service();

        spawn_signal_handler(&service);
        service.serve_tls(addr, tls).await
    }
}

/// Read a PEM certificate chain and private key
pub async fn load_tls(cert: &Path, key: &Path) -> Result<RustlsConfig> {
    // both ring and aws-lc may be linked; pin the process default to ring
    let _ = rustls::crypto::ring::default_provider().install_default();
    RustlsConfig::from_pem_file(cert, key).await.map_err(|e| {
        Error::Config(format!(
            "cannot load TLS files '{}' and '{}': {e}",
            cert.display(),
            key.display()
        ))
    })
}

fn spawn_signal_handler(service: &RouterService) {
    let service = service.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        service.shutdown();
    });
}

/// Fail body reads that wait longer than `limit` for the next chunk
fn with_read_timeout(body: Body, limit: Duration) -> Body {
    let chunks = body
        .into_data_stream()
        .timeout(limit)
        .map(|chunk| match chunk {
            Ok(Ok(bytes)) => Ok(bytes),
            Ok(Err(e)) => Err(io::Error::other(e)),
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "request body read timed out")),
        });
    Body::from_stream(chunks)
}

/// Resolves on Ctrl+C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
