//! Response writer with status and write tracking
//!
//! Handlers never touch the connection directly. They write through a
//! [`ResponseWriter`], which remembers the status it was (or will be) sent
//! with, whether the head is on the wire and whether any body bytes were
//! written. The router relies on the last flag to short-circuit handler
//! chains, and middleware reads the status after the chain returns.

use async_trait::async_trait;
use axum::http::{HeaderMap, StatusCode};
use std::io;

use crate::error::{Error, Result};

/// The connection a response is written to
#[async_trait]
pub trait Transport: Send + Sync {
    /// Headers staged for the response head
    fn headers(&self) -> &HeaderMap;

    /// Mutable access to the staged headers
    fn headers_mut(&mut self) -> &mut HeaderMap;

    /// Commit the status line and the staged headers.
    ///
    /// Called at most once per response by [`ResponseWriter`].
    fn write_head(&mut self, status: StatusCode);

    /// Append body bytes
    async fn write_body(&mut self, chunk: &[u8]) -> io::Result<()>;

    /// Whether buffered bytes can be pushed to the peer on demand
    fn can_flush(&self) -> bool {
        false
    }

    /// Push buffered bytes to the peer
    async fn flush(&mut self) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "flush"))
    }

    /// Initiate a server push for `target`
    fn push(&mut self, target: &str) -> io::Result<()> {
        let _ = target;
        Err(io::Error::new(io::ErrorKind::Unsupported, "push"))
    }
}

/// Status-tracking wrapper around a [`Transport`]
pub struct ResponseWriter<'t> {
    transport: &'t mut dyn Transport,
    status: StatusCode,
    header_committed: bool,
    body_written: bool,
}

impl<'t> ResponseWriter<'t> {
    pub fn new(transport: &'t mut dyn Transport) -> Self {
        Self {
            transport,
            status: StatusCode::OK,
            header_committed: false,
            body_written: false,
        }
    }

    pub fn headers(&self) -> &HeaderMap {
        self.transport.headers()
    }

    /// Headers for the response. Changes after the head is committed are not sent.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        self.transport.headers_mut()
    }

    /// Set the status the head will carry once it is committed.
    ///
    /// Ignored after the head has been written.
    pub fn set_status(&mut self, status: StatusCode) {
        if !self.header_committed {
            self.status = status;
        }
    }

    /// Commit the head with `status`. Only the first call has any effect.
    pub fn write_header(&mut self, status: StatusCode) {
        if self.header_committed {
            return;
        }
        self.status = status;
        self.header_committed = true;
        self.transport.write_head(status);
    }

    /// Write body bytes, committing the head with the pending status first.
    pub async fn write(&mut self, body: &[u8]) -> io::Result<usize> {
        self.write_header(self.status);
        self.body_written = true;
        self.transport.write_body(body).await?;
        Ok(body.len())
    }

    /// Status sent with the head, or the one it will be sent with
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn header_committed(&self) -> bool {
        self.header_committed
    }

    /// Whether any body write happened on this response
    pub fn body_written(&self) -> bool {
        self.body_written
    }

    pub fn can_flush(&self) -> bool {
        self.transport.can_flush()
    }

    /// Push everything written so far to the client
    pub async fn flush(&mut self) -> Result<()> {
        if !self.transport.can_flush() {
            return Err(Error::Unsupported("flush"));
        }
        self.write_header(self.status);
        self.transport.flush().await?;
        Ok(())
    }

    pub fn push(&mut self, target: &str) -> Result<()> {
        self.transport.push(target).map_err(|e| match e.kind() {
            io::ErrorKind::Unsupported => Error::Unsupported("push"),
            _ => Error::Io(e),
        })
    }

    /// The transport underneath, bypassing status tracking
    pub fn original(&mut self) -> &mut dyn Transport {
        &mut *self.transport
    }
}

impl std::fmt::Debug for ResponseWriter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseWriter")
            .field("status", &self.status)
            .field("header_committed", &self.header_committed)
            .field("body_written", &self.body_written)
            .finish()
    }
}
