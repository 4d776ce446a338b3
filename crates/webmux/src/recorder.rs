//! In-memory transport for tests and embedding

use async_trait::async_trait;
use axum::http::{HeaderMap, StatusCode};
use bytes::BytesMut;
use std::io;

use crate::writer::Transport;

/// Records everything a handler writes.
///
/// Headers are snapshotted when the head is committed, like on a real
/// connection.
#[derive(Debug)]
pub struct Recorder {
    staged: HeaderMap,
    head: Option<(StatusCode, HeaderMap)>,
    body: BytesMut,
    flushable: bool,
    flushes: usize,
}

impl Default for Recorder {
    fn default() -> Self {
        Self::new()
    }
}

impl Recorder {
    pub fn new() -> Self {
        Self {
            staged: HeaderMap::new(),
            head: None,
            body: BytesMut::new(),
            flushable: true,
            flushes: 0,
        }
    }

    /// A recorder that reports no flush capability
    pub fn unflushable() -> Self {
        Self {
            flushable: false,
            ..Self::new()
        }
    }

    /// Committed status, `200` when nothing was committed
    pub fn status(&self) -> StatusCode {
        self.head.as_ref().map_or(StatusCode::OK, |(status, _)| *status)
    }

    pub fn is_committed(&self) -> bool {
        self.head.is_some()
    }

    /// Header value as sent, or as staged when the head is still pending
    pub fn header(&self, name: &str) -> Option<&str> {
        let headers = self.head.as_ref().map_or(&self.staged, |(_, h)| h);
        headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn body_string(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Number of flushes performed
    pub fn flushes(&self) -> usize {
        self.flushes
    }
}

#[async_trait]
impl Transport for Recorder {
    fn headers(&self) -> &HeaderMap {
        &self.staged
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.staged
    }

    fn write_head(&mut self, status: StatusCode) {
        if self.head.is_none() {
            self.head = Some((status, self.staged.clone()));
        }
    }

    async fn write_body(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.write_head(StatusCode::OK);
        self.body.extend_from_slice(chunk);
        Ok(())
    }

    fn can_flush(&self) -> bool {
        self.flushable
    }

    async fn flush(&mut self) -> io::Result<()> {
        if !self.flushable {
            return Err(io::Error::new(io::ErrorKind::Unsupported, "flush"));
        }
        self.write_head(StatusCode::OK);
        self.flushes += 1;
        Ok(())
    }
}
