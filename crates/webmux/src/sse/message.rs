//! SSE message framing

use bytes::{BufMut, BytesMut};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// One event pushed to SSE clients.
///
/// Fields left empty are omitted from the frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    pub event: Option<String>,
    pub id: Option<String>,
    pub data: Option<String>,
    /// Reconnection delay suggested to the client
    pub retry: Option<Duration>,
}

impl Message {
    /// A message carrying only `data`
    pub fn new(data: impl Into<String>) -> Self {
        Self {
            data: Some(data.into()),
            ..Self::default()
        }
    }

    /// A message whose data is `value` encoded as JSON
    pub fn json<T: Serialize + ?Sized>(value: &T) -> serde_json::Result<Self> {
        Ok(Self::new(serde_json::to_string(value)?))
    }

    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.event = Some(event.into());
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_retry(mut self, retry: Duration) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Append the wire frame to `buf`.
    ///
    /// Lines come in `event`, `id`, `data`, `retry` order and the frame ends
    /// with a blank line. Multi-line data is sent as one `data:` line per line.
    pub fn encode(&self, buf: &mut BytesMut) {
        if let Some(event) = non_empty(&self.event) {
            put_line(buf, "event", event);
        }
        if let Some(id) = non_empty(&self.id) {
            put_line(buf, "id", id);
        }
        if let Some(data) = non_empty(&self.data) {
            for line in data.lines() {
                put_line(buf, "data", line);
            }
        }
        if let Some(retry) = self.retry.filter(|r| !r.is_zero()) {
            put_line(buf, "retry", &retry.as_millis().to_string());
        }
        buf.put_u8(b'\n');
    }

    pub fn to_bytes(&self) -> bytes::Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.to_bytes()))
    }
}

impl From<&str> for Message {
    fn from(data: &str) -> Self {
        Self::new(data)
    }
}

impl From<String> for Message {
    fn from(data: String) -> Self {
        Self::new(data)
    }
}

fn non_empty(field: &Option<String>) -> Option<&str> {
    field.as_deref().filter(|v| !v.is_empty())
}

fn put_line(buf: &mut BytesMut, field: &str, value: &str) {
    buf.put_slice(field.as_bytes());
    buf.put_u8(b':');
    buf.put_slice(value.as_bytes());
    buf.put_u8(b'\n');
}
