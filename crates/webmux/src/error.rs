//! Error types for webmux

use thiserror::Error;

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in webmux
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid router or server configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// A route was registered with an HTTP method the router does not serve
    #[error("Unsupported HTTP method provided. Method: '{method}'")]
    UnsupportedMethod { method: String },

    /// A route was registered without any handler
    #[error("No handlers provided for the route '{pattern}', method '{method}'")]
    NoHandlers { pattern: String, method: String },

    /// A route pattern could not be compiled
    #[error("Unsupported URI pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// The underlying transport lacks an optional capability
    #[error("{0} not supported by the underlying transport")]
    Unsupported(&'static str),

    /// The connection cannot be flushed incrementally
    #[error("Streaming not supported")]
    StreamingUnsupported,

    /// The request was cancelled (client went away, shutdown or deadline)
    #[error("request cancelled")]
    Cancelled,

    /// No SSE client is registered under the id
    #[error("SSE client '{0}' not found")]
    ClientNotFound(String),

    /// The SSE client was removed while a message was on its way
    #[error("SSE client '{0}' is closed")]
    ClientClosed(String),

    /// The SSE client's buffer is full and the send policy refuses to wait
    #[error("SSE client '{0}' buffer is full")]
    ChannelFull(String),

    /// The SSE client did not accept the message in time
    #[error("timed out sending to SSE client '{0}'")]
    SendTimeout(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding/decoding errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether this error only reports that the request was dropped
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}
