//! Server-Sent Events on top of the router
//!
//! [`Sse::handle`] turns a request into a long-lived event stream. Each
//! connection registers a [`Client`] whose messages are written and flushed
//! one frame at a time until the request is cancelled or the client is
//! removed.
//!
//! ```ignore
//! let sse = Sse::builder()
//!     .on_create_client(|client, active| tracing::info!(id = client.id(), active, "joined"))
//!     .build()?;
//!
//! let route = Route::new("events", Method::GET, "/events").handler(sse.clone());
//! sse.broadcast(Message::new("hello")).await;
//! ```

pub mod client;
pub mod message;

use async_trait::async_trait;
use axum::http::header::{CONNECTION, CONTENT_TYPE};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use bytes::BytesMut;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::context::Request;
use crate::error::{Error, Result};
use crate::handler::Handler;
use crate::responses;
use crate::writer::ResponseWriter;

pub use client::{Client, ClientRegistry, MessageReceiver, Registration, SendPolicy};
pub use message::Message;

/// Request header carrying the client id
pub const DEFAULT_CLIENT_ID_HEADER: &str = "sse-clientid";

/// Messages buffered per client
pub const DEFAULT_CHANNEL_CAPACITY: usize = 10;

/// Called after a client registers, with the active client count
pub type ClientHook = Arc<dyn Fn(&Client, usize) + Send + Sync>;

/// Called after a client is removed, with its id and the active client count
pub type RemoveHook = Arc<dyn Fn(&str, usize) + Send + Sync>;

/// Called before a message is written to a client
pub type BeforeSendHook = Arc<dyn Fn(&Client) + Send + Sync>;

/// Called after a write attempt, with the error if it failed
pub type SendHook = Arc<dyn Fn(&Client, Option<&Error>) + Send + Sync>;

/// Default response when the transport cannot stream
struct StreamingUnsupported;

#[async_trait]
impl Handler for StreamingUnsupported {
    async fn call(&self, w: &mut ResponseWriter<'_>, _req: &mut Request) {
        responses::send(
            w,
            responses::TEXT_CONTENT_TYPE,
            "Streaming not supported",
            StatusCode::NOT_IMPLEMENTED,
        )
        .await;
    }
}

/// SSE endpoint state shared by every connection
#[derive(Clone)]
pub struct Sse {
    client_id_header: HeaderName,
    clients: ClientRegistry,
    policy: SendPolicy,
    unsupported: Arc<dyn Handler>,
    on_create_client: Option<ClientHook>,
    on_remove_client: Option<RemoveHook>,
    before_send: Option<BeforeSendHook>,
    on_send: Option<SendHook>,
}

impl Default for Sse {
    fn default() -> Self {
        Self {
            client_id_header: HeaderName::from_static(DEFAULT_CLIENT_ID_HEADER),
            clients: ClientRegistry::new(DEFAULT_CHANNEL_CAPACITY),
            policy: SendPolicy::default(),
            unsupported: Arc::new(StreamingUnsupported),
            on_create_client: None,
            on_remove_client: None,
            before_send: None,
            on_send: None,
        }
    }
}

impl Sse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> SseBuilder {
        SseBuilder::default()
    }

    pub fn client_id_header(&self) -> &HeaderName {
        &self.client_id_header
    }

    pub fn clients(&self) -> &ClientRegistry {
        &self.clients
    }

    pub fn policy(&self) -> SendPolicy {
        self.policy
    }

    pub fn active_clients(&self) -> usize {
        self.clients.active_count()
    }

    pub fn client(&self, id: &str) -> Option<Arc<Client>> {
        self.clients.get(id)
    }

    /// Queue `message` for one client
    pub async fn send(&self, client_id: &str, message: impl Into<Message>) -> Result<()> {
        self.clients
            .send(client_id, Arc::new(message.into()), self.policy)
            .await
    }

    /// Queue `message` for every client, returning how many accepted it
    pub async fn broadcast(&self, message: impl Into<Message>) -> usize {
        let delivered = self
            .clients
            .broadcast(Arc::new(message.into()), self.policy)
            .await;
        debug!(delivered, "SSE broadcast");
        delivered
    }

    /// Remove a client and end its stream.
    ///
    /// Messages already queued are still written; the stream then reports the
    /// removal through the remove hook.
    pub fn remove_client(&self, client_id: &str) -> usize {
        self.clients.remove(client_id)
    }

    /// Stream events to the requesting client until it goes away.
    ///
    /// Returns `Ok` when the client was removed, [`Error::Cancelled`] when the
    /// request was cancelled and [`Error::StreamingUnsupported`] when the
    /// transport cannot flush. Write failures are returned as is.
    pub async fn handle(&self, w: &mut ResponseWriter<'_>, req: &mut Request) -> Result<()> {
        if !w.can_flush() {
            self.unsupported.call(w, req).await;
            return Err(Error::StreamingUnsupported);
        }

        let headers = w.headers_mut();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert(
            HeaderName::from_static("x-accel-buffering"),
            HeaderValue::from_static("no"),
        );
        w.write_header(StatusCode::OK);
        w.flush().await?;

        let client_id = req
            .headers()
            .get(&self.client_id_header)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let cancel = req.cancellation().clone();

        let Registration {
            client,
            mut messages,
            active,
        } = self.clients.register_with(client_id, cancel.clone());
        info!(client_id = %client.id(), active, "SSE client connected");
        if let Some(hook) = &self.on_create_client {
            hook(&client, active);
        }
        let _cleanup = CleanupGuard {
            sse: self,
            client: Arc::clone(&client),
        };

        let mut frame = BytesMut::new();
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                message = messages.recv() => {
                    let Some(message) = message else {
                        return Ok(());
                    };
                    if let Some(hook) = &self.before_send {
                        hook(&client);
                    }
                    frame.clear();
                    message.encode(&mut frame);
                    let written = write_frame(w, &frame).await;
                    if let Some(hook) = &self.on_send {
                        hook(&client, written.as_ref().err());
                    }
                    written?;
                }
            }
        }
    }
}

async fn write_frame(w: &mut ResponseWriter<'_>, frame: &[u8]) -> Result<()> {
    w.write(frame).await?;
    w.flush().await
}

#[async_trait]
impl Handler for Sse {
    async fn call(&self, w: &mut ResponseWriter<'_>, req: &mut Request) {
        match self.handle(w, req).await {
            Ok(()) | Err(Error::Cancelled) => {}
            Err(e) => warn!(path = req.path(), error = %e, "SSE stream ended with error"),
        }
    }
}

/// Removes the client however the stream ends
struct CleanupGuard<'a> {
    sse: &'a Sse,
    client: Arc<Client>,
}

impl Drop for CleanupGuard<'_> {
    fn drop(&mut self) {
        let active = self.sse.clients.remove_client(&self.client);
        info!(client_id = %self.client.id(), active, "SSE client disconnected");
        if let Some(hook) = &self.sse.on_remove_client {
            hook(self.client.id(), active);
        }
    }
}

/// Builder for [`Sse`]
pub struct SseBuilder {
    client_id_header: String,
    capacity: usize,
    policy: SendPolicy,
    unsupported: Option<Arc<dyn Handler>>,
    on_create_client: Option<ClientHook>,
    on_remove_client: Option<RemoveHook>,
    before_send: Option<BeforeSendHook>,
    on_send: Option<SendHook>,
}

impl Default for SseBuilder {
    fn default() -> Self {
        Self {
            client_id_header: DEFAULT_CLIENT_ID_HEADER.to_string(),
            capacity: DEFAULT_CHANNEL_CAPACITY,
            policy: SendPolicy::default(),
            unsupported: None,
            on_create_client: None,
            on_remove_client: None,
            before_send: None,
            on_send: None,
        }
    }
}

impl SseBuilder {
    /// Set the request header the client id is read from
    pub fn client_id_header(mut self, name: impl Into<String>) -> Self {
        self.client_id_header = name.into();
        self
    }

    /// Set the number of messages buffered per client
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set what happens when a client's buffer is full
    pub fn send_policy(mut self, policy: SendPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the response for transports that cannot stream
    pub fn unsupported_handler(mut self, handler: impl Handler) -> Self {
        self.unsupported = Some(Arc::new(handler));
        self
    }

    pub fn on_create_client<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Client, usize) + Send + Sync + 'static,
    {
        self.on_create_client = Some(Arc::new(hook));
        self
    }

    pub fn on_remove_client<F>(mut self, hook: F) -> Self
    where
        F: Fn(&str, usize) + Send + Sync + 'static,
    {
        self.on_remove_client = Some(Arc::new(hook));
        self
    }

    pub fn before_send<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Client) + Send + Sync + 'static,
    {
        self.before_send = Some(Arc::new(hook));
        self
    }

    pub fn on_send<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Client, Option<&Error>) + Send + Sync + 'static,
    {
        self.on_send = Some(Arc::new(hook));
        self
    }

    /// Build the SSE endpoint
    pub fn build(self) -> Result<Sse> {
        let client_id_header = HeaderName::try_from(self.client_id_header.to_ascii_lowercase())
            .map_err(|e| {
                Error::Config(format!(
                    "invalid client id header '{}': {e}",
                    self.client_id_header
                ))
            })?;
        if self.capacity == 0 {
            return Err(Error::Config("SSE channel capacity must be at least 1".into()));
        }

        Ok(Sse {
            client_id_header,
            clients: ClientRegistry::new(self.capacity),
            policy: self.policy,
            unsupported: self
                .unsupported
                .unwrap_or_else(|| Arc::new(StreamingUnsupported)),
            on_create_client: self.on_create_client,
            on_remove_client: self.on_remove_client,
            before_send: self.before_send,
            on_send: self.on_send,
        })
    }
}
