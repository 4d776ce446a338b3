//! SSE clients and the registry tracking them

use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::message::Message;
use crate::error::{Error, Result};

/// What a send does when the client's buffer is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SendPolicy {
    /// Wait for room, or until the client is removed
    #[default]
    Block,
    /// Wait at most this long, then fail with [`Error::SendTimeout`]
    Timeout(Duration),
    /// Discard the message and fail with [`Error::ChannelFull`]
    DropNewest,
}

pub type MessageReceiver = mpsc::Receiver<Arc<Message>>;

/// A connected SSE client
#[derive(Debug)]
pub struct Client {
    id: String,
    sender: Mutex<Option<mpsc::Sender<Arc<Message>>>>,
    closed: CancellationToken,
    cancel: CancellationToken,
    connected_at: DateTime<Utc>,
}

impl Client {
    fn new(id: String, capacity: usize, cancel: CancellationToken) -> (Self, MessageReceiver) {
        let (sender, receiver) = mpsc::channel(capacity);
        let client = Self {
            id,
            sender: Mutex::new(Some(sender)),
            closed: CancellationToken::new(),
            cancel,
            connected_at: Utc::now(),
        };
        (client, receiver)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Cancellation signal of the request serving this client.
    ///
    /// Cancelling it ends the client's stream.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether the client was removed from its registry
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Queue a message for this client
    pub async fn send(&self, message: Arc<Message>, policy: SendPolicy) -> Result<()> {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(sender) = sender else {
            return Err(Error::ClientClosed(self.id.clone()));
        };

        match policy {
            SendPolicy::Block => tokio::select! {
                biased;
                _ = self.closed.cancelled() => Err(Error::ClientClosed(self.id.clone())),
                sent = sender.send(message) => sent.map_err(|_| Error::ClientClosed(self.id.clone())),
            },
            SendPolicy::Timeout(limit) => tokio::select! {
                biased;
                _ = self.closed.cancelled() => Err(Error::ClientClosed(self.id.clone())),
                sent = tokio::time::timeout(limit, sender.send(message)) => match sent {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(_)) => Err(Error::ClientClosed(self.id.clone())),
                    Err(_) => Err(Error::SendTimeout(self.id.clone())),
                },
            },
            SendPolicy::DropNewest => sender.try_send(message).map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => Error::ChannelFull(self.id.clone()),
                mpsc::error::TrySendError::Closed(_) => Error::ClientClosed(self.id.clone()),
            }),
        }
    }

    /// Stop accepting messages and wake any blocked sender
    pub(crate) fn close(&self) {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.closed.cancel();
    }
}

/// A fresh registration
#[derive(Debug)]
pub struct Registration {
    pub client: Arc<Client>,
    /// Messages queued for the client, in send order
    pub messages: MessageReceiver,
    /// Registered clients, this one included
    pub active: usize,
}

/// Registered SSE clients keyed by id, behind a single lock
#[derive(Debug, Clone)]
pub struct ClientRegistry {
    clients: Arc<Mutex<HashMap<String, Arc<Client>>>>,
    capacity: usize,
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new(super::DEFAULT_CHANNEL_CAPACITY)
    }
}

impl ClientRegistry {
    /// `capacity` bounds every client's message buffer
    pub fn new(capacity: usize) -> Self {
        Self {
            clients: Arc::new(Mutex::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Register a client with its own cancellation signal
    pub fn register(&self, id: impl Into<String>) -> Registration {
        self.register_with(id, CancellationToken::new())
    }

    /// Register a client whose stream ends when `cancel` fires.
    ///
    /// An existing client with the same id is replaced in the registry but
    /// keeps its channel.
    pub fn register_with(&self, id: impl Into<String>, cancel: CancellationToken) -> Registration {
        let id = id.into();
        let (client, messages) = Client::new(id.clone(), self.capacity, cancel);
        let client = Arc::new(client);

        let mut clients = self.lock();
        if clients.insert(id, Arc::clone(&client)).is_some() {
            debug!(client_id = %client.id(), "Replaced SSE client with the same id");
        }
        let active = clients.len();
        drop(clients);

        Registration {
            client,
            messages,
            active,
        }
    }

    /// Remove the client registered under `id` and close it.
    ///
    /// Returns the number of clients left.
    pub fn remove(&self, id: &str) -> usize {
        let mut clients = self.lock();
        let removed = clients.remove(id);
        let active = clients.len();
        drop(clients);

        if let Some(client) = removed {
            client.close();
        }
        active
    }

    /// Close `client`, removing it only if the id still maps to it
    pub(crate) fn remove_client(&self, client: &Arc<Client>) -> usize {
        let mut clients = self.lock();
        if clients
            .get(client.id())
            .is_some_and(|current| Arc::ptr_eq(current, client))
        {
            clients.remove(client.id());
        }
        let active = clients.len();
        drop(clients);

        client.close();
        active
    }

    pub fn get(&self, id: &str) -> Option<Arc<Client>> {
        self.lock().get(id).cloned()
    }

    pub fn active_count(&self) -> usize {
        self.lock().len()
    }

    /// Clients registered right now
    pub fn snapshot(&self) -> Vec<Arc<Client>> {
        self.lock().values().cloned().collect()
    }

    /// Visit every client while holding the registry lock
    pub fn for_each(&self, mut f: impl FnMut(&Arc<Client>)) {
        for client in self.lock().values() {
            f(client);
        }
    }

    /// Send to the client registered under `id`
    pub async fn send(&self, id: &str, message: Arc<Message>, policy: SendPolicy) -> Result<()> {
        let client = self
            .get(id)
            .ok_or_else(|| Error::ClientNotFound(id.to_string()))?;
        client.send(message, policy).await
    }

    /// Send to every registered client.
    ///
    /// Works on a snapshot so the registry lock is never held while waiting on
    /// a client. Returns the number of clients the message was queued for.
    pub async fn broadcast(&self, message: Arc<Message>, policy: SendPolicy) -> usize {
        let clients = self.snapshot();
        let sends = clients
            .iter()
            .map(|client| client.send(Arc::clone(&message), policy));
        let results = join_all(sends).await;

        let mut delivered = 0;
        for (client, result) in clients.iter().zip(results) {
            match result {
                Ok(()) => delivered += 1,
                Err(e) => debug!(client_id = %client.id(), error = %e, "Broadcast skipped client"),
            }
        }
        delivered
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<Client>>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
