//! SSE registry and streaming tests for webmux

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{self, HeaderMap, StatusCode};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use webmux::sse::{ClientRegistry, Registration};
use webmux::{
    Error, Message, Recorder, Request, ResponseWriter, SendPolicy, Sse, Transport,
};

fn sse_request(client_id: Option<&str>, cancel: CancellationToken) -> Request {
    let mut builder = http::Request::builder().uri("/events");
    if let Some(id) = client_id {
        builder = builder.header("sse-clientid", id);
    }
    Request::with_cancellation(builder.body(Body::empty()).unwrap(), cancel)
}

/// Run a stream on a recorder in the background
fn spawn_stream(
    sse: &Sse,
    client_id: Option<&str>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<(webmux::Result<()>, Recorder)> {
    let sse = sse.clone();
    let mut req = sse_request(client_id, cancel);
    tokio::spawn(async move {
        let mut rec = Recorder::new();
        let result = {
            let mut w = ResponseWriter::new(&mut rec);
            sse.handle(&mut w, &mut req).await
        };
        (result, rec)
    })
}

// ============== Registry Tests ==============

#[tokio::test]
async fn test_concurrent_register_and_broadcast() {
    let registry = ClientRegistry::new(4);

    let tasks: Vec<_> = (0..100)
        .map(|i| {
            let registry = registry.clone();
            tokio::spawn(async move { registry.register(format!("client-{i}")) })
        })
        .collect();
    let mut registrations = Vec::new();
    for task in tasks {
        registrations.push(task.await.unwrap());
    }
    assert_eq!(registry.active_count(), 100);

    let delivered = registry
        .broadcast(Arc::new(Message::new("hello")), SendPolicy::Block)
        .await;
    assert_eq!(delivered, 100);

    for Registration { mut messages, .. } in registrations {
        let message = messages.try_recv().unwrap();
        assert_eq!(message.to_string(), "data:hello\n\n");
        assert!(messages.try_recv().is_err());
    }
}

#[tokio::test]
async fn test_remove_during_broadcast_does_not_deadlock() {
    let registry = ClientRegistry::new(1);
    let _slow = registry.register("slow");
    let Registration {
        messages: mut fast, ..
    } = registry.register("fast");

    let drain = tokio::spawn(async move {
        let mut received = 0;
        while fast.recv().await.is_some() {
            received += 1;
            if received == 1000 {
                break;
            }
        }
        received
    });

    let broadcaster = {
        let registry = registry.clone();
        tokio::spawn(async move {
            for i in 0..1000 {
                registry
                    .broadcast(Arc::new(Message::new(i.to_string())), SendPolicy::Block)
                    .await;
            }
        })
    };

    // the slow client never reads, so the broadcast is stuck on it
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(registry.remove("slow"), 1);

    tokio::time::timeout(Duration::from_secs(5), broadcaster)
        .await
        .expect("broadcast stalled after removal")
        .unwrap();
    assert_eq!(drain.await.unwrap(), 1000);
    assert_eq!(registry.active_count(), 1);
}

#[tokio::test]
async fn test_send_to_unknown_client() {
    let registry = ClientRegistry::default();
    let result = registry
        .send("ghost", Arc::new(Message::new("x")), SendPolicy::Block)
        .await;
    assert!(matches!(result, Err(Error::ClientNotFound(id)) if id == "ghost"));
}

#[tokio::test]
async fn test_drop_newest_policy() {
    let registry = ClientRegistry::new(1);
    let mut registration = registry.register("c");

    let first = registry
        .send("c", Arc::new(Message::new("1")), SendPolicy::DropNewest)
        .await;
    let second = registry
        .send("c", Arc::new(Message::new("2")), SendPolicy::DropNewest)
        .await;
    assert!(first.is_ok());
    assert!(matches!(second, Err(Error::ChannelFull(_))));

    let kept = registration.messages.try_recv().unwrap();
    assert_eq!(kept.data.as_deref(), Some("1"));
}

#[tokio::test(start_paused = true)]
async fn test_timeout_policy() {
    let registry = ClientRegistry::new(1);
    let _registration = registry.register("c");
    let policy = SendPolicy::Timeout(Duration::from_millis(100));

    registry.send("c", Arc::new(Message::new("1")), policy).await.unwrap();
    let result = registry.send("c", Arc::new(Message::new("2")), policy).await;
    assert!(matches!(result, Err(Error::SendTimeout(_))));
}

#[tokio::test]
async fn test_send_after_remove() {
    let registry = ClientRegistry::new(1);
    let registration = registry.register("c");
    assert_eq!(registry.remove("c"), 0);
    assert!(registration.client.is_closed());

    let result = registration
        .client
        .send(Arc::new(Message::new("late")), SendPolicy::Block)
        .await;
    assert!(matches!(result, Err(Error::ClientClosed(_))));
}

#[tokio::test]
async fn test_register_same_id_replaces() {
    let registry = ClientRegistry::default();
    let first = registry.register("dup");
    let second = registry.register("dup");
    assert_eq!(first.active, 1);
    assert_eq!(second.active, 1);

    let current = registry.get("dup").unwrap();
    assert!(Arc::ptr_eq(&current, &second.client));
}

// ============== Stream Tests ==============

#[tokio::test]
async fn test_stream_writes_frames_until_removed() {
    let joined = Arc::new(Notify::new());
    let removed: Arc<Mutex<Vec<(String, usize)>>> = Arc::default();
    let sse = {
        let joined = Arc::clone(&joined);
        let removed = Arc::clone(&removed);
        Sse::builder()
            .on_create_client(move |_client, _active| joined.notify_one())
            .on_remove_client(move |id, active| removed.lock().unwrap().push((id.to_string(), active)))
            .build()
            .unwrap()
    };

    let stream = spawn_stream(&sse, Some("c1"), CancellationToken::new());
    joined.notified().await;
    assert_eq!(sse.active_clients(), 1);

    sse.send("c1", "hello").await.unwrap();
    sse.send("c1", Message::new("bye").with_event("end")).await.unwrap();
    sse.remove_client("c1");

    let (result, rec) = stream.await.unwrap();
    assert!(result.is_ok());
    assert_eq!(rec.status(), StatusCode::OK);
    assert_eq!(rec.header("content-type"), Some("text/event-stream"));
    assert_eq!(rec.header("connection"), Some("keep-alive"));
    assert_eq!(rec.header("x-accel-buffering"), Some("no"));
    assert_eq!(rec.body_string(), "data:hello\n\nevent:end\ndata:bye\n\n");
    assert_eq!(rec.flushes(), 3);

    assert_eq!(sse.active_clients(), 0);
    assert_eq!(*removed.lock().unwrap(), [("c1".to_string(), 0)]);
}

#[tokio::test]
async fn test_stream_ends_on_cancellation() {
    let joined = Arc::new(Notify::new());
    let removals = Arc::new(AtomicUsize::new(0));
    let sse = {
        let joined = Arc::clone(&joined);
        let removals = Arc::clone(&removals);
        Sse::builder()
            .on_create_client(move |_client, _active| joined.notify_one())
            .on_remove_client(move |_id, _active| {
                removals.fetch_add(1, Ordering::SeqCst);
            })
            .build()
            .unwrap()
    };

    let cancel = CancellationToken::new();
    let stream = spawn_stream(&sse, Some("c1"), cancel.clone());
    joined.notified().await;

    cancel.cancel();
    let (result, _rec) = stream.await.unwrap();
    assert!(matches!(result, Err(Error::Cancelled)));
    assert_eq!(sse.active_clients(), 0);
    assert_eq!(removals.load(Ordering::SeqCst), 1);
    assert!(sse.send("c1", "x").await.is_err());
}

#[tokio::test]
async fn test_stream_generates_client_id() {
    let ids: Arc<Mutex<Vec<String>>> = Arc::default();
    let joined = Arc::new(Notify::new());
    let sse = {
        let ids = Arc::clone(&ids);
        let joined = Arc::clone(&joined);
        Sse::builder()
            .on_create_client(move |client, _active| {
                ids.lock().unwrap().push(client.id().to_string());
                joined.notify_one();
            })
            .build()
            .unwrap()
    };

    let cancel = CancellationToken::new();
    let stream = spawn_stream(&sse, None, cancel.clone());
    joined.notified().await;

    let id = ids.lock().unwrap()[0].clone();
    assert_eq!(id.len(), 36);
    assert!(sse.client(&id).is_some());

    cancel.cancel();
    let (result, _rec) = stream.await.unwrap();
    assert!(matches!(result, Err(Error::Cancelled)));
}

#[tokio::test]
async fn test_stream_hooks_around_send() {
    let before = Arc::new(AtomicUsize::new(0));
    let after = Arc::new(AtomicUsize::new(0));
    let joined = Arc::new(Notify::new());
    let sse = {
        let before = Arc::clone(&before);
        let after = Arc::clone(&after);
        let joined = Arc::clone(&joined);
        Sse::builder()
            .on_create_client(move |_client, _active| joined.notify_one())
            .before_send(move |_client| {
                before.fetch_add(1, Ordering::SeqCst);
            })
            .on_send(move |_client, err| {
                assert!(err.is_none());
                after.fetch_add(1, Ordering::SeqCst);
            })
            .build()
            .unwrap()
    };

    let stream = spawn_stream(&sse, Some("c1"), CancellationToken::new());
    joined.notified().await;
    assert_eq!(sse.broadcast("one").await, 1);
    assert_eq!(sse.broadcast("two").await, 1);
    sse.remove_client("c1");
    stream.await.unwrap();

    assert_eq!(before.load(Ordering::SeqCst), 2);
    assert_eq!(after.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_stream_unsupported_transport() {
    let sse = Sse::new();
    let mut rec = Recorder::unflushable();
    let mut req = sse_request(Some("c1"), CancellationToken::new());

    let result = {
        let mut w = ResponseWriter::new(&mut rec);
        sse.handle(&mut w, &mut req).await
    };
    assert!(matches!(result, Err(Error::StreamingUnsupported)));
    assert_eq!(rec.status(), StatusCode::NOT_IMPLEMENTED);
    assert_eq!(rec.body_string(), "Streaming not supported");
    assert_eq!(sse.active_clients(), 0);
}

/// Accepts the head, fails every body write
struct BrokenPipe {
    headers: HeaderMap,
}

#[async_trait]
impl Transport for BrokenPipe {
    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn write_head(&mut self, _status: StatusCode) {}

    async fn write_body(&mut self, _chunk: &[u8]) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))
    }

    fn can_flush(&self) -> bool {
        true
    }

    async fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_stream_write_failure_ends_stream() {
    let failures = Arc::new(AtomicUsize::new(0));
    let joined = Arc::new(Notify::new());
    let sse = {
        let failures = Arc::clone(&failures);
        let joined = Arc::clone(&joined);
        Sse::builder()
            .on_create_client(move |_client, _active| joined.notify_one())
            .on_send(move |_client, err| {
                if err.is_some() {
                    failures.fetch_add(1, Ordering::SeqCst);
                }
            })
            .build()
            .unwrap()
    };

    let stream = {
        let sse = sse.clone();
        let mut req = sse_request(Some("c1"), CancellationToken::new());
        tokio::spawn(async move {
            let mut transport = BrokenPipe {
                headers: HeaderMap::new(),
            };
            let mut w = ResponseWriter::new(&mut transport);
            sse.handle(&mut w, &mut req).await
        })
    };
    joined.notified().await;
    sse.send("c1", "doomed").await.unwrap();

    let result = stream.await.unwrap();
    assert!(matches!(result, Err(Error::Io(_))));
    assert_eq!(failures.load(Ordering::SeqCst), 1);
    assert_eq!(sse.active_clients(), 0);
}

#[test]
fn test_builder_rejects_bad_settings() {
    assert!(matches!(
        Sse::builder().client_id_header("bad header").build(),
        Err(Error::Config(_))
    ));
    assert!(matches!(
        Sse::builder().channel_capacity(0).build(),
        Err(Error::Config(_))
    ));

    let sse = Sse::builder().client_id_header("X-Client-Id").build().unwrap();
    assert_eq!(sse.client_id_header().as_str(), "x-client-id");
}
