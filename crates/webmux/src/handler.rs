//! Request handlers

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;

use crate::context::Request;
use crate::writer::ResponseWriter;

/// Something that produces (part of) a response
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn call(&self, w: &mut ResponseWriter<'_>, req: &mut Request);
}

#[async_trait]
impl<H: Handler + ?Sized> Handler for Arc<H> {
    async fn call(&self, w: &mut ResponseWriter<'_>, req: &mut Request) {
        (**self).call(w, req).await
    }
}

/// Handler built from a closure, see [`handler_fn`]
pub struct HandlerFn<F> {
    f: F,
}

/// Turn a closure into a [`Handler`].
///
/// ```ignore
/// let hello = handler_fn(|w, _req| Box::pin(async move {
///     let _ = w.write(b"hello").await;
/// }));
/// ```
pub fn handler_fn<F>(f: F) -> HandlerFn<F>
where
    F: for<'a, 'b> Fn(&'a mut ResponseWriter<'b>, &'a mut Request) -> BoxFuture<'a, ()>
        + Send
        + Sync
        + 'static,
{
    HandlerFn { f }
}

#[async_trait]
impl<F> Handler for HandlerFn<F>
where
    F: for<'a, 'b> Fn(&'a mut ResponseWriter<'b>, &'a mut Request) -> BoxFuture<'a, ()>
        + Send
        + Sync
        + 'static,
{
    async fn call(&self, w: &mut ResponseWriter<'_>, req: &mut Request) {
        (self.f)(w, req).await
    }
}
