//! Middleware chain
//!
//! A middleware receives the writer, the request and a [`Next`] that runs the
//! rest of the chain. Skipping `next.run` short-circuits everything behind it,
//! including the route's handlers.

pub mod access_log;
pub mod cors;

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;

use crate::context::Request;
use crate::handler::Handler;
use crate::writer::ResponseWriter;

pub use access_log::AccessLog;
pub use cors::{Cors, CorsConfig};

/// A layer wrapped around route handlers
#[async_trait]
pub trait Middleware: Send + Sync + 'static {
    async fn handle(&self, w: &mut ResponseWriter<'_>, req: &mut Request, next: Next<'_>);
}

/// The remainder of a middleware chain
#[derive(Clone, Copy)]
pub struct Next<'a> {
    chain: &'a [Arc<dyn Middleware>],
    endpoint: &'a dyn Handler,
}

impl<'a> Next<'a> {
    /// Chain whose first element is the outermost layer
    pub fn new(chain: &'a [Arc<dyn Middleware>], endpoint: &'a dyn Handler) -> Self {
        Self { chain, endpoint }
    }

    /// Run the next layer, or the endpoint once the chain is exhausted
    pub async fn run(self, w: &mut ResponseWriter<'_>, req: &mut Request) {
        match self.chain.split_first() {
            Some((layer, rest)) => {
                layer
                    .handle(
                        w,
                        req,
                        Next {
                            chain: rest,
                            endpoint: self.endpoint,
                        },
                    )
                    .await
            }
            None => self.endpoint.call(w, req).await,
        }
    }

    /// Layers still ahead, the endpoint excluded
    pub fn remaining(&self) -> usize {
        self.chain.len()
    }
}

/// Middleware built from a closure, see [`middleware_fn`]
pub struct MiddlewareFn<F> {
    f: F,
}

/// Turn a closure into a [`Middleware`].
///
/// ```ignore
/// let mw = middleware_fn(|w, req, next| Box::pin(async move {
///     next.run(w, req).await;
/// }));
/// ```
pub fn middleware_fn<F>(f: F) -> MiddlewareFn<F>
where
    F: for<'a, 'b> Fn(&'a mut ResponseWriter<'b>, &'a mut Request, Next<'a>) -> BoxFuture<'a, ()>
        + Send
        + Sync
        + 'static,
{
    MiddlewareFn { f }
}

#[async_trait]
impl<F> Middleware for MiddlewareFn<F>
where
    F: for<'a, 'b> Fn(&'a mut ResponseWriter<'b>, &'a mut Request, Next<'a>) -> BoxFuture<'a, ()>
        + Send
        + Sync
        + 'static,
{
    async fn handle(&self, w: &mut ResponseWriter<'_>, req: &mut Request, next: Next<'_>) {
        (self.f)(w, req, next).await
    }
}
