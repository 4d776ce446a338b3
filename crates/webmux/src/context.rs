//! Per-request routing state

use axum::body::Body;
use axum::http::{self, HeaderMap, Method, Uri};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::pool::{Pooled, Reset};
use crate::route::Route;

/// State attached to a request once a route matched.
///
/// Contexts are pooled by the router and reset before reuse.
#[derive(Default)]
pub struct Context {
    route: Option<Arc<Route>>,
    params: HashMap<String, String>,
    error: Option<anyhow::Error>,
}

impl Context {
    /// The route that matched this request
    pub fn route(&self) -> Option<&Route> {
        self.route.as_deref()
    }

    /// Parameters captured from the request path
    pub fn params(&self) -> &HashMap<String, String> {
        &self.params
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Record an error for middleware further out in the chain
    pub fn set_error(&mut self, err: impl Into<anyhow::Error>) {
        self.error = Some(err.into());
    }

    pub fn error(&self) -> Option<&anyhow::Error> {
        self.error.as_ref()
    }

    pub fn take_error(&mut self) -> Option<anyhow::Error> {
        self.error.take()
    }

    pub(crate) fn params_mut(&mut self) -> &mut HashMap<String, String> {
        &mut self.params
    }

    pub(crate) fn bind(&mut self, route: Arc<Route>) {
        self.route = Some(route);
    }
}

impl Reset for Context {
    fn reset(&mut self) {
        self.route = None;
        self.params.clear();
        self.error = None;
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("route", &self.route.as_ref().map(|r| r.name()))
            .field("params", &self.params)
            .field("error", &self.error)
            .finish()
    }
}

/// An incoming request as seen by handlers and middleware
#[derive(Debug)]
pub struct Request {
    inner: http::Request<Body>,
    cancel: CancellationToken,
    context: Option<Pooled<Context>>,
}

impl Request {
    /// Wrap a request with its own cancellation signal
    pub fn new(inner: http::Request<Body>) -> Self {
        Self::with_cancellation(inner, CancellationToken::new())
    }

    /// Wrap a request whose cancellation is driven by `cancel`
    pub fn with_cancellation(inner: http::Request<Body>, cancel: CancellationToken) -> Self {
        Self {
            inner,
            cancel,
            context: None,
        }
    }

    pub fn method(&self) -> &Method {
        self.inner.method()
    }

    pub fn uri(&self) -> &Uri {
        self.inner.uri()
    }

    pub fn path(&self) -> &str {
        self.inner.uri().path()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        self.inner.headers_mut()
    }

    pub fn body_mut(&mut self) -> &mut Body {
        self.inner.body_mut()
    }

    /// Take the body, leaving an empty one behind
    pub fn take_body(&mut self) -> Body {
        std::mem::take(self.inner.body_mut())
    }

    pub fn inner(&self) -> &http::Request<Body> {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut http::Request<Body> {
        &mut self.inner
    }

    /// Fires when the client disconnects, the write deadline passes or the
    /// server shuts down
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Routing context, absent for requests served by a fallback handler
    pub fn context(&self) -> Option<&Context> {
        self.context.as_deref()
    }

    pub fn context_mut(&mut self) -> Option<&mut Context> {
        self.context.as_deref_mut()
    }

    /// The route serving this request
    pub fn route(&self) -> Option<&Route> {
        self.context().and_then(Context::route)
    }

    /// Captured path parameters, empty for fallback requests
    pub fn params(&self) -> Option<&HashMap<String, String>> {
        self.context().map(Context::params)
    }

    /// A captured path parameter
    pub fn param(&self, key: &str) -> Option<&str> {
        self.context().and_then(|ctx| ctx.param(key))
    }

    /// Attach an error to the routing context.
    ///
    /// Returns `false` when the request has no context.
    pub fn set_error(&mut self, err: impl Into<anyhow::Error>) -> bool {
        match self.context_mut() {
            Some(ctx) => {
                ctx.set_error(err);
                true
            }
            None => false,
        }
    }

    pub fn error(&self) -> Option<&anyhow::Error> {
        self.context().and_then(Context::error)
    }

    pub(crate) fn attach(&mut self, context: Pooled<Context>) {
        self.context = Some(context);
    }
}
