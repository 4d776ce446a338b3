//! Routes and route groups

use async_trait::async_trait;
use axum::http::Method;
use std::collections::HashMap;
use std::sync::Arc;

use crate::context::Request;
use crate::error::Result;
use crate::handler::Handler;
use crate::middleware::{Middleware, Next};
use crate::pattern::{Fragment, Pattern};
use crate::writer::ResponseWriter;

/// The handlers of a route, run in order.
///
/// Once a handler writes body bytes the rest are skipped, unless the route
/// falls through.
#[derive(Clone, Default)]
struct HandlerChain {
    handlers: Vec<Arc<dyn Handler>>,
    fall_through: bool,
}

#[async_trait]
impl Handler for HandlerChain {
    async fn call(&self, w: &mut ResponseWriter<'_>, req: &mut Request) {
        if let [only] = self.handlers.as_slice() {
            return only.call(w, req).await;
        }

        for handler in &self.handlers {
            if w.body_written() && !self.fall_through {
                break;
            }
            handler.call(w, req).await;
        }
    }
}

/// A method, a URI pattern and the handlers serving it
#[derive(Clone)]
pub struct Route {
    name: String,
    method: Method,
    pattern: Pattern,
    chain: HandlerChain,
    skip_global_middleware: bool,
    // registered middleware, first element registered first
    middleware: Vec<Arc<dyn Middleware>>,
    // materialized order, first element outermost
    layers: Vec<Arc<dyn Middleware>>,
    materialized: bool,
}

impl Route {
    pub fn new(name: impl Into<String>, method: Method, pattern: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            method,
            pattern: Pattern::new(pattern, false),
            chain: HandlerChain::default(),
            skip_global_middleware: false,
            middleware: Vec::new(),
            layers: Vec::new(),
            materialized: false,
        }
    }

    /// Append a handler to the chain
    pub fn handler(mut self, handler: impl Handler) -> Self {
        self.chain.handlers.push(Arc::new(handler));
        self
    }

    /// Append an already shared handler to the chain
    pub fn shared_handler(mut self, handler: Arc<dyn Handler>) -> Self {
        self.chain.handlers.push(handler);
        self
    }

    /// Whether `/path/` should match `/path`
    pub fn trailing_slash(mut self, allowed: bool) -> Self {
        self.pattern.set_trailing_slash(allowed);
        self
    }

    /// Keep running later handlers after one has written a body
    pub fn fall_through(mut self, enabled: bool) -> Self {
        self.chain.fall_through = enabled;
        self
    }

    /// Leave this route out when middleware is applied router-wide
    pub fn skip_global_middleware(mut self, skip: bool) -> Self {
        self.skip_global_middleware = skip;
        self
    }

    /// Attach middleware to this route only
    pub fn with_middleware(mut self, middleware: impl Middleware) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn pattern(&self) -> &str {
        self.pattern.template()
    }

    pub fn fragments(&self) -> &[Fragment] {
        self.pattern.fragments()
    }

    pub fn param_count(&self) -> usize {
        self.pattern.param_count()
    }

    pub fn has_wildcard(&self) -> bool {
        self.pattern.has_wildcard()
    }

    pub fn allows_trailing_slash(&self) -> bool {
        self.pattern.trailing_slash()
    }

    pub fn falls_through(&self) -> bool {
        self.chain.fall_through
    }

    pub fn skips_global_middleware(&self) -> bool {
        self.skip_global_middleware
    }

    pub fn handler_count(&self) -> usize {
        self.chain.handlers.len()
    }

    /// Compile the pattern; idempotent
    pub fn compile(&mut self) -> Result<()> {
        self.pattern.compile()
    }

    /// Match `path` against the compiled pattern
    pub fn match_path(&self, path: &str) -> Option<HashMap<String, String>> {
        self.pattern.match_path(path)
    }

    pub(crate) fn match_into(&self, path: &str, params: &mut HashMap<String, String>) -> bool {
        self.pattern.match_into(path, params)
    }

    pub(crate) fn prefix_pattern(&mut self, prefix: &str) {
        self.pattern.prefix(prefix);
    }

    pub(crate) fn push_middleware(&mut self, middleware: Arc<dyn Middleware>) {
        self.middleware.push(middleware);
    }

    /// Fix the middleware order. Only the first call has an effect.
    pub(crate) fn materialize(&mut self, reverse: bool) {
        if self.materialized {
            return;
        }
        let mut layers = std::mem::take(&mut self.middleware);
        if reverse {
            layers.reverse();
        }
        self.layers = layers;
        self.materialized = true;
    }

    /// Run the middleware chain and then the handlers
    pub(crate) async fn serve(&self, w: &mut ResponseWriter<'_>, req: &mut Request) {
        Next::new(&self.layers, &self.chain).run(w, req).await
    }
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("name", &self.name)
            .field("method", &self.method)
            .field("pattern", &self.pattern)
            .field("handlers", &self.chain.handlers.len())
            .field("fall_through", &self.chain.fall_through)
            .field("skip_global_middleware", &self.skip_global_middleware)
            .finish()
    }
}

/// Routes sharing a path prefix and their own middleware
#[derive(Debug, Default)]
pub struct RouteGroup {
    prefix: String,
    skip_router_middleware: bool,
    routes: Vec<Route>,
}

impl RouteGroup {
    /// `skip_router_middleware` exempts the group's routes from router-wide middleware
    pub fn new(prefix: impl Into<String>, skip_router_middleware: bool) -> Self {
        Self {
            prefix: prefix.into(),
            skip_router_middleware,
            routes: Vec::new(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Add a route, prefixing its pattern
    pub fn add(&mut self, mut route: Route) -> &mut Self {
        route.prefix_pattern(&self.prefix);
        route.skip_global_middleware = self.skip_router_middleware;
        self.routes.push(route);
        self
    }

    /// Apply middleware to every route added so far
    pub fn use_middleware(&mut self, middleware: impl Middleware) -> &mut Self {
        let middleware: Arc<dyn Middleware> = Arc::new(middleware);
        for route in &mut self.routes {
            route.push_middleware(Arc::clone(&middleware));
        }
        self
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn into_routes(self) -> Vec<Route> {
        self.routes
    }
}
