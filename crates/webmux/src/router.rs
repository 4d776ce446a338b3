//! Method-indexed router and request dispatch

use async_trait::async_trait;
use axum::http::{Method, StatusCode};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::context::{Context, Request};
use crate::error::{Error, Result};
use crate::handler::Handler;
use crate::middleware::{Middleware, Next};
use crate::pool::Pool;
use crate::responses;
use crate::route::Route;
use crate::writer::{ResponseWriter, Transport};

const METHOD_COUNT: usize = 7;

/// Methods a route can be registered for, in table order
pub const SUPPORTED_METHODS: [Method; METHOD_COUNT] = [
    Method::OPTIONS,
    Method::HEAD,
    Method::GET,
    Method::POST,
    Method::PUT,
    Method::PATCH,
    Method::DELETE,
];

fn method_slot(method: &Method) -> Option<usize> {
    SUPPORTED_METHODS.iter().position(|m| m == method)
}

type RouteTable<R> = [Option<Vec<R>>; METHOD_COUNT];

/// Why a registration was flagged as a possible duplicate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateKind {
    /// An earlier route for the same method has the same name
    Name,
    /// An earlier route for the same method already matches the new pattern
    Pattern,
}

/// A registration that overlaps an earlier one. Registration still succeeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Duplicate {
    pub kind: DuplicateKind,
    pub method: Method,
    pub name: String,
    pub pattern: String,
    pub earlier_name: String,
    pub earlier_pattern: String,
}

/// Default 404 response
struct NotFound;

#[async_trait]
impl Handler for NotFound {
    async fn call(&self, w: &mut ResponseWriter<'_>, _req: &mut Request) {
        responses::send(
            w,
            responses::TEXT_CONTENT_TYPE,
            "404 page not found\n",
            StatusCode::NOT_FOUND,
        )
        .await;
    }
}

/// Default 501 response
struct NotImplemented;

#[async_trait]
impl Handler for NotImplemented {
    async fn call(&self, w: &mut ResponseWriter<'_>, _req: &mut Request) {
        responses::send(
            w,
            responses::TEXT_CONTENT_TYPE,
            "501 method not implemented\n",
            StatusCode::NOT_IMPLEMENTED,
        )
        .await;
    }
}

/// Collects routes and middleware before serving.
///
/// Registration happens here; [`Router::into_service`] freezes the tables and
/// middleware order into a [`RouterService`] that serves requests.
pub struct Router {
    config: Config,
    tables: RouteTable<Route>,
    not_found: Arc<dyn Handler>,
    not_implemented: Arc<dyn Handler>,
    fallback_middleware: Vec<Arc<dyn Middleware>>,
    duplicates: Vec<Duplicate>,
}

impl Router {
    /// Build a router and register `routes` in order
    pub fn new(config: Config, routes: impl IntoIterator<Item = Route>) -> Result<Self> {
        let mut tables: RouteTable<Route> = std::array::from_fn(|_| None);
        // HEAD and GET always answer 404 rather than 501
        for method in [Method::HEAD, Method::GET] {
            if let Some(slot) = method_slot(&method) {
                tables[slot] = Some(Vec::new());
            }
        }

        let mut router = Self {
            config,
            tables,
            not_found: Arc::new(NotFound),
            not_implemented: Arc::new(NotImplemented),
            fallback_middleware: Vec::new(),
            duplicates: Vec::new(),
        };
        for route in routes {
            router.add(route)?;
        }
        Ok(router)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Register a single route.
    ///
    /// Fails for unsupported methods, routes without handlers and patterns
    /// that do not compile.
    pub fn add(&mut self, mut route: Route) -> Result<()> {
        let Some(slot) = method_slot(route.method()) else {
            error!(method = %route.method(), pattern = route.pattern(), "Unsupported HTTP method provided");
            return Err(Error::UnsupportedMethod {
                method: route.method().to_string(),
            });
        };

        if route.handler_count() == 0 {
            error!(method = %route.method(), pattern = route.pattern(), "No handlers provided for the route");
            return Err(Error::NoHandlers {
                pattern: route.pattern().to_string(),
                method: route.method().to_string(),
            });
        }

        if let Err(e) = route.compile() {
            error!(name = route.name(), pattern = route.pattern(), error = %e, "Route pattern rejected");
            return Err(e);
        }

        let table = self.tables[slot].get_or_insert_with(Vec::new);
        for earlier in table.iter() {
            for duplicate in overlaps(earlier, &route) {
                match duplicate.kind {
                    DuplicateKind::Name => info!(
                        name = %duplicate.name,
                        method = %duplicate.method,
                        "Duplicate route name"
                    ),
                    DuplicateKind::Pattern => warn!(
                        name = %duplicate.name,
                        pattern = %duplicate.pattern,
                        earlier = %duplicate.earlier_name,
                        "Duplicate route pattern. Only the first route to match the URI pattern would handle the request"
                    ),
                }
                self.duplicates.push(duplicate);
            }
        }

        debug!(name = route.name(), method = %route.method(), pattern = route.pattern(), "Route registered");
        table.push(route);
        Ok(())
    }

    /// Register every route of an iterator, typically a [`crate::RouteGroup`]
    pub fn add_all(&mut self, routes: impl IntoIterator<Item = Route>) -> Result<()> {
        routes.into_iter().try_for_each(|route| self.add(route))
    }

    /// Overlapping registrations seen so far
    pub fn duplicates(&self) -> &[Duplicate] {
        &self.duplicates
    }

    /// Registered routes for `method`
    pub fn routes(&self, method: &Method) -> &[Route] {
        method_slot(method)
            .and_then(|slot| self.tables[slot].as_deref())
            .unwrap_or(&[])
    }

    /// Apply middleware to every registered route that does not skip
    /// router-wide middleware. Routes added later are not affected.
    pub fn use_middleware(&mut self, middleware: impl Middleware) -> &mut Self {
        let middleware: Arc<dyn Middleware> = Arc::new(middleware);
        for route in self.tables.iter_mut().flatten().flatten() {
            if !route.skips_global_middleware() {
                route.push_middleware(Arc::clone(&middleware));
            }
        }
        self
    }

    /// Wrap the 404 and 501 handlers with middleware
    pub fn use_on_fallback(&mut self, middleware: impl Middleware) -> &mut Self {
        self.fallback_middleware.push(Arc::new(middleware));
        self
    }

    pub fn set_not_found(&mut self, handler: impl Handler) -> &mut Self {
        self.not_found = Arc::new(handler);
        self
    }

    pub fn set_not_implemented(&mut self, handler: impl Handler) -> &mut Self {
        self.not_implemented = Arc::new(handler);
        self
    }

    /// Freeze routes and middleware order
    pub fn into_service(self) -> RouterService {
        let reverse = self.config.reverse_middleware;
        let tables = self.tables.map(|table| {
            table.map(|routes| {
                routes
                    .into_iter()
                    .map(|mut route| {
                        route.materialize(reverse);
                        Arc::new(route)
                    })
                    .collect::<Vec<_>>()
            })
        });

        let mut fallback_layers = self.fallback_middleware;
        if reverse {
            fallback_layers.reverse();
        }

        let route_count: usize = tables.iter().flatten().map(Vec::len).sum();
        info!(routes = route_count, reverse_middleware = reverse, "Router ready");

        RouterService {
            inner: Arc::new(ServiceInner {
                contexts: Pool::new(self.config.context_pool_size),
                tables,
                not_found: Fallback {
                    handler: self.not_found,
                    layers: fallback_layers.clone(),
                },
                not_implemented: Fallback {
                    handler: self.not_implemented,
                    layers: fallback_layers,
                },
                shutdown: CancellationToken::new(),
                config: self.config,
            }),
        }
    }
}

/// Name and pattern collisions are reported independently
fn overlaps(earlier: &Route, route: &Route) -> Vec<Duplicate> {
    let mut kinds = Vec::new();
    if earlier.name() == route.name() {
        kinds.push(DuplicateKind::Name);
    }
    if earlier.match_path(route.pattern()).is_some() {
        kinds.push(DuplicateKind::Pattern);
    }
    kinds
        .into_iter()
        .map(|kind| Duplicate {
            kind,
            method: route.method().clone(),
            name: route.name().to_string(),
            pattern: route.pattern().to_string(),
            earlier_name: earlier.name().to_string(),
            earlier_pattern: earlier.pattern().to_string(),
        })
        .collect()
}

struct Fallback {
    handler: Arc<dyn Handler>,
    layers: Vec<Arc<dyn Middleware>>,
}

impl Fallback {
    async fn serve(&self, w: &mut ResponseWriter<'_>, req: &mut Request) {
        Next::new(&self.layers, &*self.handler).run(w, req).await
    }
}

pub(crate) struct ServiceInner {
    pub(crate) config: Config,
    tables: RouteTable<Arc<Route>>,
    contexts: Pool<Context>,
    not_found: Fallback,
    not_implemented: Fallback,
    pub(crate) shutdown: CancellationToken,
}

/// A frozen router, cheap to clone and share between connections
#[derive(Clone)]
pub struct RouterService {
    pub(crate) inner: Arc<ServiceInner>,
}

impl RouterService {
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Cancelled when the server shuts down
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    /// Begin graceful shutdown
    pub fn shutdown(&self) {
        info!("Shutdown requested");
        self.inner.shutdown.cancel();
    }

    /// Idle routing contexts available for reuse
    pub fn idle_contexts(&self) -> usize {
        self.inner.contexts.idle()
    }

    /// Route `req` and write the response to `transport`.
    ///
    /// Unknown methods are answered by the not-implemented handler, unmatched
    /// paths by the not-found handler. The first matching route wins.
    pub async fn dispatch(&self, transport: &mut dyn Transport, mut req: Request) {
        let inner = &*self.inner;
        let mut w = ResponseWriter::new(transport);

        let Some(routes) = method_slot(req.method()).and_then(|slot| inner.tables[slot].as_deref())
        else {
            debug!(method = %req.method(), path = req.path(), "Method not implemented");
            w.set_status(StatusCode::NOT_IMPLEMENTED);
            inner.not_implemented.serve(&mut w, &mut req).await;
            return;
        };

        let mut ctx = inner.contexts.acquire();
        let matched = routes
            .iter()
            .find(|route| route.match_into(req.path(), ctx.params_mut()));

        let Some(route) = matched else {
            debug!(method = %req.method(), path = req.path(), "No route matched");
            drop(ctx);
            w.set_status(StatusCode::NOT_FOUND);
            inner.not_found.serve(&mut w, &mut req).await;
            return;
        };

        debug!(route = route.name(), method = %req.method(), path = req.path(), "Route matched");
        ctx.bind(Arc::clone(route));
        req.attach(ctx);
        route.serve(&mut w, &mut req).await;
    }
}
