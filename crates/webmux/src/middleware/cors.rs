//! CORS middleware and preflight routes

use async_trait::async_trait;
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_MAX_AGE, ACCESS_CONTROL_REQUEST_HEADERS, ORIGIN,
};
use axum::http::{HeaderValue, Method, StatusCode};
use regex::Regex;
use tracing::warn;

use super::{Middleware, Next};
use crate::context::Request;
use crate::handler::Handler;
use crate::route::Route;
use crate::writer::ResponseWriter;

/// Preflight cache duration in seconds
pub const DEFAULT_MAX_AGE: u64 = 30 * 60;

pub const DEFAULT_ALLOW_METHODS: &str = "HEAD,GET,POST,PUT,PATCH,DELETE,OPTIONS";

pub const DEFAULT_ALLOW_HEADERS: &str =
    "Accept,Content-Type,Content-Length,Accept-Encoding,Access-Control-Request-Headers,";

/// CORS settings
#[derive(Debug, Clone)]
pub struct CorsConfig {
    /// Preflight cache duration in seconds
    pub max_age: u64,
    /// Allowed domains, optionally with a port; `*` allows any origin
    pub allowed_origins: Vec<String>,
    /// Extra headers allowed on top of [`DEFAULT_ALLOW_HEADERS`]
    pub allowed_headers: Vec<String>,
    /// Allowed methods, [`DEFAULT_ALLOW_METHODS`] when empty
    pub allowed_methods: Vec<Method>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            max_age: DEFAULT_MAX_AGE,
            allowed_origins: vec!["*".to_string()],
            allowed_headers: Vec::new(),
            allowed_methods: Vec::new(),
        }
    }
}

impl CorsConfig {
    /// Allow exactly the methods used by `routes`
    pub fn with_routes(mut self, routes: &[Route]) -> Self {
        self.allowed_methods = routes.iter().map(|r| r.method().clone()).collect();
        self
    }
}

/// Adds CORS headers for allowed origins and answers preflight requests
#[derive(Debug, Clone)]
pub struct Cors {
    origins: Vec<Regex>,
    max_age: HeaderValue,
    methods: HeaderValue,
    headers: String,
}

impl Default for Cors {
    fn default() -> Self {
        Self::new(CorsConfig::default())
    }
}

impl Cors {
    pub fn new(config: CorsConfig) -> Self {
        let mut headers = DEFAULT_ALLOW_HEADERS.to_string();
        for header in &config.allowed_headers {
            headers.push_str(header.trim());
            headers.push(',');
        }

        Self {
            origins: origin_patterns(&config.allowed_origins),
            max_age: HeaderValue::from(config.max_age),
            methods: allow_methods(&config.allowed_methods),
            headers,
        }
    }

    /// Whether requests from `origin` receive CORS headers.
    ///
    /// Same-origin requests carry no `Origin` header and are always allowed.
    pub fn is_allowed(&self, origin: &str) -> bool {
        origin.is_empty() || self.origins.iter().any(|re| re.is_match(origin))
    }
}

#[async_trait]
impl Middleware for Cors {
    async fn handle(&self, w: &mut ResponseWriter<'_>, req: &mut Request, next: Next<'_>) {
        let origin = req
            .headers()
            .get(ORIGIN)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        if !self.is_allowed(&origin) {
            return next.run(w, req).await;
        }

        let requested = req
            .headers()
            .get(ACCESS_CONTROL_REQUEST_HEADERS)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        let allow_headers = format!("{}{}", self.headers, requested);

        let headers = w.headers_mut();
        if let Ok(value) = HeaderValue::from_str(&origin) {
            headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, value);
        }
        headers.insert(ACCESS_CONTROL_MAX_AGE, self.max_age.clone());
        headers.insert(ACCESS_CONTROL_ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
        headers.insert(ACCESS_CONTROL_ALLOW_METHODS, self.methods.clone());
        if let Ok(value) = HeaderValue::from_str(&allow_headers) {
            headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, value);
        }

        if req.method() == Method::OPTIONS {
            w.write_header(StatusCode::OK);
            return;
        }

        next.run(w, req).await
    }
}

/// Does nothing; the CORS middleware answers preflight requests
struct Preflight;

#[async_trait]
impl Handler for Preflight {
    async fn call(&self, _w: &mut ResponseWriter<'_>, _req: &mut Request) {}
}

/// Append an OPTIONS route for every route so preflight requests are routed.
///
/// Without routes a single catch-all OPTIONS route is returned.
pub fn add_options_handlers(mut routes: Vec<Route>) -> Vec<Route> {
    if routes.is_empty() {
        routes.push(
            Route::new("cors", Method::OPTIONS, "/:w*")
                .trailing_slash(true)
                .handler(Preflight),
        );
        return routes;
    }

    let preflight: Vec<Route> = routes
        .iter()
        .map(|route| {
            Route::new(format!("{}-CORS", route.name()), Method::OPTIONS, route.pattern())
                .trailing_slash(true)
                .handler(Preflight)
        })
        .collect();
    routes.extend(preflight);
    routes
}

fn origin_patterns(origins: &[String]) -> Vec<Regex> {
    origins
        .iter()
        .map(|origin| origin.trim())
        .filter(|origin| !origin.is_empty())
        .filter_map(|origin| {
            let source = if origin == "*" {
                ".+".to_string()
            } else {
                let host = origin.split_once("://").map_or(origin, |(_, rest)| rest);
                let domain = host.split(':').next().unwrap_or(host);
                format!(
                    r"^(http)?(https)?(://)?(.+\.)?{}(:[0-9]+)?$",
                    regex::escape(domain)
                )
            };
            match Regex::new(&source) {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!(origin, error = %e, "Ignoring unusable CORS origin");
                    None
                }
            }
        })
        .collect()
}

fn allow_methods(methods: &[Method]) -> HeaderValue {
    if methods.is_empty() {
        return HeaderValue::from_static(DEFAULT_ALLOW_METHODS);
    }
    let mut names: Vec<&str> = methods.iter().map(Method::as_str).collect();
    names.sort_unstable();
    names.dedup();
    HeaderValue::from_str(&names.join(","))
        .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_ALLOW_METHODS))
}
