//! # webmux
//!
//! An embeddable HTTP request router with middleware chains, pooled request
//! context and Server-Sent Events.
//!
//! ## Features
//!
//! - **Pattern routing**: static paths, `:named` parameters and `:wildcard*` captures
//! - **Handler chains**: several handlers per route, with optional fall-through
//! - **Middleware**: router-wide, per-group and on the 404/501 fallbacks
//! - **Pooled contexts**: per-request routing state is reused across requests
//! - **SSE**: client registry, targeted sends and broadcasts over flushed streams
//! - **Built-in server**: axum/hyper serving over HTTP and rustls HTTPS with graceful
//!   shutdown (`server` feature, on by default)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use webmux::{handler_fn, responses, Config, Method, Route, Router};
//!
//! #[tokio::main]
//! async fn main() -> webmux::Result<()> {
//!     let hello = Route::new("hello", Method::GET, "/hello/:name").handler(handler_fn(|w, req| {
//!         Box::pin(async move {
//!             let name = req.param("name").unwrap_or("world").to_string();
//!             responses::r200(w, &name).await;
//!         })
//!     }));
//!
//!     Router::new(Config::default(), [hello])?.start().await
//! }
//! ```
//!
//! ## Middleware
//!
//! ```rust,ignore
//! use webmux::middleware::{AccessLog, Cors, CorsConfig};
//!
//! let mut router = Router::new(config, routes)?;
//! router.use_middleware(Cors::new(CorsConfig::default()));
//! router.use_middleware(AccessLog);
//! router.use_on_fallback(AccessLog);
//! ```

pub mod config;
pub mod context;
mod error;
pub mod handler;
pub mod middleware;
pub mod pattern;
pub mod pool;
pub mod recorder;
pub mod responses;
pub mod route;
pub mod router;
#[cfg(feature = "server")]
pub mod server;
pub mod sse;
pub mod writer;

// Re-exports
pub use config::Config;
pub use context::{Context, Request};
pub use error::{Error, Result};
pub use handler::{handler_fn, Handler, HandlerFn};
pub use middleware::{middleware_fn, Middleware, MiddlewareFn, Next};
pub use pattern::{Fragment, Pattern};
pub use pool::{Pool, Pooled, Reset};
pub use recorder::Recorder;
pub use route::{Route, RouteGroup};
pub use router::{Duplicate, DuplicateKind, Router, RouterService, SUPPORTED_METHODS};
#[cfg(feature = "server")]
pub use server::StreamingTransport;
pub use sse::{Client, ClientRegistry, Message, SendPolicy, Sse, SseBuilder};
pub use writer::{ResponseWriter, Transport};

// Re-export commonly used types from dependencies
pub use async_trait::async_trait;
pub use axum::body::Body;
pub use axum::http;
pub use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
pub use futures::future::BoxFuture;
pub use tokio_util::sync::CancellationToken;
