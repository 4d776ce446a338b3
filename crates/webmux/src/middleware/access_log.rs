//! Access log middleware

use async_trait::async_trait;
use std::time::Instant;
use tracing::info;

use super::{Middleware, Next};
use crate::context::Request;
use crate::writer::ResponseWriter;

/// Logs method, URI, elapsed time and final status of every request
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessLog;

#[async_trait]
impl Middleware for AccessLog {
    async fn handle(&self, w: &mut ResponseWriter<'_>, req: &mut Request, next: Next<'_>) {
        let start = Instant::now();
        next.run(w, req).await;

        info!(
            method = %req.method(),
            uri = %req.uri(),
            elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
            status = w.status().as_u16(),
            "Request served"
        );
    }
}
