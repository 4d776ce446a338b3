use async_trait::async_trait;
use futures::StreamExt;
use serde_json::json;
use std::collections::HashMap;
use tower_http::services::ServeDir;
use tracing::{debug, error, info};
use webmux::{
    http, responses, Body, HeaderName, HeaderValue, Handler, Middleware, Next, Request,
    ResponseWriter, Sse,
};

const HOME_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>webmux demo</title></head>
<body>
<h1>webmux demo</h1>
<pre id="clock"></pre>
<script>
const source = new EventSource("/sse/" + Math.random().toString(36).slice(2));
source.onmessage = (event) => { document.getElementById("clock").textContent = event.data; };
</script>
</body>
</html>
"#;

pub struct Home;

#[async_trait]
impl Handler for Home {
    async fn call(&self, w: &mut ResponseWriter<'_>, _req: &mut Request) {
        responses::send(w, responses::HTML_CONTENT_TYPE, HOME_PAGE, webmux::StatusCode::OK).await;
    }
}

/// Echoes the matched route and its parameters
pub struct Params;

#[async_trait]
impl Handler for Params {
    async fn call(&self, w: &mut ResponseWriter<'_>, req: &mut Request) {
        let body = {
            let route = req.route();
            let params: HashMap<String, String> = req.params().cloned().unwrap_or_default();
            json!({
                "route_name": route.map(|r| r.name()),
                "route_pattern": route.map(|r| r.pattern()),
                "params": params,
                "chained": req
                    .headers()
                    .get("chained")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default(),
            })
        };
        responses::r200(w, &body).await;
    }
}

/// Marks the request so later handlers in the chain can see it ran
pub struct Chain;

#[async_trait]
impl Handler for Chain {
    async fn call(&self, _w: &mut ResponseWriter<'_>, req: &mut Request) {
        req.headers_mut()
            .insert(HeaderName::from_static("chained"), HeaderValue::from_static("true"));
    }
}

pub struct ErrorSetter;

#[async_trait]
impl Handler for ErrorSetter {
    async fn call(&self, w: &mut ResponseWriter<'_>, req: &mut Request) {
        let err = anyhow::anyhow!("oh no, server error");
        let message = err.to_string();
        req.set_error(err);
        responses::r500(w, &message).await;
    }
}

/// Responds with a payload serde_json refuses to encode
pub struct InvalidJson;

#[async_trait]
impl Handler for InvalidJson {
    async fn call(&self, w: &mut ResponseWriter<'_>, _req: &mut Request) {
        let unencodable: HashMap<(u8, u8), u8> = HashMap::from([((0, 0), 0)]);
        responses::r200(w, &unencodable).await;
    }
}

pub struct OriginalWriter;

#[async_trait]
impl Handler for OriginalWriter {
    async fn call(&self, w: &mut ResponseWriter<'_>, _req: &mut Request) {
        let flushable = w.original().can_flush();
        let body = if flushable { "success" } else { "no flush support" };
        responses::send(w, responses::HTML_CONTENT_TYPE, body, webmux::StatusCode::OK).await;
    }
}

/// Serves files below a directory from the `w` wildcard parameter
pub struct StaticFiles {
    pub dir: ServeDir,
}

#[async_trait]
impl Handler for StaticFiles {
    async fn call(&self, w: &mut ResponseWriter<'_>, req: &mut Request) {
        // keep lookups inside the static directory
        let path = req
            .param("w")
            .unwrap_or_default()
            .replace("..", "-")
            .replace('~', "-");
        let lookup = match http::Request::get(format!("/{path}")).body(Body::empty()) {
            Ok(lookup) => lookup,
            Err(e) => {
                debug!(error = %e, path = %path, "Rejected static file path");
                responses::r400(w, "invalid path").await;
                return;
            }
        };

        let response = match self.dir.clone().try_call(lookup).await {
            Ok(response) => response,
            Err(e) => {
                error!(error = %e, path = %path, "Static file lookup failed");
                responses::r500(w, responses::ERR_INTERNAL_SERVER).await;
                return;
            }
        };

        let (parts, body) = response.into_parts();
        w.headers_mut().extend(parts.headers);
        w.write_header(parts.status);

        let mut chunks = Body::new(body).into_data_stream();
        while let Some(chunk) = chunks.next().await {
            let written = match chunk {
                Ok(bytes) => w.write(&bytes).await.map(|_| ()),
                Err(e) => Err(std::io::Error::other(e)),
            };
            if let Err(e) = written {
                debug!(error = %e, path = %path, "Static file transfer aborted");
                return;
            }
        }
    }
}

/// Streams events to the client named by the `clientID` path parameter
pub struct SseEndpoint {
    pub sse: Sse,
}

#[async_trait]
impl Handler for SseEndpoint {
    async fn call(&self, w: &mut ResponseWriter<'_>, req: &mut Request) {
        let client_id = req
            .param("clientID")
            .and_then(|id| HeaderValue::from_str(id).ok());
        if let Some(id) = client_id {
            req.headers_mut()
                .insert(self.sse.client_id_header().clone(), id);
        }

        if let Err(e) = self.sse.handle(w, req).await {
            if !e.is_cancelled() {
                info!(error = %e, "SSE stream ended");
            }
        }
    }
}

/// Logs the error a handler stored on the request once the response is a 5xx
pub struct ErrorLogger;

#[async_trait]
impl Middleware for ErrorLogger {
    async fn handle(&self, w: &mut ResponseWriter<'_>, req: &mut Request, next: Next<'_>) {
        next.run(w, req).await;
        if w.status().is_server_error() {
            if let Some(err) = req.error() {
                error!(error = %err, path = req.path(), "Request failed");
            }
        }
    }
}

/// Tags responses served through the versioned route group
pub struct GroupTag;

#[async_trait]
impl Middleware for GroupTag {
    async fn handle(&self, w: &mut ResponseWriter<'_>, req: &mut Request, next: Next<'_>) {
        w.headers_mut()
            .insert(HeaderName::from_static("routegroup"), HeaderValue::from_static("true"));
        next.run(w, req).await;
    }
}
