//! Response helpers
//!
//! JSON responses use a fixed envelope: `{"data": ..., "status": <code>}` for
//! payloads and `{"errors": ..., "status": <code>}` for failures. Encoding
//! failures degrade to a plain 500.

use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, StatusCode};
use serde::Serialize;
use std::fmt::Display;
use tracing::error;

use crate::writer::ResponseWriter;

pub const JSON_CONTENT_TYPE: &str = "application/json";
pub const HTML_CONTENT_TYPE: &str = "text/html; charset=UTF-8";
pub const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Body sent when a response cannot be produced
pub const ERR_INTERNAL_SERVER: &str = "Internal server error";

const INTERNAL_ERROR_BODY: &[u8] = b"{\"errors\":\"Internal server error\",\"status\":500}\n";

#[derive(Serialize)]
struct DataEnvelope<'a, T: ?Sized> {
    data: &'a T,
    status: u16,
}

#[derive(Serialize)]
struct ErrorEnvelope<'a, T: ?Sized> {
    errors: &'a T,
    status: u16,
}

/// Write `data` as-is with the given content type and status
pub async fn send(w: &mut ResponseWriter<'_>, content_type: &str, data: impl Display, status: StatusCode) {
    if let Ok(value) = HeaderValue::from_str(content_type) {
        w.headers_mut().insert(CONTENT_TYPE, value);
    }
    w.set_status(status);
    if let Err(e) = w.write(data.to_string().as_bytes()).await {
        error!(error = %e, "Failed to write response");
        w.write_header(StatusCode::INTERNAL_SERVER_ERROR);
    }
}

/// Send `{"data": data, "status": status}`
pub async fn send_response<T: Serialize + ?Sized>(w: &mut ResponseWriter<'_>, data: &T, status: StatusCode) {
    let body = serde_json::to_vec(&DataEnvelope {
        data,
        status: status.as_u16(),
    });
    write_json(w, body, status).await;
}

/// Send `{"errors": errors, "status": status}`
pub async fn send_error<T: Serialize + ?Sized>(w: &mut ResponseWriter<'_>, errors: &T, status: StatusCode) {
    let body = serde_json::to_vec(&ErrorEnvelope {
        errors,
        status: status.as_u16(),
    });
    write_json(w, body, status).await;
}

/// Commit the head with `status` and no body
pub fn send_header(w: &mut ResponseWriter<'_>, status: StatusCode) {
    w.write_header(status);
}

async fn write_json(w: &mut ResponseWriter<'_>, body: serde_json::Result<Vec<u8>>, status: StatusCode) {
    w.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));

    let (mut body, status) = match body {
        Ok(body) => (body, status),
        Err(e) => {
            error!(error = %e, "Failed to encode response");
            (INTERNAL_ERROR_BODY.to_vec(), StatusCode::INTERNAL_SERVER_ERROR)
        }
    };
    if body.last() != Some(&b'\n') {
        body.push(b'\n');
    }

    w.set_status(status);
    if let Err(e) = w.write(&body).await {
        error!(error = %e, "Failed to write response");
    }
}

pub async fn r200<T: Serialize + ?Sized>(w: &mut ResponseWriter<'_>, data: &T) {
    send_response(w, data, StatusCode::OK).await
}

pub async fn r201<T: Serialize + ?Sized>(w: &mut ResponseWriter<'_>, data: &T) {
    send_response(w, data, StatusCode::CREATED).await
}

pub fn r204(w: &mut ResponseWriter<'_>) {
    send_header(w, StatusCode::NO_CONTENT)
}

/// Redirect to `target` with 302
pub fn r302(w: &mut ResponseWriter<'_>, target: &str) {
    if let Ok(value) = HeaderValue::from_str(target) {
        w.headers_mut().insert(axum::http::header::LOCATION, value);
    }
    send_header(w, StatusCode::FOUND)
}

pub async fn r400<T: Serialize + ?Sized>(w: &mut ResponseWriter<'_>, errors: &T) {
    send_error(w, errors, StatusCode::BAD_REQUEST).await
}

pub async fn r403<T: Serialize + ?Sized>(w: &mut ResponseWriter<'_>, errors: &T) {
    send_error(w, errors, StatusCode::FORBIDDEN).await
}

pub async fn r404<T: Serialize + ?Sized>(w: &mut ResponseWriter<'_>, errors: &T) {
    send_error(w, errors, StatusCode::NOT_FOUND).await
}

pub async fn r406<T: Serialize + ?Sized>(w: &mut ResponseWriter<'_>, errors: &T) {
    send_error(w, errors, StatusCode::NOT_ACCEPTABLE).await
}

pub async fn r451<T: Serialize + ?Sized>(w: &mut ResponseWriter<'_>, errors: &T) {
    send_error(w, errors, StatusCode::UNAVAILABLE_FOR_LEGAL_REASONS).await
}

pub async fn r500<T: Serialize + ?Sized>(w: &mut ResponseWriter<'_>, errors: &T) {
    send_error(w, errors, StatusCode::INTERNAL_SERVER_ERROR).await
}
