//! Unit tests for webmux

use axum::http::StatusCode;
use serde::ser::{Error as _, Serializer};
use serde::Serialize;
use std::time::Duration;
use webmux::{
    responses, Config, Error, Message, Pattern, Pool, Recorder, Reset, ResponseWriter,
};

// ============== Pattern Tests ==============

fn compiled(template: &str, trailing_slash: bool) -> Pattern {
    let mut pattern = Pattern::new(template, trailing_slash);
    pattern.compile().unwrap();
    pattern
}

#[test]
fn test_static_pattern_exact_match() {
    let pattern = compiled("/health", false);
    assert!(pattern.fragments().is_empty());
    assert_eq!(pattern.match_path("/health"), Some(Default::default()));
    assert_eq!(pattern.match_path("/healthz"), None);
    assert_eq!(pattern.match_path("/health/"), None);
}

#[test]
fn test_static_pattern_trailing_slash() {
    let pattern = compiled("/health", true);
    assert!(pattern.match_path("/health").is_some());
    assert!(pattern.match_path("/health/").is_some());
    assert!(pattern.match_path("/health//").is_none());
}

#[test]
fn test_root_pattern() {
    let pattern = compiled("/", false);
    assert!(pattern.match_path("/").is_some());
    assert!(pattern.match_path("/a").is_none());
}

#[test]
fn test_param_pattern_captures() {
    let pattern = compiled("/users/:id/posts/:post", false);
    assert_eq!(pattern.param_count(), 2);
    assert!(!pattern.has_wildcard());

    let params = pattern.match_path("/users/42/posts/7").unwrap();
    assert_eq!(params.len(), 2);
    assert_eq!(params["id"], "42");
    assert_eq!(params["post"], "7");
}

#[test]
fn test_param_pattern_rejects_mismatch() {
    let pattern = compiled("/users/:id", false);
    assert!(pattern.match_path("/posts/42").is_none());
    assert!(pattern.match_path("/users/42/extra").is_none());
    assert!(pattern.match_path("/users").is_none());
}

#[test]
fn test_param_pattern_trailing_slash() {
    let strict = compiled("/users/:id", false);
    assert!(strict.match_path("/users/42/").is_none());

    let relaxed = compiled("/users/:id", true);
    let params = relaxed.match_path("/users/42/").unwrap();
    assert_eq!(params["id"], "42");
}

#[test]
fn test_wildcard_captures_remaining_segments() {
    let pattern = compiled("/static/:w*", false);
    assert!(pattern.has_wildcard());

    let params = pattern.match_path("/static/a/b/c").unwrap();
    assert_eq!(params["w"], "a/b/c");

    let params = pattern.match_path("/static/file.css").unwrap();
    assert_eq!(params["w"], "file.css");
}

#[test]
fn test_wildcard_stops_at_following_literal() {
    let pattern = compiled("/files/:rest*/meta", false);
    let params = pattern.match_path("/files/a/b/meta").unwrap();
    assert_eq!(params["rest"], "a/b");
}

#[test]
fn test_wildcard_captures_at_least_one_segment() {
    let pattern = compiled("/files/:rest*/meta", false);
    assert_eq!(pattern.match_path("/files/meta").unwrap()["rest"], "meta");
    assert_eq!(pattern.match_path("/files/meta/meta").unwrap()["rest"], "meta");
}

#[test]
fn test_wildcard_then_param() {
    let pattern = compiled("/w/:path*/end/:id", false);
    let params = pattern.match_path("/w/x/y/end/9").unwrap();
    assert_eq!(params["path"], "x/y");
    assert_eq!(params["id"], "9");
}

#[test]
fn test_wildcard_directly_before_param_is_greedy() {
    let pattern = compiled("/w/:path*/:id", false);
    assert!(pattern.match_path("/w/x/y").is_none());
}

#[test]
fn test_compile_is_idempotent() {
    let mut pattern = Pattern::new("/a/:b/:c*", false);
    pattern.compile().unwrap();
    let fragments = pattern.fragments().to_vec();
    let count = pattern.param_count();

    pattern.compile().unwrap();
    assert!(pattern.is_compiled());
    assert_eq!(pattern.fragments(), fragments.as_slice());
    assert_eq!(pattern.param_count(), count);
}

#[test]
fn test_invalid_patterns() {
    for template in ["users/:id", "/a/:", "/a/:x/*", "/a/:x/:x"] {
        let mut pattern = Pattern::new(template, false);
        assert!(
            matches!(pattern.compile(), Err(Error::InvalidPattern { .. })),
            "{template} should be rejected"
        );
    }
}

#[test]
fn test_failed_match_leaves_no_params() {
    let pattern = compiled("/a/:x/b", false);
    let mut params = std::collections::HashMap::new();
    assert!(!pattern.match_into("/a/1/c", &mut params));
    assert!(params.is_empty());
}

// ============== Pool Tests ==============

#[derive(Default)]
struct Scratch {
    values: Vec<u32>,
}

impl Reset for Scratch {
    fn reset(&mut self) {
        self.values.clear();
    }
}

#[test]
fn test_pool_reuses_reset_items() {
    let pool: Pool<Scratch> = Pool::new(4);
    {
        let mut item = pool.acquire();
        item.values.extend([1, 2, 3]);
    }
    assert_eq!(pool.idle(), 1);

    let item = pool.acquire();
    assert!(item.values.is_empty());
    assert_eq!(pool.idle(), 0);
}

#[test]
fn test_pool_respects_max_idle() {
    let pool: Pool<Scratch> = Pool::new(1);
    let a = pool.acquire();
    let b = pool.acquire();
    drop(a);
    drop(b);
    assert_eq!(pool.idle(), 1);
}

// ============== ResponseWriter Tests ==============

#[tokio::test]
async fn test_writer_write_commits_pending_status() {
    let mut rec = Recorder::new();
    let mut w = ResponseWriter::new(&mut rec);
    w.set_status(StatusCode::CREATED);
    assert!(!w.header_committed());

    w.write(b"done").await.unwrap();
    assert!(w.header_committed());
    assert!(w.body_written());
    assert_eq!(w.status(), StatusCode::CREATED);

    assert_eq!(rec.status(), StatusCode::CREATED);
    assert_eq!(rec.body(), b"done");
}

#[tokio::test]
async fn test_writer_header_written_once() {
    let mut rec = Recorder::new();
    let mut w = ResponseWriter::new(&mut rec);
    w.write_header(StatusCode::ACCEPTED);
    w.write_header(StatusCode::INTERNAL_SERVER_ERROR);
    w.set_status(StatusCode::NOT_FOUND);
    assert_eq!(w.status(), StatusCode::ACCEPTED);
    assert!(!w.body_written());

    assert_eq!(rec.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn test_writer_headers_snapshot_at_commit() {
    let mut rec = Recorder::new();
    let mut w = ResponseWriter::new(&mut rec);
    w.headers_mut().insert("x-before", "1".parse().unwrap());
    w.write(b"x").await.unwrap();
    w.headers_mut().insert("x-after", "1".parse().unwrap());

    assert_eq!(rec.header("x-before"), Some("1"));
    assert_eq!(rec.header("x-after"), None);
}

#[tokio::test]
async fn test_writer_optional_capabilities() {
    let mut rec = Recorder::unflushable();
    let mut w = ResponseWriter::new(&mut rec);
    assert!(!w.can_flush());
    assert!(matches!(w.flush().await, Err(Error::Unsupported("flush"))));
    assert!(matches!(w.push("/app.js"), Err(Error::Unsupported("push"))));

    let mut rec = Recorder::new();
    let mut w = ResponseWriter::new(&mut rec);
    w.flush().await.unwrap();
    assert!(w.header_committed());
    assert_eq!(rec.flushes(), 1);
}

#[tokio::test]
async fn test_writer_original_bypasses_tracking() {
    let mut rec = Recorder::new();
    let mut w = ResponseWriter::new(&mut rec);
    w.original().write_body(b"raw").await.unwrap();
    assert!(!w.body_written());
    assert!(!w.header_committed());

    assert_eq!(rec.body(), b"raw");
}

// ============== Responses Tests ==============

struct Unencodable;

impl Serialize for Unencodable {
    fn serialize<S: Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
        Err(S::Error::custom("cannot encode"))
    }
}

#[tokio::test]
async fn test_send_response_envelope() {
    let mut rec = Recorder::new();
    let mut w = ResponseWriter::new(&mut rec);
    responses::r200(&mut w, &serde_json::json!({"a": 1})).await;

    assert_eq!(rec.status(), StatusCode::OK);
    assert_eq!(rec.header("content-type"), Some(responses::JSON_CONTENT_TYPE));
    let body: serde_json::Value = serde_json::from_slice(rec.body()).unwrap();
    assert_eq!(body, serde_json::json!({"data": {"a": 1}, "status": 200}));
}

#[tokio::test]
async fn test_send_error_envelope() {
    let mut rec = Recorder::new();
    let mut w = ResponseWriter::new(&mut rec);
    responses::r400(&mut w, "bad input").await;

    assert_eq!(rec.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = serde_json::from_slice(rec.body()).unwrap();
    assert_eq!(body, serde_json::json!({"errors": "bad input", "status": 400}));
}

#[tokio::test]
async fn test_encoding_failure_is_internal_error() {
    let mut rec = Recorder::new();
    let mut w = ResponseWriter::new(&mut rec);
    responses::r201(&mut w, &Unencodable).await;

    assert_eq!(rec.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(rec.body_string().contains(responses::ERR_INTERNAL_SERVER));
}

#[tokio::test]
async fn test_header_only_responses() {
    let mut rec = Recorder::new();
    let mut w = ResponseWriter::new(&mut rec);
    responses::r204(&mut w);
    assert_eq!(rec.status(), StatusCode::NO_CONTENT);
    assert!(rec.body().is_empty());

    let mut rec = Recorder::new();
    let mut w = ResponseWriter::new(&mut rec);
    responses::r302(&mut w, "/login");
    assert_eq!(rec.status(), StatusCode::FOUND);
    assert_eq!(rec.header("location"), Some("/login"));
}

#[tokio::test]
async fn test_send_plain() {
    let mut rec = Recorder::new();
    let mut w = ResponseWriter::new(&mut rec);
    responses::send(&mut w, responses::HTML_CONTENT_TYPE, "<p>hi</p>", StatusCode::OK).await;

    assert_eq!(rec.header("content-type"), Some(responses::HTML_CONTENT_TYPE));
    assert_eq!(rec.body_string(), "<p>hi</p>");
}

// ============== Message Tests ==============

#[test]
fn test_message_data_only() {
    assert_eq!(Message::new("hello").to_string(), "data:hello\n\n");
}

#[test]
fn test_message_field_order() {
    let message = Message::new("hello")
        .with_retry(Duration::from_millis(500))
        .with_id("7")
        .with_event("tick");
    assert_eq!(
        message.to_string(),
        "event:tick\nid:7\ndata:hello\nretry:500\n\n"
    );
}

#[test]
fn test_message_multiline_data() {
    assert_eq!(Message::new("a\nb").to_string(), "data:a\ndata:b\n\n");
}

#[test]
fn test_message_empty_fields_omitted() {
    let message = Message {
        event: Some(String::new()),
        id: None,
        data: None,
        retry: Some(Duration::ZERO),
    };
    assert_eq!(message.to_string(), "\n");
}

#[test]
fn test_message_json() {
    let message = Message::json(&serde_json::json!({"n": 1})).unwrap();
    assert_eq!(message.to_string(), "data:{\"n\":1}\n\n");
}

// ============== Config Tests ==============

#[test]
fn test_config_defaults() {
    let config = Config::default();
    config.validate().unwrap();
    assert_eq!(config.socket_addr().unwrap().to_string(), "0.0.0.0:8080");
    assert_eq!(config.write_timeout(), None);
    assert_eq!(config.shutdown_timeout(), Duration::from_secs(30));
    assert!(!config.reverse_middleware);
}

#[test]
fn test_config_from_json() {
    let config: Config = serde_json::from_str(
        r#"{"host":"127.0.0.1","port":9000,"reverseMiddleware":true,"writeTimeoutMs":250}"#,
    )
    .unwrap();
    assert_eq!(config.socket_addr().unwrap().to_string(), "127.0.0.1:9000");
    assert!(config.reverse_middleware);
    assert_eq!(config.write_timeout(), Some(Duration::from_millis(250)));
    assert_eq!(config.context_pool_size, Config::default().context_pool_size);
}

#[test]
fn test_config_rejects_bad_values() {
    let config = Config {
        host: "not a host".into(),
        ..Config::default()
    };
    assert!(matches!(config.validate(), Err(Error::Config(_))));

    let config = Config {
        shutdown_timeout_ms: 0,
        ..Config::default()
    };
    assert!(matches!(config.validate(), Err(Error::Config(_))));

    assert!(serde_json::from_str::<Config>(r#"{"port":70000}"#).is_err());
}

#[test]
fn test_config_tls_settings() {
    let config = Config::default();
    assert!(config.tls_files().is_none());
    assert_eq!(config.https_addr().unwrap().port(), 8443);
    assert_eq!(config.read_timeout(), None);

    let config: Config = serde_json::from_str(
        r#"{"certFile":"/etc/tls/cert.pem","keyFile":"/etc/tls/key.pem","httpsPort":9443,"readTimeoutMs":100}"#,
    )
    .unwrap();
    config.validate().unwrap();
    let (cert, key) = config.tls_files().unwrap();
    assert_eq!(cert.to_str(), Some("/etc/tls/cert.pem"));
    assert_eq!(key.to_str(), Some("/etc/tls/key.pem"));
    assert_eq!(config.https_addr().unwrap().port(), 9443);
    assert_eq!(config.read_timeout(), Some(Duration::from_millis(100)));

    let config = Config {
        cert_file: "/etc/tls/cert.pem".into(),
        ..Config::default()
    };
    assert!(matches!(config.validate(), Err(Error::Config(_))));
}

#[test]
fn test_config_load_missing_file() {
    assert!(matches!(
        Config::load("/nonexistent/webmux.json"),
        Err(Error::Config(_))
    ));
}
