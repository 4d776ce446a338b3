mod handlers;

use chrono::Utc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use webmux::middleware::{cors, AccessLog, Cors, CorsConfig};
use webmux::{Config, Message, Method, Route, RouteGroup, Router, Sse};

use crate::handlers::{
    Chain, ErrorLogger, ErrorSetter, GroupTag, Home, InvalidJson, OriginalWriter, Params,
    SseEndpoint, StaticFiles,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = match std::env::var("CONFIG_PATH") {
        Ok(path) => Config::load(path)?,
        Err(_) => Config::from_env()?,
    };

    let sse = Sse::builder()
        .on_create_client(|client, active| {
            info!(client_id = client.id(), active, "SSE client connected");
        })
        .on_remove_client(|client_id, active| {
            info!(client_id, active, "SSE client disconnected");
        })
        .build()?;

    let routes = cors::add_options_handlers(routes(&sse));
    let cors = Cors::new(CorsConfig::default().with_routes(&routes));

    let mut router = Router::new(config, routes)?;
    router
        .use_middleware(ErrorLogger)
        .use_middleware(cors)
        .use_middleware(AccessLog)
        .use_on_fallback(AccessLog);

    let shutdown = CancellationToken::new();
    spawn_clock(sse.clone(), shutdown.clone());

    let served = router.start().await;
    shutdown.cancel();
    served?;
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "webmux=info,webmux_demo=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

fn routes(sse: &Sse) -> Vec<Route> {
    let static_dir = std::env::var("STATIC_DIR").unwrap_or_else(|_| "./static".to_string());

    let mut routes = vec![
        Route::new("root", Method::GET, "/")
            .trailing_slash(true)
            .handler(Home),
        Route::new("matchall", Method::GET, "/matchall/:wildcard*")
            .trailing_slash(true)
            .handler(Params),
        Route::new("api", Method::GET, "/api/:param")
            .trailing_slash(true)
            .fall_through(true)
            .handler(Chain)
            .handler(Params),
        Route::new("invalidjson", Method::GET, "/invalidjson")
            .trailing_slash(true)
            .handler(InvalidJson),
        Route::new("error-setter", Method::GET, "/error-setter")
            .trailing_slash(true)
            .handler(ErrorSetter),
        Route::new("original-responsewriter", Method::GET, "/original-responsewriter")
            .trailing_slash(true)
            .handler(OriginalWriter),
        Route::new("static", Method::GET, "/static/:w*")
            .trailing_slash(true)
            .handler(StaticFiles {
                dir: ServeDir::new(static_dir),
            }),
        Route::new("sse", Method::GET, "/sse/:clientID")
            .trailing_slash(true)
            .handler(SseEndpoint { sse: sse.clone() }),
    ];

    let mut v7 = RouteGroup::new("/v7.0.0", false);
    v7.add(
        Route::new("v7-api", Method::GET, "/api/:param")
            .trailing_slash(true)
            .fall_through(true)
            .handler(Chain)
            .handler(Params),
    );
    v7.use_middleware(GroupTag);
    routes.extend(v7.into_routes());

    routes
}

/// Broadcast the server time to every SSE client once a second
fn spawn_clock(sse: Sse, shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let data = format!("{} ({})", Utc::now().to_rfc2822(), sse.active_clients());
                    let message = Message::new(data).with_retry(Duration::from_millis(500));
                    sse.broadcast(message).await;
                }
            }
        }
    });
}
