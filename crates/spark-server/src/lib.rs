use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use spark_config::Config;
use spark_contracts::{Event, WebhookEnvelope};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

mod api;
mod backend;
mod cache;
mod context;
mod dispatch;
mod http;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;
mod model;
mod translate;

pub use api::{decode, encode, Query, SparkApi};
pub use backend::SparkBackend;
pub use cache::RoomCache;
pub use context::{BotIdentity, SparkContext};
pub use dispatch::{Dispatcher, Framework, TracingFramework};
pub use http::HttpApi;
pub use model::{Identifier, Message, Person, RoomOccupant};
pub use translate::Translator;

/// Runs the adapter until ctrl-c, then unregisters and disconnects.
pub async fn serve_forever(cfg: Config, framework: Arc<dyn Framework>) -> Result<(), String> {
    let api = HttpApi::from_config(&cfg)?;
    let bot = BotIdentity::from_config(&cfg.bot).map_err(|e| format!("invalid bot: {e}"))?;
    let backend = Arc::new(SparkBackend::new(
        SparkContext::new(Arc::new(api), bot),
        framework,
    ));
    serve_backend(backend, &cfg, shutdown_signal()).await
}

/// Binds the receiver before anything is registered remotely, then serves
/// until `shutdown` resolves. Once the webhook exists, every exit path
/// removes an ephemeral one.
pub async fn serve_backend<F>(
    backend: Arc<SparkBackend>,
    cfg: &Config,
    shutdown: F,
) -> Result<(), String>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr: SocketAddr = cfg
        .server
        .listen_addr
        .parse()
        .map_err(|e| format!("invalid listen_addr: {e}"))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| format!("bind failed: {e}"))?;

    if let Err(err) = backend.start(&cfg.webhook).await {
        if let Err(cleanup) = backend.remove_owned_webhook().await {
            warn!(error = %cleanup, "failed to remove webhook after startup failure");
        }
        return Err(format!("startup failed: {err}"));
    }
    info!(rooms = backend.cache().len(), "room cache warmed");

    let reloader = spawn_reloader(backend.clone(), cfg.cache.reload_interval_secs);
    let app = build_app(backend.clone(), &cfg.server.webhook_path);
    info!(%addr, path = %cfg.server.webhook_path, "webhook receiver listening");
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| format!("serve failed: {e}"));

    if let Some(task) = reloader {
        task.abort();
    }
    backend.shutdown().await;
    served
}

pub fn build_app(backend: Arc<SparkBackend>, webhook_path: &str) -> Router {
    Router::new()
        .route("/v1/healthz", get(healthz))
        .route(webhook_path, post(incoming))
        .with_state(AppState { backend })
}

#[derive(Clone)]
struct AppState {
    backend: Arc<SparkBackend>,
}

fn spawn_reloader(backend: Arc<SparkBackend>, interval_secs: u64) -> Option<JoinHandle<()>> {
    if interval_secs == 0 {
        return None;
    }
    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        // first tick fires immediately and startup already reloaded
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match backend.reload_rooms().await {
                Ok(count) => debug!(rooms = count, "periodic reload done"),
                Err(err) => warn!(error = %err, "periodic reload failed"),
            }
        }
    }))
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

async fn incoming(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, &'static str), (StatusCode, Json<Value>)> {
    let envelope: WebhookEnvelope = serde_json::from_slice(&body).map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": {"code": "invalid_envelope", "message": e.to_string()}})),
        )
    })?;
    debug!(
        resource = %envelope.resource,
        event = %envelope.event,
        "webhook received"
    );
    state.backend.handle_event(&Event::from(envelope)).await;
    Ok((StatusCode::OK, "OK"))
}
