use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::{
    extract::{Query as UrlQuery, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use futures::stream::Stream;
use serde::Deserialize;
use tokio_stream::StreamExt;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use marketlens_common::{ChatRequest, Config, EngineError, ReportRequest};
use marketlens_engine::workflow::WorkflowEvent;
use marketlens_engine::Engine;

struct AppState {
    engine: Engine,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("marketlens=info".parse()?))
        .init();

    let config = Config::from_env();
    let engine = Engine::init(&config).await?;
    let state = Arc::new(AppState { engine });

    let app = Router::new()
        .route("/chat", post(chat))
        .route("/report", post(report))
        .route("/report/stream", get(report_stream))
        .route("/health/live", get(health_live))
        .route("/health/ready", get(health_ready))
        .route("/metrics", get(metrics))
        .with_state(state.clone())
        .layer(
            tower_http::trace::TraceLayer::new_for_http().make_span_with(
                |request: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        path = %request.uri().path(),
                    )
                },
            ),
        );

    let addr = format!("{}:{}", config.web_host, config.web_port);
    info!("MarketLens server starting on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state.clone()))
        .await?;

    Ok(())
}

async fn shutdown_signal(state: Arc<AppState>) {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received, draining");
    state.engine.shutdown(Duration::from_secs(30)).await;
}

// --- Handlers ---

async fn chat(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> axum::response::Response {
    match state.engine.router.route(&request).await {
        Ok(response) => Json(response).into_response(),
        Err(e) => error_response(e),
    }
}

async fn report(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ReportRequest>,
) -> axum::response::Response {
    match state.engine.router.report(&request).await {
        Ok(response) => Json(response).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Deserialize)]
struct StreamParams {
    query: String,
    analysis_depth: Option<String>,
    lookback_days: Option<u32>,
    domain: Option<String>,
    symbol: Option<String>,
}

async fn report_stream(
    State(state): State<Arc<AppState>>,
    UrlQuery(params): UrlQuery<StreamParams>,
) -> Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>> {
    let request = ReportRequest {
        query: params.query,
        analysis_depth: params.analysis_depth.and_then(|d| d.parse().ok()),
        lookback_days: params.lookback_days.unwrap_or(180),
        domain: params.domain,
        symbol: params.symbol,
    };

    let rx = state.engine.router.stream_report(request);
    let stream = tokio_stream::wrappers::ReceiverStream::new(rx).map(|event| {
        let name = match &event {
            WorkflowEvent::Progress { .. } => "progress",
            WorkflowEvent::Step { .. } => "step",
            WorkflowEvent::Data(_) => "data",
            WorkflowEvent::Final(_) => "final",
            WorkflowEvent::Error { .. } => "error",
            WorkflowEvent::Done => "done",
        };
        let payload = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
        Ok(Event::default().event(name).data(payload))
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn health_live() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

async fn health_ready(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.engine.readiness().await)
}

async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.engine.metrics.as_json())
}

/// Validation failures surface as 422, overload as 503 with retry_after;
/// everything else was already degraded into a 200 by the router.
fn error_response(e: EngineError) -> axum::response::Response {
    match e {
        EngineError::Validation(detail) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(serde_json::json!({"error": "validation", "detail": detail})),
        )
            .into_response(),
        EngineError::Overload { retry_after_s } => (
            StatusCode::SERVICE_UNAVAILABLE,
            [("retry-after", retry_after_s.to_string())],
            Json(serde_json::json!({"error": "overload", "retry_after": retry_after_s})),
        )
            .into_response(),
        other => {
            warn!(error = %other, "unexpected router error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "internal"})),
            )
                .into_response()
        }
    }
}
