//! Pizza ordering backend plumbing with periodic OTLP metrics push.
//!
//! Auth, franchise and order handlers are supplied by the caller through
//! [`Routes`]; this crate counts what flows through them and ships the
//! counters to a collector.

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
mod router;
pub mod telemetry;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::http::{Method, StatusCode, header};
use axum::routing::get;
use axum::{Router, middleware as AxumMiddleware};
use tower::ServiceBuilder;
use tower_http::LatencyUnit;
use tower_http::cors::{Any, CorsLayer};
use tower_http::sensitive_headers::SetSensitiveHeadersLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{
    DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer,
};

use telemetry::{Exporter, HostSampler, Metrics, Scheduler};

/// MUST NEVER be used in production.
#[cfg(test)]
pub async fn make_request(
    app: Router,
    method: Method,
    path: &str,
    body: String,
) -> axum::http::Response<axum::body::Body> {
    use axum::extract::Request;
    use tower::util::ServiceExt;

    app.oneshot(
        Request::builder()
            .method(method)
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json")
            .body(axum::body::Body::from(body))
            .unwrap(),
    )
    .await
    .unwrap()
}

/// State sharing between routes.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<config::Configuration>,
    pub metrics: Metrics,
}

/// Externally provided handlers.
#[derive(Default)]
pub struct Routes {
    /// Mounted at `/api/auth`. Every response feeds the auth counters,
    /// unmatched paths included. Its fallback is replaced by a plain 404.
    pub auth: Router<AppState>,
    /// Merged at the root, paths must include their `/api` prefix.
    pub api: Router<AppState>,
}

/// Create router.
pub fn app(state: AppState, routes: Routes) -> Router {
    let middleware = ServiceBuilder::new()
        // Add high level tracing/logging to all requests.
        .layer(
            TraceLayer::new_for_http()
                .on_body_chunk(|chunk: &Bytes, latency: Duration, _span: &tracing::Span| {
                    tracing::trace!(size_bytes = chunk.len(), latency = ?latency, "sending body chunk")
                })
                .make_span_with(DefaultMakeSpan::new().include_headers(true).level(tracing::Level::INFO))
                .on_request(DefaultOnRequest::new())
                .on_response(DefaultOnResponse::new().include_headers(true).latency_unit(LatencyUnit::Micros)),
        )
        // Set a timeout.
        .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, Duration::from_secs(10)))
        // Remove senstive headers from trace.
        .layer(SetSensitiveHeadersLayer::new([header::AUTHORIZATION, header::COOKIE]))
        // Add CORS preflight support.
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
                .allow_headers(Any)
                .vary([header::AUTHORIZATION]),
        );

    // Own fallback so unmatched auth paths are not handed to the outer
    // router; `layer` then wraps it too.
    let auth_router = routes
        .auth
        .fallback(|| async { StatusCode::NOT_FOUND })
        .layer(AxumMiddleware::from_fn_with_state(
            state.clone(),
            telemetry::track_auth,
        ));

    Router::new()
        // `GET /status.json` goes to `status`.
        .route("/status.json", get(router::status::status))
        .nest("/api/auth", auth_router)
        .merge(routes.api)
        .route_layer(AxumMiddleware::from_fn_with_state(
            state.clone(),
            telemetry::track_requests,
        ))
        .with_state(state)
        .layer(middleware)
}

/// Initialize the application state.
pub fn initialize_state() -> error::Result<AppState> {
    // read configuration file. let it in memory.
    let path = std::env::var("CONFIG_PATH").unwrap_or_default();
    let config = config::Configuration::default().path(path.into()).read()?;

    Ok(AppState {
        config,
        metrics: Metrics::new(),
    })
}

/// Start pushing metrics when a `metrics` section is configured.
pub fn start_metrics(state: &AppState) -> error::Result<Option<Scheduler>> {
    let Some(cfg) = &state.config.metrics else {
        tracing::warn!("missing `metrics` entry on `config.yaml` file, metrics push disabled");
        return Ok(None);
    };

    let exporter = Exporter::new(cfg, Arc::new(HostSampler::new()))?;
    tracing::info!(url = %cfg.url, source = %cfg.source, "metrics push enabled");

    Ok(Some(Scheduler::start(
        exporter,
        state.metrics.clone(),
        cfg.interval(),
    )))
}
