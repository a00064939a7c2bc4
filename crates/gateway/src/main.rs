//! NutriForge API Gateway
//!
//! HTTP entry point for the pipeline. Handles:
//! - Invocation triggers for the worker, retry sweep and review jobs
//! - Food registration and lookup
//! - The review dashboard's flag listing and manual clearing
//! - Observability (logging, metrics, request ids)

mod handlers;
mod middleware;

use axum::{
    extract::Request,
    middleware::Next,
    routing::{delete, get, post},
    Router,
};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use nutriforge_common::{
    config::{AppConfig, ObservabilityConfig},
    metrics::{self, LATENCY_BUCKETS, PROVIDER_BUCKETS, METRICS_PREFIX},
    open_store,
    provider::create_provider,
    NutrientProvider, PipelineStore, VERSION,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn PipelineStore>,
    pub provider: Arc<dyn NutrientProvider>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = AppConfig::load().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        e
    })?;

    init_tracing(&config.observability);
    info!("Starting NutriForge API Gateway v{}", VERSION);

    let config = Arc::new(config);

    // Initialize metrics
    install_metrics_exporter(&config.observability)?;
    metrics::register_metrics();

    let store = open_store(&config.database).await?;
    let provider = create_provider(&config.provider)?;
    info!(provider = provider.name(), "Provider initialized");

    let state = AppState {
        config: config.clone(),
        store,
        provider,
    };

    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    if config.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Serve Prometheus metrics on their own port
fn install_metrics_exporter(config: &ObservabilityConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .add_global_label("service", config.service_name.clone())
        .set_buckets_for_metric(
            Matcher::Full(format!("{}_request_duration_seconds", METRICS_PREFIX)),
            LATENCY_BUCKETS,
        )?
        .set_buckets_for_metric(
            Matcher::Full(format!("{}_provider_duration_seconds", METRICS_PREFIX)),
            PROVIDER_BUCKETS,
        )?
        .install()?;
    info!(%addr, "Metrics exporter listening");
    Ok(())
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    let limiter = middleware::rate_limit::create_rate_limiter(
        state.config.server.rate_limit_rps,
        state.config.server.rate_limit_burst,
    );

    let api_routes = Router::new()
        // Invocation triggers
        .route("/enrichment/run", post(handlers::enrichment::run))
        .route("/enrichment/enqueue", post(handlers::enrichment::enqueue))
        .route("/enrichment/queue", get(handlers::enrichment::queue_stats))
        .route("/retry/sweep", post(handlers::retry::sweep))

        // Review dashboard
        .route("/review", get(handlers::review::list))
        .route("/review/verify", post(handlers::review::verify))
        .route("/review/duplicates", post(handlers::review::duplicates))
        .route("/review/{food_id}/flags/{flag}", delete(handlers::review::clear_flag))

        // Foods
        .route("/foods", post(handlers::foods::create_food))
        .route("/foods/{id}", get(handlers::foods::get_food))
        .layer(axum::middleware::from_fn(move |req: Request, next: Next| {
            middleware::rate_limit::rate_limit_middleware(req, next, limiter.clone())
        }));

    Router::new()
        // Health endpoints (never rate limited)
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .nest("/v1", api_routes)
        .route_layer(axum::middleware::from_fn(middleware::metrics::track_requests))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id)
        .with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use nutriforge_common::provider::MockProvider;
    use nutriforge_common::MemoryStore;
    use serde_json::Value;
    use tower::ServiceExt;

    pub fn state_with(store: Arc<MemoryStore>, provider: MockProvider) -> AppState {
        AppState {
            config: Arc::new(AppConfig::default()),
            store,
            provider: Arc::new(provider),
        }
    }

    /// Send one request through the full router
    pub async fn send(
        state: AppState,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string())),
            None => builder.body(Body::empty()),
        }
        .unwrap();

        let response = create_router(state).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }
}
