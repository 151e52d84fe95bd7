//! DocPilot API Gateway
//!
//! The external surface of the query-time layer. Handles:
//! - Chat turns, non-streaming and SSE-streaming
//! - Conversation history retrieval and deletion
//! - Observability (logging, metrics, tracing)

mod handlers;

use axum::{
    routing::{delete, get, post},
    Router,
};
use docpilot_agent::{Assistant, MemoryManager};
use docpilot_common::{
    backend::create_backend,
    checkpoint::create_checkpoint_store,
    config::AppConfig,
    embeddings::create_embedder,
    llm::create_llm,
    metrics::register_metrics,
};
use docpilot_retrieval::{HybridRetriever, Researcher};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub assistant: Arc<Assistant>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration before tracing so the log level is honored
    let config = AppConfig::load()?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_level));
    if config.observability.json_logging {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }

    info!(
        service = %config.observability.service_name,
        "Starting DocPilot API Gateway v{}",
        docpilot_common::VERSION
    );

    let config = Arc::new(config);

    // Metrics exporter
    if config.observability.metrics_port > 0 {
        let metrics_addr = SocketAddr::from(([0, 0, 0, 0], config.observability.metrics_port));
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .set_buckets_for_metric(
                metrics_exporter_prometheus::Matcher::Suffix("duration_seconds".to_string()),
                docpilot_common::metrics::LATENCY_BUCKETS,
            )?
            .with_http_listener(metrics_addr)
            .install()?;
        info!("Metrics exporter listening on {}", metrics_addr);
    }
    register_metrics();

    // Wire the provider stack
    let backend = create_backend(&config.search)?;
    let embedder = create_embedder(&config.embedding)?;
    let llm = create_llm(&config.llm)?;
    let store = create_checkpoint_store(&config.checkpoint).await?;

    let retriever = Arc::new(HybridRetriever::new(
        backend,
        embedder,
        config.retrieval.clone(),
        config.search.deadline_ms,
    ));
    let researcher = Arc::new(Researcher::new(
        retriever,
        config.retrieval.max_concurrency,
        config.retrieval.max_context_documents,
    ));
    let memory = Arc::new(MemoryManager::new(
        store,
        Arc::clone(&llm),
        config.memory.clone(),
    ));
    let assistant = Arc::new(Assistant::new(
        llm,
        researcher,
        memory,
        config.server.event_buffer,
    ));

    let state = AppState {
        config: config.clone(),
        assistant,
    };

    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    let api_routes = Router::new()
        // Chat endpoints
        .route("/chat", post(handlers::chat::chat))
        .route("/chat/stream", post(handlers::chat::chat_stream))
        // History endpoints
        .route("/history/{thread_id}", get(handlers::history::get_history))
        .route(
            "/history/{thread_id}",
            delete(handlers::history::delete_history),
        );

    // The timeout bounds the response future; SSE bodies stream past it
    let timeout = TimeoutLayer::new(state.config.request_timeout());

    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .nest("/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(timeout)
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
