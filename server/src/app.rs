use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{DefaultBodyLimit, Request},
    http::{HeaderValue, Method},
    middleware::Next,
    response::Response,
    routing::{get, post},
    Router,
};
use llm_core::OllamaClient;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};
use tts_core::{ChunkProducer, EngineChunkProducer, SpeechEngine};

use crate::api;
use crate::config::ServerConfig;
use crate::metrics::RelayMetrics;
use crate::registry::SessionRegistry;
use crate::relay;
use crate::session::SessionContext;

/// Largest accepted request body.
const MAX_BODY_BYTES: usize = 1024 * 1024;

const REQUEST_ID: &str = "x-request-id";

#[derive(Clone)]
pub struct AppState {
    pub llm: Arc<OllamaClient>,
    pub engine: Arc<dyn SpeechEngine>,
    pub producer: Arc<dyn ChunkProducer>,
    pub registry: Arc<SessionRegistry>,
    pub metrics: Arc<RelayMetrics>,
    pub request_count: Arc<AtomicU64>,
    pub started_at: Instant,
    pub config: ServerConfig,
}

impl AppState {
    pub fn new(config: ServerConfig, llm: OllamaClient, engine: Arc<dyn SpeechEngine>) -> Self {
        let producer =
            EngineChunkProducer::new(Arc::clone(&engine)).with_chunk_size(config.tts_chunk_size);
        Self {
            llm: Arc::new(llm),
            engine,
            producer: Arc::new(producer),
            registry: Arc::new(SessionRegistry::new()),
            metrics: Arc::new(RelayMetrics::new()),
            request_count: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
            config,
        }
    }

    pub fn session_context(&self) -> SessionContext {
        SessionContext {
            producer: Arc::clone(&self.producer),
            registry: Arc::clone(&self.registry),
            metrics: Arc::clone(&self.metrics),
            settings: self.config.session_settings(),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config);

    let middleware_stack = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(state.config.request_timeout()))
        .layer(cors)
        .into_inner();

    let api = Router::new()
        .route("/health", get(api::api_health))
        .route("/tags", get(api::list_models))
        .route("/chat", post(api::chat))
        .route("/generate", post(api::generate))
        .route("/tts", post(api::text_to_speech))
        .route("/tts/voices", get(api::list_voices))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES));

    // The upgrade route sits outside the timeout: connections are long-lived.
    let ws = Router::new().route("/ws/voice/{client_id}", get(relay::voice_ws));

    let http = Router::new()
        .route("/health", get(api::health_check))
        .route("/metrics", get(api::metrics_endpoint))
        .nest("/api", api)
        .layer(middleware_stack);

    Router::new()
        .merge(http)
        .merge(ws)
        .layer(axum::middleware::from_fn(add_request_id))
        .with_state(state)
}

fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
        .allow_credentials(false);

    let Some(allowed_origins) = &config.cors_allowed_origins else {
        warn!("CORS_ALLOWED_ORIGINS not set, allowing all origins (development mode)");
        return base.allow_origin(Any);
    };

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect();

    if origins.is_empty() {
        warn!("CORS_ALLOWED_ORIGINS is empty, falling back to permissive CORS");
        base.allow_origin(Any)
    } else {
        info!("CORS configured for {} origin(s)", origins.len());
        base.allow_origin(AllowOrigin::list(origins))
    }
}

/// Tag each request and its response with a fresh `x-request-id`.
async fn add_request_id(mut request: Request, next: Next) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    // a hyphenated uuid is always a valid header value
    let Ok(value) = HeaderValue::from_str(&request_id) else {
        return next.run(request).await;
    };
    request.headers_mut().insert(REQUEST_ID, value.clone());
    let mut response = next.run(request).await;
    response.headers_mut().insert(REQUEST_ID, value);
    response
}
