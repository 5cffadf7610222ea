//! HTTP handlers: inference proxy, one-shot speech and service status.

use std::convert::Infallible;
use std::sync::atomic::Ordering;

use axum::{
    body::Body,
    extract::{Query, State},
    http::header,
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
    Json,
};
use chrono::Utc;
use futures_util::{future, stream, StreamExt};
use llm_core::InferenceRequest;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info, warn};
use tts_core::{filter_by_locale, SynthesisError, SynthesisRequest};

use crate::app::AppState;
use crate::error::ApiError;
use crate::metrics::{MetricsResponse, SystemMetrics};
use crate::validation::{validate_inference_request, validate_tts_request, Endpoint};

pub async fn health_check() -> &'static str {
    "ok"
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub ollama_connected: bool,
}

/// Healthy only while the inference service answers.
pub async fn api_health(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    match state.llm.ping().await {
        Ok(()) => Ok(Json(HealthResponse {
            status: "healthy",
            version: env!("CARGO_PKG_VERSION"),
            ollama_connected: true,
        })),
        Err(e) => {
            error!("Health check failed: {}", e);
            Err(ApiError::Unavailable(
                "Service temporarily unavailable".to_string(),
            ))
        }
    }
}

pub async fn list_models(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    state.request_count.fetch_add(1, Ordering::Relaxed);
    Ok(Json(state.llm.tags().await?))
}

pub async fn chat(
    State(state): State<AppState>,
    Json(request): Json<InferenceRequest>,
) -> Result<Json<Value>, ApiError> {
    state.request_count.fetch_add(1, Ordering::Relaxed);
    validate_inference_request(&request, Endpoint::Chat)?;
    info!(
        "Chat request - Model: {}, Messages: {}",
        request.model,
        request.messages.len()
    );

    let reply = state.llm.chat(&request).await?;
    info!("Chat response received");
    Ok(Json(reply))
}

/// With `stream: true` every upstream NDJSON line becomes one SSE event.
pub async fn generate(
    State(state): State<AppState>,
    Json(request): Json<InferenceRequest>,
) -> Result<Response, ApiError> {
    state.request_count.fetch_add(1, Ordering::Relaxed);
    validate_inference_request(&request, Endpoint::Generate)?;
    info!(
        "Generate request - Model: {}, Stream: {}",
        request.model, request.stream
    );

    if !request.stream {
        return Ok(Json(state.llm.generate(&request).await?).into_response());
    }

    let lines = state.llm.generate_stream(&request).await?;
    let events = lines.map(|line| {
        let event = match line {
            Ok(line) => Event::default().data(line),
            Err(e) => {
                error!("Generate stream failed: {}", e);
                Event::default()
                    .event("error")
                    .data(json!({ "error": e.to_string() }).to_string())
            }
        };
        Ok::<_, Infallible>(event)
    });
    Ok(Sse::new(events).into_response())
}

#[derive(Debug, Deserialize)]
pub struct TtsRequest {
    pub text: String,
    pub voice: Option<String>,
    pub rate: Option<String>,
    pub volume: Option<String>,
}

/// Stream synthesized audio as the response body.
///
/// The first chunk is pulled before the response starts, so a request the
/// engine rejects gets a proper error status instead of an empty body.
pub async fn text_to_speech(
    State(state): State<AppState>,
    Json(req): Json<TtsRequest>,
) -> Result<Response, ApiError> {
    state.request_count.fetch_add(1, Ordering::Relaxed);
    validate_tts_request(&req.text)?;

    let request = SynthesisRequest::new(req.text, &state.config.voice_settings())
        .with_overrides(req.voice, req.rate, req.volume);
    info!(voice = %request.voice, chars = request.text.chars().count(), "TTS request");

    let mut audio = state.producer.produce(request);
    let first = match audio.next().await {
        Some(Ok(chunk)) => chunk,
        Some(Err(e)) => return Err(ApiError::TtsError(e)),
        None => return Err(ApiError::TtsError(SynthesisError::EmptyOutput)),
    };

    let body = stream::once(future::ready(Ok(first)))
        .chain(audio)
        .map(|chunk| chunk.map(|c| c.into_bytes()));

    Ok((
        [(header::CONTENT_TYPE, state.producer.media_type())],
        Body::from_stream(body),
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
pub struct VoicesQuery {
    pub locale: Option<String>,
}

pub async fn list_voices(
    State(state): State<AppState>,
    Query(query): Query<VoicesQuery>,
) -> Result<Json<Value>, ApiError> {
    let voices = state.engine.list_voices().await.map_err(|e| {
        warn!("Voice listing failed: {}", e);
        ApiError::InternalError(format!("Failed to fetch voices: {}", e))
    })?;
    let voices = filter_by_locale(voices, query.locale.as_deref());
    Ok(Json(json!({ "voices": voices })))
}

pub async fn metrics_endpoint(State(state): State<AppState>) -> Json<MetricsResponse> {
    let request_count = state.request_count.load(Ordering::Relaxed);
    Json(MetricsResponse {
        timestamp: Utc::now(),
        system: SystemMetrics::collect(request_count, state.started_at),
        active_sessions: state.registry.len(),
        relay: state.metrics.snapshot(),
    })
}
