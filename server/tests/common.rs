//! Common utilities for integration tests
#![allow(dead_code)]

use std::io::Cursor;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use llm_core::OllamaClient;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tts_core::{SpeechEngine, SynthesisError, SynthesisRequest, Voice};

use voice_relay::{build_router, AppState, ServerConfig};

/// Voice the fake engine refuses, the way edge-tts refuses unknown voices.
pub const MISSING_VOICE: &str = "xx-XX-MissingNeural";

pub const SAMPLE_RATE: u32 = 16_000;

/// Mono 16-bit WAV whose length depends on `text`.
pub fn render_wav(text: &str) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for i in 0..sample_count(text) {
            writer.write_sample(((i % 64) as i16 - 32) * 512).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

pub fn sample_count(text: &str) -> u32 {
    4000 * text.chars().count().max(1) as u32
}

/// Stand-in for edge-tts that renders a deterministic WAV file.
#[derive(Default)]
pub struct FakeEngine {
    pub calls: AtomicUsize,
}

#[async_trait]
impl SpeechEngine for FakeEngine {
    async fn synthesize(&self, request: &SynthesisRequest, out: &Path) -> Result<(), SynthesisError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if request.voice == MISSING_VOICE {
            return Err(SynthesisError::EngineFailed {
                status: "exit status: 1".to_string(),
                stderr: format!("No voice named {}", request.voice),
            });
        }
        tokio::fs::write(out, render_wav(&request.text)).await?;
        Ok(())
    }

    async fn list_voices(&self) -> Result<Vec<Voice>, SynthesisError> {
        Ok(vec![
            voice("en-US-AriaNeural", "Female", "en-US"),
            voice("en-GB-RyanNeural", "Male", "en-GB"),
            voice("de-DE-KatjaNeural", "Female", "de-DE"),
        ])
    }

    fn media_type(&self) -> &'static str {
        "audio/wav"
    }

    fn file_suffix(&self) -> &'static str {
        ".wav"
    }
}

fn voice(short_name: &str, gender: &str, locale: &str) -> Voice {
    Voice {
        short_name: short_name.to_string(),
        gender: gender.to_string(),
        locale: locale.to_string(),
    }
}

/// Minimal Ollama lookalike on an ephemeral port. Returns its base URL.
pub async fn spawn_mock_ollama() -> String {
    let app = Router::new()
        .route(
            "/api/tags",
            get(|| async { Json(json!({ "models": [{ "name": "llama3:latest" }] })) }),
        )
        .route(
            "/api/chat",
            post(|Json(body): Json<Value>| async move {
                if body["model"] == "missing" {
                    return (
                        StatusCode::NOT_FOUND,
                        Json(json!({ "error": "model 'missing' not found" })),
                    )
                        .into_response();
                }
                Json(json!({
                    "model": body["model"],
                    "message": { "role": "assistant", "content": "Hello from mock" },
                    "done": true,
                    "echo_stream": body["stream"],
                }))
                .into_response()
            }),
        )
        .route(
            "/api/generate",
            post(|Json(body): Json<Value>| async move {
                if body["stream"] == true {
                    let lines = concat!(
                        "{\"response\":\"Hel\",\"done\":false}\n",
                        "{\"response\":\"lo\",\"done\":false}\n",
                        "{\"response\":\"\",\"done\":true}\n",
                    );
                    ([(header::CONTENT_TYPE, "application/x-ndjson")], lines).into_response()
                } else {
                    Json(json!({ "response": "Hello", "done": true })).into_response()
                }
            }),
        );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// Application state wired to the fake engine and the given Ollama URL.
pub fn test_state(ollama_url: &str, chunk_size: usize) -> AppState {
    let config = ServerConfig {
        ollama_base_url: ollama_url.to_string(),
        tts_chunk_size: chunk_size,
        ws_write_timeout_secs: 5,
        ..ServerConfig::default()
    };
    let llm = OllamaClient::new(ollama_url, Duration::from_secs(5)).unwrap();
    AppState::new(config, llm, Arc::new(FakeEngine::default()))
}

/// Router plus the state behind it, backed by a fresh mock Ollama.
pub async fn create_test_app() -> (Router, AppState) {
    let ollama = spawn_mock_ollama().await;
    let state = test_state(&ollama, 4096);
    (build_router(state.clone()), state)
}

/// Serve `state` on an ephemeral port.
pub async fn spawn_server(state: AppState) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = build_router(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}
