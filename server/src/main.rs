use std::net::SocketAddr;
use std::sync::Arc;

use llm_core::OllamaClient;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tts_core::{EdgeTtsEngine, SpeechEngine};

use voice_relay::{build_router, AppState, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let _ = dotenv::dotenv();

    async_main().await
}

async fn async_main() -> anyhow::Result<()> {
    info!("Starting voice relay...");

    let config = ServerConfig::from_env();

    let engine = EdgeTtsEngine::from_command_line(&config.tts_command).unwrap_or_else(|| {
        warn!("TTS_COMMAND is blank, using edge-tts");
        EdgeTtsEngine::default()
    });
    info!("Speech engine: {}", engine.program());
    let engine: Arc<dyn SpeechEngine> = Arc::new(engine);

    let llm = OllamaClient::new(&config.ollama_base_url, config.llm_timeout())?;
    info!(
        "Server configuration loaded: port={}, ollama={}, ollama_timeout={}s, chunk_size={}",
        config.port,
        config.ollama_base_url,
        config.ollama_timeout_secs,
        config.tts_chunk_size
    );

    let addr: SocketAddr = config.bind_address().parse()?;
    let app = build_router(AppState::new(config, llm, engine));

    let listener = TcpListener::bind(addr).await.map_err(|e| {
        anyhow::anyhow!("Failed to bind {addr}: {e}. Try a different PORT.")
    })?;

    info!("Server listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
