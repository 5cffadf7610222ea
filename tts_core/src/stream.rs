//! Streaming synthesis helpers.
//!
//! The engine renders a whole utterance to a scratch file. The producer
//! reads that file back in fixed-size pieces and yields them in order, so the
//! caller can start relaying audio without holding the payload in memory.
//! The scratch file lives exactly as long as the stream: it is removed when
//! the stream finishes, fails, or is dropped half way.

use std::pin::Pin;
use std::sync::Arc;

use futures_core::Stream;
use tempfile::TempPath;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::debug;

use crate::{AudioChunk, SpeechEngine, SynthesisError, SynthesisRequest};

/// Read size used when nothing else is configured.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

pub type AudioStream = Pin<Box<dyn Stream<Item = Result<AudioChunk, SynthesisError>> + Send>>;

/// Source of ordered audio chunks for a request.
///
/// Every call returns a fresh, lazy stream: no synthesis work starts until
/// the stream is first polled.
pub trait ChunkProducer: Send + Sync {
    fn produce(&self, request: SynthesisRequest) -> AudioStream;

    /// MIME type of the concatenated chunks.
    fn media_type(&self) -> &'static str {
        "application/octet-stream"
    }
}

/// [`ChunkProducer`] backed by a file-rendering [`SpeechEngine`].
#[derive(Clone)]
pub struct EngineChunkProducer {
    engine: Arc<dyn SpeechEngine>,
    chunk_size: usize,
}

impl EngineChunkProducer {
    pub fn new(engine: Arc<dyn SpeechEngine>) -> Self {
        Self {
            engine,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn engine(&self) -> &Arc<dyn SpeechEngine> {
        &self.engine
    }
}

impl ChunkProducer for EngineChunkProducer {
    fn produce(&self, request: SynthesisRequest) -> AudioStream {
        let engine = Arc::clone(&self.engine);
        let chunk_size = self.chunk_size;

        Box::pin(async_stream::stream! {
            let scratch = match scratch_file(engine.file_suffix()).await {
                Ok(path) => path,
                Err(e) => {
                    yield Err::<AudioChunk, SynthesisError>(e);
                    return;
                }
            };

            if let Err(e) = engine.synthesize(&request, &scratch).await {
                yield Err(e);
                return;
            }

            let mut file = match File::open(&scratch).await {
                Ok(file) => file,
                Err(e) => {
                    yield Err(SynthesisError::Io(e));
                    return;
                }
            };

            let mut chunks = 0usize;
            let mut bytes = 0usize;
            loop {
                match read_chunk(&mut file, chunk_size).await {
                    Ok(Some(chunk)) => {
                        chunks += 1;
                        bytes += chunk.len();
                        yield Ok(chunk);
                    }
                    Ok(None) => break,
                    Err(e) => {
                        yield Err(SynthesisError::Io(e));
                        return;
                    }
                }
            }

            if chunks == 0 {
                yield Err(SynthesisError::EmptyOutput);
            } else {
                debug!(chunks, bytes, "audio stream drained");
            }
        })
    }

    fn media_type(&self) -> &'static str {
        self.engine.media_type()
    }
}

/// Create the scratch file on the blocking pool; the path guard deletes it on drop.
async fn scratch_file(suffix: &'static str) -> Result<TempPath, SynthesisError> {
    let created = tokio::task::spawn_blocking(move || {
        tempfile::Builder::new()
            .prefix("voice-relay-")
            .suffix(suffix)
            .tempfile()
    })
    .await
    .map_err(|e| SynthesisError::Io(std::io::Error::other(e)))??;
    // keep only the path guard; the engine opens the file itself
    Ok(created.into_temp_path())
}

/// Fill up to `size` bytes; `None` at end of file.
async fn read_chunk(file: &mut File, size: usize) -> std::io::Result<Option<AudioChunk>> {
    let mut buf = Vec::with_capacity(size);
    (&mut *file).take(size as u64).read_to_end(&mut buf).await?;
    if buf.is_empty() {
        Ok(None)
    } else {
        Ok(Some(AudioChunk::from(buf)))
    }
}
