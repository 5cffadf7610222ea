//! Text-to-speech plumbing for the voice relay.
//!
//! The relay never decodes audio. A [`SpeechEngine`] renders one request to a
//! scratch file and a [`ChunkProducer`] turns that file into an ordered,
//! lazily produced stream of opaque [`AudioChunk`]s.

mod engine;
mod stream;
mod voices;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use engine::{EdgeTtsEngine, SpeechEngine};
pub use stream::{AudioStream, ChunkProducer, EngineChunkProducer, DEFAULT_CHUNK_SIZE};
pub use voices::{filter_by_locale, parse_voice_listing, Voice};

pub const DEFAULT_VOICE: &str = "en-US-AriaNeural";
pub const DEFAULT_RATE: &str = "+0%";
pub const DEFAULT_VOLUME: &str = "+0%";

/// Voice parameters applied when a request does not override them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceSettings {
    pub voice: String,
    pub rate: String,
    pub volume: String,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            voice: DEFAULT_VOICE.to_string(),
            rate: DEFAULT_RATE.to_string(),
            volume: DEFAULT_VOLUME.to_string(),
        }
    }
}

/// One utterance to synthesize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisRequest {
    pub text: String,
    pub voice: String,
    /// Signed percentage, e.g. `+0%` or `-10%`.
    pub rate: String,
    /// Signed percentage, e.g. `+0%` or `+20%`.
    pub volume: String,
}

impl SynthesisRequest {
    pub fn new(text: impl Into<String>, settings: &VoiceSettings) -> Self {
        Self {
            text: text.into(),
            voice: settings.voice.clone(),
            rate: settings.rate.clone(),
            volume: settings.volume.clone(),
        }
    }

    /// Replace the defaults with whichever overrides are present.
    pub fn with_overrides(
        mut self,
        voice: Option<String>,
        rate: Option<String>,
        volume: Option<String>,
    ) -> Self {
        if let Some(voice) = voice {
            self.voice = voice;
        }
        if let Some(rate) = rate {
            self.rate = rate;
        }
        if let Some(volume) = volume {
            self.volume = volume;
        }
        self
    }
}

/// A piece of synthesized audio. Only its position in the stream matters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk(Vec<u8>);

impl AudioChunk {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for AudioChunk {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

/// Synthesis failures
#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("invalid {field}: {value:?}")]
    InvalidParameter { field: &'static str, value: String },

    #[error("speech engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("speech engine failed ({status}): {stderr}")]
    EngineFailed { status: String, stderr: String },

    #[error("speech engine produced no audio")]
    EmptyOutput,

    #[error("audio I/O error: {0}")]
    Io(#[from] std::io::Error),
}
