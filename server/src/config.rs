// Server configuration, read from the environment

use std::str::FromStr;
use std::time::Duration;

use tts_core::{VoiceSettings, DEFAULT_CHUNK_SIZE, DEFAULT_RATE, DEFAULT_VOICE, DEFAULT_VOLUME};

use crate::session::SessionSettings;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub ollama_base_url: String,
    pub ollama_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub cors_allowed_origins: Option<Vec<String>>,
    /// Speech command line, e.g. `edge-tts` or `python -m edge_tts`.
    pub tts_command: String,
    pub tts_default_voice: String,
    pub tts_default_rate: String,
    pub tts_default_volume: String,
    pub tts_chunk_size: usize,
    pub ws_write_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            ollama_base_url: "http://localhost:11434".to_string(),
            ollama_timeout_secs: 300,
            request_timeout_secs: 300,
            cors_allowed_origins: None,
            tts_command: "edge-tts".to_string(),
            tts_default_voice: DEFAULT_VOICE.to_string(),
            tts_default_rate: DEFAULT_RATE.to_string(),
            tts_default_volume: DEFAULT_VOLUME.to_string(),
            tts_chunk_size: DEFAULT_CHUNK_SIZE,
            ws_write_timeout_secs: 10,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Missing or unparsable values fall
    /// back to the defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let string = |key: &str, default: String| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or(default)
        };

        let cors_allowed_origins = lookup("CORS_ALLOWED_ORIGINS").map(|origins| {
            origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        });

        Self {
            host: string("HOST", defaults.host),
            port: parsed(&lookup, "PORT", defaults.port),
            ollama_base_url: string("OLLAMA_BASE_URL", defaults.ollama_base_url),
            ollama_timeout_secs: parsed(&lookup, "OLLAMA_TIMEOUT_SECS", defaults.ollama_timeout_secs),
            request_timeout_secs: parsed(&lookup, "REQUEST_TIMEOUT_SECS", defaults.request_timeout_secs),
            cors_allowed_origins,
            tts_command: string("TTS_COMMAND", defaults.tts_command),
            tts_default_voice: string("TTS_DEFAULT_VOICE", defaults.tts_default_voice),
            tts_default_rate: string("TTS_DEFAULT_RATE", defaults.tts_default_rate),
            tts_default_volume: string("TTS_DEFAULT_VOLUME", defaults.tts_default_volume),
            tts_chunk_size: parsed(&lookup, "TTS_CHUNK_SIZE", defaults.tts_chunk_size).max(1),
            ws_write_timeout_secs: parsed(&lookup, "WS_WRITE_TIMEOUT_SECS", defaults.ws_write_timeout_secs),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.ollama_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.ws_write_timeout_secs)
    }

    pub fn voice_settings(&self) -> VoiceSettings {
        VoiceSettings {
            voice: self.tts_default_voice.clone(),
            rate: self.tts_default_rate.clone(),
            volume: self.tts_default_volume.clone(),
        }
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            voice: self.voice_settings(),
            write_timeout: self.write_timeout(),
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parsed<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> ServerConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]);
        assert_eq!(config.bind_address(), "0.0.0.0:8000");
        assert_eq!(config.ollama_base_url, "http://localhost:11434");
        assert_eq!(config.llm_timeout(), Duration::from_secs(300));
        assert_eq!(config.request_timeout(), Duration::from_secs(300));
        assert_eq!(config.tts_command, "edge-tts");
        assert_eq!(config.tts_chunk_size, 4096);
        assert_eq!(config.write_timeout(), Duration::from_secs(10));
        assert_eq!(config.voice_settings(), VoiceSettings::default());
        assert!(config.cors_allowed_origins.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("HOST", "127.0.0.1"),
            ("PORT", "9100"),
            ("OLLAMA_BASE_URL", "http://ollama:11434"),
            ("TTS_COMMAND", "python -m edge_tts"),
            ("TTS_DEFAULT_VOICE", "de-DE-KatjaNeural"),
            ("TTS_CHUNK_SIZE", "1024"),
            ("WS_WRITE_TIMEOUT_SECS", "3"),
            ("CORS_ALLOWED_ORIGINS", "http://localhost:3000, https://app.example.com,"),
        ]);
        assert_eq!(config.bind_address(), "127.0.0.1:9100");
        assert_eq!(config.ollama_base_url, "http://ollama:11434");
        assert_eq!(config.tts_command, "python -m edge_tts");
        assert_eq!(config.session_settings().voice.voice, "de-DE-KatjaNeural");
        assert_eq!(config.tts_chunk_size, 1024);
        assert_eq!(config.session_settings().write_timeout, Duration::from_secs(3));
        assert_eq!(
            config.cors_allowed_origins.unwrap(),
            vec!["http://localhost:3000", "https://app.example.com"]
        );
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = config_from(&[("PORT", "not-a-port"), ("TTS_CHUNK_SIZE", "0"), ("HOST", "  ")]);
        assert_eq!(config.port, 8000);
        assert_eq!(config.tts_chunk_size, 1);
        assert_eq!(config.host, "0.0.0.0");
    }
}
