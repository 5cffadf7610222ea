use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::voices::{parse_voice_listing, Voice};
use crate::{SynthesisError, SynthesisRequest};

/// External speech synthesizer. Treated as a black box that renders one
/// request into a complete audio file.
#[async_trait]
pub trait SpeechEngine: Send + Sync {
    /// Render `request` into `out`. The file at `out` already exists and is empty.
    async fn synthesize(&self, request: &SynthesisRequest, out: &Path) -> Result<(), SynthesisError>;

    async fn list_voices(&self) -> Result<Vec<Voice>, SynthesisError>;

    fn media_type(&self) -> &'static str {
        "audio/mpeg"
    }

    fn file_suffix(&self) -> &'static str {
        ".mp3"
    }
}

/// Drives the `edge-tts` command line tool.
#[derive(Debug, Clone)]
pub struct EdgeTtsEngine {
    program: String,
    leading_args: Vec<String>,
}

impl Default for EdgeTtsEngine {
    fn default() -> Self {
        Self::new("edge-tts")
    }
}

impl EdgeTtsEngine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
        }
    }

    /// Program plus fixed arguments, e.g. `python3 -m edge_tts`.
    pub fn with_args(program: impl Into<String>, leading_args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            leading_args,
        }
    }

    /// Split a whitespace separated command line. `None` when blank.
    pub fn from_command_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self::with_args(program, parts.collect()))
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.leading_args)
            .stdin(Stdio::null())
            // a dropped synthesis future must not leave the child running
            .kill_on_drop(true);
        cmd
    }

    fn spawn_error(&self, e: std::io::Error) -> SynthesisError {
        SynthesisError::EngineUnavailable(format!("{}: {e}", self.program))
    }
}

#[async_trait]
impl SpeechEngine for EdgeTtsEngine {
    async fn synthesize(&self, request: &SynthesisRequest, out: &Path) -> Result<(), SynthesisError> {
        validate_request(request)?;

        debug!(
            voice = %request.voice,
            rate = %request.rate,
            volume = %request.volume,
            text_len = request.text.len(),
            "running edge-tts"
        );

        // the text goes over stdin: argv is capped per argument, stdin is not
        let mut child = self
            .command()
            .arg("--file=-")
            .arg(format!("--voice={}", request.voice))
            .arg(format!("--rate={}", request.rate))
            .arg(format!("--volume={}", request.volume))
            .arg("--write-media")
            .arg(out)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| SynthesisError::EngineUnavailable(format!("{}: no stdin", self.program)))?;
        let text = request.text.as_bytes();
        // `stdin` drops at the end of the block, which closes the pipe
        let feed = async move {
            stdin.write_all(text).await?;
            stdin.flush().await
        };
        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        let output = output?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(status = %output.status, %stderr, "edge-tts failed");
            return Err(SynthesisError::EngineFailed {
                status: output.status.to_string(),
                stderr,
            });
        }
        if let Err(e) = fed {
            warn!(error = %e, "edge-tts exited before reading the whole text");
            return Err(SynthesisError::Io(e));
        }
        Ok(())
    }

    async fn list_voices(&self) -> Result<Vec<Voice>, SynthesisError> {
        let output = self
            .command()
            .arg("--list-voices")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| self.spawn_error(e))?;

        if !output.status.success() {
            return Err(SynthesisError::EngineFailed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(parse_voice_listing(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Reject parameters edge-tts would refuse, before paying for a process spawn.
fn validate_request(request: &SynthesisRequest) -> Result<(), SynthesisError> {
    if request.text.trim().is_empty() {
        return Err(SynthesisError::InvalidParameter {
            field: "text",
            value: request.text.clone(),
        });
    }
    if request.voice.is_empty() || request.voice.chars().any(char::is_whitespace) {
        return Err(SynthesisError::InvalidParameter {
            field: "voice",
            value: request.voice.clone(),
        });
    }
    for (field, value) in [("rate", &request.rate), ("volume", &request.volume)] {
        if !is_signed_percent(value) {
            return Err(SynthesisError::InvalidParameter {
                field,
                value: value.clone(),
            });
        }
    }
    Ok(())
}

/// `+0%`, `-25%`, ...
pub(crate) fn is_signed_percent(value: &str) -> bool {
    let Some(rest) = value.strip_prefix('+').or_else(|| value.strip_prefix('-')) else {
        return false;
    };
    let Some(digits) = rest.strip_suffix('%') else {
        return false;
    };
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}
