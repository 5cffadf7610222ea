use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use llm_core::LlmError;
use serde::Serialize;
use thiserror::Error;
use tts_core::SynthesisError;

/// API Error types
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("TTS error: {0}")]
    TtsError(#[from] SynthesisError),

    #[error(transparent)]
    Upstream(#[from] LlmError),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal server error: {0}")]
    InternalError(String),
}

/// Error response structure
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: u16,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            ApiError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::TtsError(e) => {
                tracing::error!("TTS error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Failed to generate speech: {}", e),
                )
            }
            ApiError::Upstream(e) => upstream_status(e),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = Json(ErrorResponse {
            error: error_message,
            code: status.as_u16(),
        });

        (status, body).into_response()
    }
}

fn upstream_status(e: LlmError) -> (StatusCode, String) {
    match e {
        LlmError::Timeout => {
            tracing::error!("Request to Ollama timed out");
            (
                StatusCode::GATEWAY_TIMEOUT,
                "Request to Ollama service timed out".to_string(),
            )
        }
        LlmError::Unavailable(detail) => {
            tracing::error!("Failed to connect to Ollama: {}", detail);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "Failed to connect to Ollama service".to_string(),
            )
        }
        LlmError::Status { status, body } => {
            tracing::error!("Ollama API error {}: {}", status, body);
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
            (status, format!("Ollama API error: {}", body))
        }
        other => {
            tracing::error!("Inference error: {}", other);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "An error occurred while processing your request".to_string(),
            )
        }
    }
}

/// Failure classes on a voice session. Each one has its own recovery policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Not valid structured data. Reported, loop continues.
    MalformedMessage,
    /// Empty text. Ignored without a notification.
    EmptyRequest,
    /// Engine failure for one request. Reported, other work continues.
    SynthesisError,
    /// A write to the transport failed. The session is torn down.
    TransportWriteFailure,
    /// Anything else in the message loop. Reported, loop continues.
    #[serde(rename = "internal_error")]
    UnexpectedInternalError,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{0}")]
    MalformedMessage(String),

    #[error("empty synthesis request")]
    EmptyRequest,

    #[error("TTS Error: {0}")]
    Synthesis(#[from] SynthesisError),

    #[error("transport write failed: {0}")]
    TransportWrite(String),

    #[error("session is closed")]
    Closed,

    #[error("Server error: {0}")]
    Internal(String),
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::MalformedMessage(_) => ErrorKind::MalformedMessage,
            SessionError::EmptyRequest => ErrorKind::EmptyRequest,
            SessionError::Synthesis(_) => ErrorKind::SynthesisError,
            SessionError::TransportWrite(_) | SessionError::Closed => ErrorKind::TransportWriteFailure,
            SessionError::Internal(_) => ErrorKind::UnexpectedInternalError,
        }
    }

    /// Whether the session can keep running after this error.
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::TransportWriteFailure
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn render(err: ApiError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_upstream_errors_map_to_gateway_statuses() {
        let (status, body) = render(ApiError::Upstream(LlmError::Timeout)).await;
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(body["code"], 504);

        let (status, _) = render(ApiError::Upstream(LlmError::Unavailable("refused".into()))).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let (status, body) = render(ApiError::Upstream(LlmError::Status {
            status: 404,
            body: "model 'x' not found".into(),
        }))
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn test_tts_error_is_500() {
        let (status, body) = render(ApiError::TtsError(SynthesisError::EmptyOutput)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"]
            .as_str()
            .unwrap()
            .starts_with("Failed to generate speech"));
    }

    #[test]
    fn test_session_error_kinds() {
        assert!(SessionError::TransportWrite("reset".into()).is_fatal());
        assert!(SessionError::Closed.is_fatal());
        assert!(!SessionError::MalformedMessage("bad".into()).is_fatal());
        assert!(!SessionError::Synthesis(SynthesisError::EmptyOutput).is_fatal());
        assert_eq!(
            SessionError::Internal("boom".into()).kind(),
            ErrorKind::UnexpectedInternalError
        );
        assert_eq!(
            serde_json::to_value(ErrorKind::UnexpectedInternalError).unwrap(),
            "internal_error"
        );
        assert_eq!(
            serde_json::to_value(ErrorKind::MalformedMessage).unwrap(),
            "malformed_message"
        );
    }
}
