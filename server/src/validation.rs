use llm_core::InferenceRequest;

use crate::error::ApiError;

/// Maximum text length for TTS requests, in characters
pub const MAX_TEXT_LENGTH: usize = 5000;

const VALID_ROLES: [&str; 3] = ["user", "assistant", "system"];

/// Which inference endpoint a request is headed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Chat,
    Generate,
}

/// Validate TTS request text
pub fn validate_tts_request(text: &str) -> Result<(), ApiError> {
    if text.trim().is_empty() {
        return Err(ApiError::InvalidInput("Text cannot be empty".to_string()));
    }
    if text.chars().count() > MAX_TEXT_LENGTH {
        return Err(ApiError::InvalidInput(format!(
            "Text too long (max {} characters)",
            MAX_TEXT_LENGTH
        )));
    }
    Ok(())
}

/// Validate a chat or generate request before it is proxied
pub fn validate_inference_request(
    request: &InferenceRequest,
    endpoint: Endpoint,
) -> Result<(), ApiError> {
    if request.model.trim().is_empty() {
        return Err(ApiError::InvalidInput("Model cannot be empty".to_string()));
    }

    match endpoint {
        Endpoint::Chat if request.messages.is_empty() => {
            return Err(ApiError::InvalidInput(
                "Messages cannot be empty".to_string(),
            ));
        }
        Endpoint::Generate
            if request.messages.is_empty()
                && request.prompt.as_deref().map_or(true, |p| p.trim().is_empty()) =>
        {
            return Err(ApiError::InvalidInput(
                "Either prompt or messages must be provided".to_string(),
            ));
        }
        _ => {}
    }

    for message in &request.messages {
        if !VALID_ROLES.contains(&message.role.as_str()) {
            return Err(ApiError::InvalidInput(format!(
                "Invalid role: {}. Expected one of: user, assistant, system",
                message.role
            )));
        }
    }

    if let Some(temperature) = request.temperature {
        if !(0.0..=2.0).contains(&temperature) {
            return Err(ApiError::InvalidInput(format!(
                "Temperature must be between 0.0 and 2.0, got {}",
                temperature
            )));
        }
    }

    if request.max_tokens == Some(0) {
        return Err(ApiError::InvalidInput(
            "max_tokens must be at least 1".to_string(),
        ));
    }

    Ok(())
}
