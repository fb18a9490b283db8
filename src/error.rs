//! Error types for the warranty agent.

use std::time::Duration;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Email transport errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Failed to fetch inbound mail on channel {name}: {reason}")]
    FetchFailed { name: String, reason: String },

    #[error("Failed to send message on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} timed out after {timeout:?}")]
    Timeout { provider: String, timeout: Duration },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Context length exceeded: {reason}")]
    ContextLengthExceeded { reason: String },

    #[error("Model {model} not available on provider {provider}")]
    ModelNotAvailable { provider: String, model: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Provider {provider} rejected the request: {reason}")]
    Rejected { provider: String, reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LlmError {
    /// Whether retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RequestFailed { .. } | Self::Timeout { .. } | Self::RateLimited { .. }
        )
    }
}

/// Step tool errors.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Tool {name} not found")]
    NotFound { name: String },

    #[error("Invalid parameters for tool {name}: {reason}")]
    InvalidParameters { name: String, reason: String },

    #[error("Tool {name} backend unavailable: {reason}")]
    Unavailable { name: String, reason: String },

    #[error("Tool {name} execution failed: {reason}")]
    ExecutionFailed { name: String, reason: String },
}

/// Instruction document resolution errors.
#[derive(Debug, thiserror::Error)]
pub enum InstructionError {
    #[error("No instruction document for step {step}")]
    NotFound { step: String },

    #[error("Instruction document for step {step} is malformed: {reason}")]
    Malformed { step: String, reason: String },

    #[error("IO error reading instructions: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_llm_errors() {
        assert!(
            LlmError::RateLimited {
                provider: "anthropic".into(),
                retry_after: None
            }
            .is_retryable()
        );
        assert!(
            LlmError::Timeout {
                provider: "anthropic".into(),
                timeout: Duration::from_secs(5)
            }
            .is_retryable()
        );
        assert!(
            !LlmError::AuthFailed {
                provider: "anthropic".into()
            }
            .is_retryable()
        );
        assert!(
            !LlmError::InvalidResponse {
                provider: "anthropic".into(),
                reason: "empty".into()
            }
            .is_retryable()
        );
    }
}
