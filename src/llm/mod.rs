//! LLM integration.
//!
//! Steps reach the model through the `LlmProvider` trait. Anthropic is
//! reached via rig-core; `RigAdapter` bridges rig's `CompletionModel` to
//! `LlmProvider` and `RetryProvider` absorbs call-level transient failures.

pub mod provider;
pub mod retry;
mod rig_adapter;

pub use provider::*;
pub use retry::RetryProvider;
pub use rig_adapter::RigAdapter;

use std::sync::Arc;
use std::time::Duration;

use rig::client::CompletionClient;
use secrecy::ExposeSecret;

use crate::config::env_parse;
use crate::error::{ConfigError, LlmError};

/// Configuration for creating an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: secrecy::SecretString,
    pub model: String,
    /// Timeout applied to each model call by the step executor.
    pub call_timeout: Duration,
    /// Call-level retries for transient provider errors.
    pub max_retries: u32,
}

impl LlmConfig {
    /// Build config from environment variables. `ANTHROPIC_API_KEY` is required.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| ConfigError::MissingEnvVar("ANTHROPIC_API_KEY".to_string()))?;

        Ok(Self {
            api_key: secrecy::SecretString::from(api_key),
            model: std::env::var("WARRANTY_MODEL")
                .unwrap_or_else(|_| "claude-sonnet-4-20250514".to_string()),
            call_timeout: env_parse::<u64>("WARRANTY_LLM_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(Duration::from_secs(20)),
            max_retries: env_parse("WARRANTY_LLM_RETRIES").unwrap_or(2),
        })
    }
}

/// Create an LLM provider from configuration.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    let base = create_anthropic_provider(config)?;
    if config.max_retries == 0 {
        Ok(base)
    } else {
        Ok(Arc::new(RetryProvider::new(base, config.max_retries)))
    }
}

fn create_anthropic_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    use rig::providers::anthropic;

    let client: rig::client::Client<anthropic::client::AnthropicExt> =
        anthropic::Client::new(config.api_key.expose_secret()).map_err(|e| {
            LlmError::RequestFailed {
                provider: "anthropic".to_string(),
                reason: format!("Failed to create Anthropic client: {}", e),
            }
        })?;
    let model = client.completion_model(&config.model);
    tracing::info!("Using Anthropic (model: {})", config.model);
    Ok(Arc::new(RigAdapter::new(model, &config.model)))
}
