//! Bridges rig's `CompletionModel` to our `LlmProvider` trait.

use async_trait::async_trait;
use rig::completion::{AssistantContent, CompletionError, CompletionModel, Message};

use crate::error::LlmError;
use crate::llm::provider::{
    ChatMessage, CompletionRequest, CompletionResponse, FinishReason, LlmProvider, Role,
};

const PROVIDER: &str = "anthropic";

/// Anthropic requires `max_tokens` on every request.
const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Wraps any rig completion model as an `LlmProvider`.
pub struct RigAdapter<M> {
    model: M,
    model_name: String,
}

impl<M: CompletionModel> RigAdapter<M> {
    pub fn new(model: M, model_name: impl Into<String>) -> Self {
        Self {
            model,
            model_name: model_name.into(),
        }
    }
}

#[async_trait]
impl<M> LlmProvider for RigAdapter<M>
where
    M: CompletionModel + Send + Sync + 'static,
{
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let split = split_messages(&request.messages)?;

        let mut builder = self
            .model
            .completion_request(split.prompt)
            .messages(split.history)
            .max_tokens(u64::from(request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)));
        if let Some(preamble) = split.preamble {
            builder = builder.preamble(preamble);
        }
        if let Some(temperature) = request.temperature {
            builder = builder.temperature(f64::from(temperature));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| map_completion_error(e, &self.model_name))?;

        let content = response
            .choice
            .iter()
            .filter_map(|c| match c {
                AssistantContent::Text(text) => Some(text.text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("");
        if content.trim().is_empty() {
            return Err(LlmError::InvalidResponse {
                provider: PROVIDER.to_string(),
                reason: "response contained no text".to_string(),
            });
        }

        Ok(CompletionResponse {
            content,
            input_tokens: saturate(response.usage.input_tokens),
            output_tokens: saturate(response.usage.output_tokens),
            finish_reason: FinishReason::Stop,
            response_id: None,
        })
    }
}

fn saturate(tokens: u64) -> u32 {
    u32::try_from(tokens).unwrap_or(u32::MAX)
}

/// Our flat chat transcript reshaped into rig's request parts.
#[derive(Debug)]
struct SplitMessages {
    preamble: Option<String>,
    history: Vec<Message>,
    prompt: Message,
}

/// System messages become the preamble, the final user message the prompt,
/// and everything between the history.
fn split_messages(messages: &[ChatMessage]) -> Result<SplitMessages, LlmError> {
    let (last, earlier) = match messages.split_last() {
        Some((last, earlier)) if last.role == Role::User => (last, earlier),
        _ => {
            return Err(LlmError::RequestFailed {
                provider: PROVIDER.to_string(),
                reason: "request must end with a user message".to_string(),
            });
        }
    };

    let system: Vec<&str> = earlier
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect();
    let history = earlier
        .iter()
        .filter_map(|m| match m.role {
            Role::System => None,
            Role::User => Some(Message::user(m.content.clone())),
            Role::Assistant => Some(Message::assistant(m.content.clone())),
        })
        .collect();

    Ok(SplitMessages {
        preamble: (!system.is_empty()).then(|| system.join("\n\n")),
        history,
        prompt: Message::user(last.content.clone()),
    })
}

/// Sort rig's errors into our retryable and fatal classes.
fn map_completion_error(error: CompletionError, model: &str) -> LlmError {
    match error {
        CompletionError::ProviderError(message) => classify_provider_error(&message, model),
        CompletionError::ResponseError(reason) => LlmError::InvalidResponse {
            provider: PROVIDER.to_string(),
            reason,
        },
        CompletionError::JsonError(e) => LlmError::Json(e),
        other => LlmError::RequestFailed {
            provider: PROVIDER.to_string(),
            reason: other.to_string(),
        },
    }
}

/// Anthropic reports failures as `{"type": "error", "error": {"type": ...}}`;
/// rig hands us that body as text.
fn classify_provider_error(message: &str, model: &str) -> LlmError {
    let lower = message.to_lowercase();
    let provider = PROVIDER.to_string();

    if lower.contains("prompt is too long") || lower.contains("request_too_large") {
        LlmError::ContextLengthExceeded {
            reason: message.to_string(),
        }
    } else if lower.contains("rate_limit") || lower.contains("overloaded") {
        LlmError::RateLimited {
            provider,
            retry_after: None,
        }
    } else if lower.contains("authentication_error")
        || lower.contains("permission_error")
        || lower.contains("x-api-key")
    {
        LlmError::AuthFailed { provider }
    } else if lower.contains("not_found_error") {
        LlmError::ModelNotAvailable {
            provider,
            model: model.to_string(),
        }
    } else if lower.contains("invalid_request_error") {
        LlmError::Rejected {
            provider,
            reason: message.to_string(),
        }
    } else {
        LlmError::RequestFailed {
            provider,
            reason: message.to_string(),
        }
    }
}
