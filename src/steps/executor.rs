//! Step execution: one instruction-driven LLM call per step.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{InstructionError, LlmError, ToolError};
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};
use crate::steps::catalog::StepCatalog;
use crate::steps::context::StepContext;
use crate::steps::instructions::InstructionSource;
use crate::steps::prompt::{
    StepReply, build_system_prompt, build_user_prompt, parse_step_reply,
};
use crate::steps::types::{Directive, StepExecutionResult, StepId};
use crate::tools::ToolRegistry;

/// Max tokens for a step reply.
const STEP_MAX_TOKENS: u32 = 1024;

/// Temperature for step calls (deterministic-ish).
const STEP_TEMPERATURE: f32 = 0.1;

/// Why a step could not produce a result.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StepFailure {
    /// Retryable: timeout, rate limit, connection trouble.
    #[error("step {step} failed transiently: {reason}")]
    Transient { step: String, reason: String },

    /// Not retryable: auth, missing or malformed instruction, rejected request.
    #[error("step {step} failed: {reason}")]
    Fatal { step: String, reason: String },

    /// The model's reply could not be turned into a directive.
    #[error("step {step} reply could not be parsed: {reason}")]
    Parse { step: String, reason: String },
}

impl StepFailure {
    pub fn step(&self) -> &str {
        match self {
            Self::Transient { step, .. } | Self::Fatal { step, .. } | Self::Parse { step, .. } => {
                step
            }
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            Self::Transient { reason, .. }
            | Self::Fatal { reason, .. }
            | Self::Parse { reason, .. } => reason,
        }
    }

    fn from_llm(step: &StepId, error: LlmError) -> Self {
        let step = step.to_string();
        let reason = error.to_string();
        match error {
            e if e.is_retryable() => Self::Transient { step, reason },
            LlmError::InvalidResponse { .. } | LlmError::Json(_) => Self::Parse { step, reason },
            _ => Self::Fatal { step, reason },
        }
    }

    fn from_instruction(step: &StepId, error: InstructionError) -> Self {
        Self::Fatal {
            step: step.to_string(),
            reason: error.to_string(),
        }
    }

    fn from_tool(step: &StepId, error: ToolError) -> Self {
        let step = step.to_string();
        let reason = error.to_string();
        match error {
            ToolError::Unavailable { .. } => Self::Transient { step, reason },
            ToolError::NotFound { .. } | ToolError::InvalidParameters { .. } => {
                Self::Parse { step, reason }
            }
            ToolError::ExecutionFailed { .. } => Self::Fatal { step, reason },
        }
    }
}

/// Runs one named step against the current context.
///
/// Implementations surface failures untouched; retry policy lives in the
/// orchestrator.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute(
        &self,
        step: &StepId,
        context: &StepContext,
    ) -> Result<StepExecutionResult, StepFailure>;
}

/// Executor that interprets instruction documents through an LLM.
pub struct LlmStepExecutor {
    llm: Arc<dyn LlmProvider>,
    instructions: Arc<dyn InstructionSource>,
    catalog: Arc<StepCatalog>,
    tools: Arc<ToolRegistry>,
    call_timeout: Duration,
}

impl LlmStepExecutor {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        instructions: Arc<dyn InstructionSource>,
        catalog: Arc<StepCatalog>,
        tools: Arc<ToolRegistry>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            llm,
            instructions,
            catalog,
            tools,
            call_timeout,
        }
    }

    /// Run requested tools in order, layering their output over the reply metadata.
    async fn run_tools(
        &self,
        step: &StepId,
        context: &StepContext,
        reply: &mut StepReply,
    ) -> Result<(), StepFailure> {
        for call in std::mem::take(&mut reply.tool_calls) {
            let tool = self.tools.get(&call.name).await.ok_or_else(|| {
                StepFailure::from_tool(
                    step,
                    ToolError::NotFound {
                        name: call.name.clone(),
                    },
                )
            })?;

            tracing::debug!(step = %step, tool = %call.name, "Running step tool");
            let output = tool
                .execute(&call.arguments, context)
                .await
                .map_err(|e| StepFailure::from_tool(step, e))?;

            for (key, value) in output {
                reply.metadata.insert(key, value);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl StepExecutor for LlmStepExecutor {
    async fn execute(
        &self,
        step: &StepId,
        context: &StepContext,
    ) -> Result<StepExecutionResult, StepFailure> {
        let instruction = self
            .instructions
            .load(step)
            .await
            .map_err(|e| StepFailure::from_instruction(step, e))?;

        let tool_defs = self.tools.tool_definitions().await;
        let system_prompt =
            build_system_prompt(step, &instruction, &self.catalog.names(), &tool_defs);
        let user_prompt = build_user_prompt(context);

        let request = CompletionRequest::new(vec![
            ChatMessage::system(system_prompt),
            ChatMessage::user(user_prompt),
        ])
        .with_temperature(STEP_TEMPERATURE)
        .with_max_tokens(STEP_MAX_TOKENS);

        let response = match tokio::time::timeout(self.call_timeout, self.llm.complete(request))
            .await
        {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(StepFailure::from_llm(step, e)),
            Err(_) => {
                return Err(StepFailure::from_llm(
                    step,
                    LlmError::Timeout {
                        provider: self.llm.model_name().to_string(),
                        timeout: self.call_timeout,
                    },
                ));
            }
        };

        let mut reply = parse_step_reply(&response.content).map_err(|reason| {
            tracing::warn!(
                step = %step,
                raw_response = %response.content,
                error = %reason,
                "Failed to parse step reply"
            );
            StepFailure::Parse {
                step: step.to_string(),
                reason,
            }
        })?;

        let next = Directive::parse(&reply.next_step).ok_or_else(|| StepFailure::Parse {
            step: step.to_string(),
            reason: "reply has no next_step".to_string(),
        })?;

        self.run_tools(step, context, &mut reply).await?;

        tracing::debug!(
            step = %step,
            next = %next,
            metadata_keys = reply.metadata.len(),
            tokens = response.input_tokens + response.output_tokens,
            "Step executed"
        );

        let mut result = StepExecutionResult::new(step.clone(), next).with_response(reply.response);
        result.metadata = reply.metadata;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::llm::{CompletionResponse, FinishReason};
    use crate::steps::instructions::StaticInstructions;
    use crate::steps::context::WarrantyInfo;
    use crate::tools::builtin::{WarrantyLookupTool, WarrantyService};

    /// Mock LLM returning a fixed reply or error, recording prompts.
    struct MockStepLlm {
        reply: Result<String, fn() -> LlmError>,
        delay: Duration,
        prompts: Mutex<Vec<CompletionRequest>>,
    }

    impl MockStepLlm {
        fn replying(reply: &str) -> Self {
            Self {
                reply: Ok(reply.to_string()),
                delay: Duration::ZERO,
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn failing(error: fn() -> LlmError) -> Self {
            Self {
                reply: Err(error),
                delay: Duration::ZERO,
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for MockStepLlm {
        fn model_name(&self) -> &str {
            "mock-step"
        }

        async fn complete(
            &self,
            request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            self.prompts.lock().unwrap().push(request);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match &self.reply {
                Ok(content) => Ok(CompletionResponse {
                    content: content.clone(),
                    input_tokens: 100,
                    output_tokens: 50,
                    finish_reason: FinishReason::Stop,
                    response_id: None,
                }),
                Err(make) => Err(make()),
            }
        }
    }

    struct ActiveWarranty;

    #[async_trait]
    impl WarrantyService for ActiveWarranty {
        async fn check(&self, _serial: &str) -> Result<WarrantyInfo, ToolError> {
            Ok(WarrantyInfo::new("active"))
        }
    }

    struct DownWarranty;

    #[async_trait]
    impl WarrantyService for DownWarranty {
        async fn check(&self, _serial: &str) -> Result<WarrantyInfo, ToolError> {
            Err(ToolError::Unavailable {
                name: "check_warranty".into(),
                reason: "503".into(),
            })
        }
    }

    fn catalog() -> Arc<StepCatalog> {
        Arc::new(StepCatalog::new(["01-extract-serial", "02-check-warranty"]).unwrap())
    }

    fn instructions() -> Arc<dyn InstructionSource> {
        Arc::new(
            StaticInstructions::new()
                .with("01-extract-serial", "Extract the device serial number.")
                .with("02-check-warranty", "Check warranty with the tool."),
        )
    }

    fn executor(llm: Arc<MockStepLlm>, tools: ToolRegistry) -> LlmStepExecutor {
        LlmStepExecutor::new(
            llm,
            instructions(),
            catalog(),
            Arc::new(tools),
            Duration::from_secs(5),
        )
    }

    fn ctx() -> StepContext {
        StepContext::new(
            "Device warranty check",
            "My serial is C074AD3D3102",
            "customer@example.com",
        )
    }

    fn step(name: &str) -> StepId {
        catalog().resolve(name).unwrap()
    }

    #[tokio::test]
    async fn executes_step_and_parses_reply() {
        let llm = Arc::new(MockStepLlm::replying(
            r#"{"next_step": "02-check-warranty", "response": "Serial found", "metadata": {"serial": "C074AD3D3102"}}"#,
        ));
        let exec = executor(llm.clone(), ToolRegistry::new());

        let result = exec.execute(&step("01-extract-serial"), &ctx()).await.unwrap();
        assert_eq!(result.step.as_str(), "01-extract-serial");
        assert_eq!(result.next, Directive::Step("02-check-warranty".into()));
        assert_eq!(result.response_text, "Serial found");
        assert_eq!(result.metadata["serial"], "C074AD3D3102");

        let prompts = llm.prompts.lock().unwrap();
        assert!(prompts[0].messages[0].content.contains("Extract the device serial number."));
        assert!(prompts[0].messages[1].content.contains("customer@example.com"));
    }

    #[tokio::test]
    async fn runs_requested_tools() {
        let llm = Arc::new(MockStepLlm::replying(
            r#"{"next_step": "DONE", "tool_calls": [{"name": "check_warranty", "arguments": {"serial": "C074AD3D3102"}}]}"#,
        ));
        let tools = ToolRegistry::new();
        tools.register(Arc::new(WarrantyLookupTool::new(Arc::new(ActiveWarranty)))).await;
        let exec = executor(llm, tools);

        let result = exec.execute(&step("02-check-warranty"), &ctx()).await.unwrap();
        assert!(result.is_terminal());
        assert_eq!(result.metadata["warranty"]["status"], "active");
        assert_eq!(result.metadata["serial"], "C074AD3D3102");
    }

    #[tokio::test]
    async fn unknown_tool_is_parse_failure() {
        let llm = Arc::new(MockStepLlm::replying(
            r#"{"next_step": "DONE", "tool_calls": [{"name": "format_disk"}]}"#,
        ));
        let exec = executor(llm, ToolRegistry::new());
        let err = exec.execute(&step("02-check-warranty"), &ctx()).await.unwrap_err();
        assert!(matches!(err, StepFailure::Parse { .. }));
    }

    #[tokio::test]
    async fn unavailable_tool_backend_is_transient() {
        let llm = Arc::new(MockStepLlm::replying(
            r#"{"next_step": "DONE", "tool_calls": [{"name": "check_warranty", "arguments": {"serial": "C074AD3D3102"}}]}"#,
        ));
        let tools = ToolRegistry::new();
        tools.register(Arc::new(WarrantyLookupTool::new(Arc::new(DownWarranty)))).await;
        let exec = executor(llm, tools);
        let err = exec.execute(&step("02-check-warranty"), &ctx()).await.unwrap_err();
        assert!(matches!(err, StepFailure::Transient { .. }));
    }

    #[tokio::test]
    async fn unparsable_reply_is_parse_failure() {
        let llm = Arc::new(MockStepLlm::replying("Let's check the warranty next!"));
        let exec = executor(llm, ToolRegistry::new());
        let err = exec.execute(&step("01-extract-serial"), &ctx()).await.unwrap_err();
        assert!(matches!(err, StepFailure::Parse { .. }));
        assert_eq!(err.step(), "01-extract-serial");
    }

    #[tokio::test]
    async fn llm_errors_are_classified() {
        let rate_limited = Arc::new(MockStepLlm::failing(|| LlmError::RateLimited {
            provider: "mock".into(),
            retry_after: None,
        }));
        let err = executor(rate_limited, ToolRegistry::new())
            .execute(&step("01-extract-serial"), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, StepFailure::Transient { .. }));

        let auth = Arc::new(MockStepLlm::failing(|| LlmError::AuthFailed {
            provider: "mock".into(),
        }));
        let err = executor(auth, ToolRegistry::new())
            .execute(&step("01-extract-serial"), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, StepFailure::Fatal { .. }));
    }

    #[tokio::test]
    async fn missing_instruction_is_fatal() {
        let catalog = Arc::new(StepCatalog::new(["01-extract-serial", "09-orphan"]).unwrap());
        let exec = LlmStepExecutor::new(
            Arc::new(MockStepLlm::replying(r#"{"next_step": "DONE"}"#)),
            instructions(),
            catalog.clone(),
            Arc::new(ToolRegistry::new()),
            Duration::from_secs(5),
        );
        let err = exec
            .execute(&catalog.resolve("09-orphan").unwrap(), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, StepFailure::Fatal { .. }));
    }

    #[tokio::test]
    async fn slow_call_times_out_as_transient() {
        let llm = Arc::new(MockStepLlm {
            reply: Ok(r#"{"next_step": "DONE"}"#.into()),
            delay: Duration::from_secs(5),
            prompts: Mutex::new(Vec::new()),
        });
        let exec = LlmStepExecutor::new(
            llm,
            instructions(),
            catalog(),
            Arc::new(ToolRegistry::new()),
            Duration::from_millis(20),
        );
        let err = exec.execute(&step("01-extract-serial"), &ctx()).await.unwrap_err();
        assert!(matches!(err, StepFailure::Transient { .. }));
    }
}
