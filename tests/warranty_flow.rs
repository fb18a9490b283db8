//! End-to-end tests for the warranty email flow.
//!
//! A stub LLM answers per step; everything else (executor, tools, router,
//! orchestrator, processor, spool mailbox) is the real implementation.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use warranty_agent::channels::{EmailConfig, SpoolMailbox};
use warranty_agent::config::OrchestratorConfig;
use warranty_agent::error::{LlmError, ToolError};
use warranty_agent::llm::{CompletionRequest, CompletionResponse, FinishReason, LlmProvider};
use warranty_agent::pipeline::EmailProcessor;
use warranty_agent::steps::{
    LlmStepExecutor, OrchestratorState, StaticInstructions, StepCatalog, StepContext,
    StepOrchestrator, WarrantyInfo,
};
use warranty_agent::tools::ToolRegistry;
use warranty_agent::tools::builtin::{
    CreateTicketTool, TicketRequest, TicketService, WarrantyLookupTool, WarrantyService,
};

const STEPS: [&str; 4] = [
    "01-extract-serial",
    "02-check-warranty",
    "03-create-ticket",
    "04-compose-reply",
];

const EMAIL: &str = "From: Jane Doe <jane@example.com>\r\n\
To: support@example.com\r\n\
Subject: Device warranty check\r\n\
Message-ID: <inbound-1@example.com>\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
Hello, my laptop (serial C074AD3D3102) will not power on.\r\n";

/// Stub LLM: answers with the reply scripted for the step named in the system prompt.
struct StubLlm {
    replies: HashMap<&'static str, &'static str>,
    user_prompts: Mutex<Vec<(String, String)>>,
}

impl StubLlm {
    fn new(replies: &[(&'static str, &'static str)]) -> Arc<Self> {
        Arc::new(Self {
            replies: replies.iter().copied().collect(),
            user_prompts: Mutex::new(Vec::new()),
        })
    }

    fn prompt_for(&self, step: &str) -> Option<String> {
        self.user_prompts
            .lock()
            .unwrap()
            .iter()
            .find(|(s, _)| s == step)
            .map(|(_, p)| p.clone())
    }
}

#[async_trait]
impl LlmProvider for StubLlm {
    fn model_name(&self) -> &str {
        "stub"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let system = &request.messages[0].content;
        let step = system
            .lines()
            .find_map(|l| l.strip_prefix("Current step: "))
            .unwrap_or_default()
            .to_string();
        self.user_prompts
            .lock()
            .unwrap()
            .push((step.clone(), request.messages[1].content.clone()));

        let content = self
            .replies
            .get(step.as_str())
            .copied()
            .ok_or_else(|| LlmError::InvalidResponse {
                provider: "stub".into(),
                reason: format!("no scripted reply for {step}"),
            })?;

        Ok(CompletionResponse {
            content: content.to_string(),
            input_tokens: 10,
            output_tokens: 10,
            finish_reason: FinishReason::Stop,
            response_id: None,
        })
    }
}

struct ActiveWarranty;

#[async_trait]
impl WarrantyService for ActiveWarranty {
    async fn check(&self, serial: &str) -> Result<WarrantyInfo, ToolError> {
        assert_eq!(serial, "C074AD3D3102");
        let mut info = WarrantyInfo::new("active");
        info.expiration = Some("2027-03-01".into());
        Ok(info)
    }
}

#[derive(Default)]
struct RecordingTickets {
    created: Mutex<Vec<TicketRequest>>,
}

#[async_trait]
impl TicketService for RecordingTickets {
    async fn create(&self, request: &TicketRequest) -> Result<String, ToolError> {
        self.created.lock().unwrap().push(request.clone());
        Ok("TCK-1001".into())
    }
}

struct Harness {
    llm: Arc<StubLlm>,
    tickets: Arc<RecordingTickets>,
    processor: EmailProcessor,
}

async fn harness(spool: &Path, replies: &[(&'static str, &'static str)]) -> Harness {
    let llm = StubLlm::new(replies);
    let tickets = Arc::new(RecordingTickets::default());

    let catalog = Arc::new(StepCatalog::new(STEPS).unwrap());
    let instructions = STEPS.iter().fold(StaticInstructions::new(), |acc, step| {
        acc.with(*step, format!("Instruction for {step}."))
    });

    let tools = Arc::new(ToolRegistry::new());
    tools
        .register(Arc::new(WarrantyLookupTool::new(Arc::new(ActiveWarranty))))
        .await;
    tools
        .register(Arc::new(CreateTicketTool::new(tickets.clone())))
        .await;

    let executor = Arc::new(LlmStepExecutor::new(
        llm.clone(),
        Arc::new(instructions),
        Arc::clone(&catalog),
        tools,
        Duration::from_secs(5),
    ));
    let config = OrchestratorConfig {
        retry_backoff: Duration::ZERO,
        ..OrchestratorConfig::default()
    };
    let orchestrator = Arc::new(StepOrchestrator::new(executor, catalog, config));

    let transport = Arc::new(SpoolMailbox::new(EmailConfig::new(
        spool,
        "support@example.com",
    )));
    let processor = EmailProcessor::new(orchestrator, transport).unwrap();

    Harness {
        llm,
        tickets,
        processor,
    }
}

fn outbox_files(spool: &Path) -> Vec<String> {
    match std::fs::read_dir(spool.join("outbox")) {
        Ok(entries) => entries
            .map(|e| std::fs::read_to_string(e.unwrap().path()).unwrap())
            .collect(),
        Err(_) => Vec::new(),
    }
}

const HAPPY_PATH: &[(&str, &str)] = &[
    (
        "01-extract-serial",
        r#"{"next_step": "02-check-warranty", "response": "Found serial", "metadata": {"serial": "C074AD3D3102"}}"#,
    ),
    (
        "02-check-warranty",
        r#"```json
{"next_step": "03-create-ticket", "response": "Checked", "tool_calls": [{"name": "check_warranty", "arguments": {}}]}
```"#,
    ),
    (
        "03-create-ticket",
        r#"{"next_step": "04-compose-reply", "response": "Ticket opened", "tool_calls": [{"name": "create_ticket", "arguments": {"priority": "high"}}]}"#,
    ),
    (
        "04-compose-reply",
        r#"{"next_step": "DONE", "response": "Email sent successfully", "metadata": {"reply_subject": "Your warranty claim", "reply_body": "Your laptop is covered until 2027-03-01. Ticket TCK-1001 is open."}}"#,
    ),
];

#[tokio::test]
async fn full_flow_replies_once_with_everything_learned() {
    let spool = tempfile::tempdir().unwrap();
    let h = harness(spool.path(), HAPPY_PATH).await;

    let result = h.processor.process_raw(EMAIL.as_bytes()).await;

    assert!(result.success, "unexpected failure: {:?}", result.error);
    assert_eq!(result.final_state, Some(OrchestratorState::Done));
    assert_eq!(result.scenario_used.as_deref(), Some("04-compose-reply"));
    assert_eq!(result.serial_number.as_deref(), Some("C074AD3D3102"));
    assert_eq!(result.response_text.as_deref(), Some("Email sent successfully"));
    assert_eq!(result.steps_executed, 4);
    assert!(result.reply_sent);

    // The serial extracted by step 1 is visible to step 2.
    let prompt = h.llm.prompt_for("02-check-warranty").unwrap();
    assert!(prompt.contains("serial_number: C074AD3D3102"));

    // The ticket carried the warranty status looked up in step 2.
    let created = h.tickets.created.lock().unwrap();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].warranty_status.as_deref(), Some("active"));
    assert_eq!(created[0].priority.as_deref(), Some("high"));

    let sent = outbox_files(spool.path());
    assert_eq!(sent.len(), 1);
    assert!(sent[0].contains("To: jane@example.com"));
    assert!(sent[0].contains("Subject: Your warranty claim"));
}

#[tokio::test]
async fn unknown_step_fails_without_reply() {
    let spool = tempfile::tempdir().unwrap();
    let h = harness(
        spool.path(),
        &[(
            "01-extract-serial",
            r#"{"next_step": "05-issue-refund", "metadata": {"serial": "C074AD3D3102", "reply_body": "refund!"}}"#,
        )],
    )
    .await;

    let result = h.processor.process_raw(EMAIL.as_bytes()).await;

    assert!(!result.success);
    assert_eq!(result.final_state, Some(OrchestratorState::Failed));
    assert_eq!(result.error_code.as_deref(), Some("unknown_step"));
    assert_eq!(result.scenario_used.as_deref(), Some("01-extract-serial"));
    assert!(result.serial_number.is_none());
    assert!(!result.reply_sent);
    assert!(outbox_files(spool.path()).is_empty());
}

#[tokio::test]
async fn unparseable_model_reply_is_a_routing_failure() {
    let spool = tempfile::tempdir().unwrap();
    let h = harness(
        spool.path(),
        &[("01-extract-serial", "I would check the warranty next.")],
    )
    .await;

    let result = h.processor.process_raw(EMAIL.as_bytes()).await;
    assert!(!result.success);
    assert_eq!(result.error_code.as_deref(), Some("routing_parse_failure"));
    assert!(outbox_files(spool.path()).is_empty());
}

#[tokio::test]
async fn looping_steps_hit_the_step_limit() {
    let spool = tempfile::tempdir().unwrap();
    let h = harness(
        spool.path(),
        &[(
            "01-extract-serial",
            r#"{"next_step": "01-extract-serial", "response": "still looking"}"#,
        )],
    )
    .await;

    let result = h.processor.process_raw(EMAIL.as_bytes()).await;
    assert!(!result.success);
    assert_eq!(result.final_state, Some(OrchestratorState::StepLimitExceeded));
    assert_eq!(result.error_code.as_deref(), Some("step_limit_exceeded"));
    assert_eq!(result.steps_executed, 10);
}

#[tokio::test]
async fn spool_poll_processes_dropped_files() {
    let spool = tempfile::tempdir().unwrap();
    std::fs::write(spool.path().join("0001.eml"), EMAIL).unwrap();
    let h = harness(spool.path(), HAPPY_PATH).await;

    let results = h.processor.poll_once().await.unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0].success);
    assert!(spool.path().join("processed/0001.eml").exists());
    assert_eq!(outbox_files(spool.path()).len(), 1);
}

#[tokio::test]
async fn orchestrator_runs_directly_from_a_context() {
    let spool = tempfile::tempdir().unwrap();
    let h = harness(spool.path(), HAPPY_PATH).await;
    drop(h.processor);

    // Rebuild just the orchestration pieces to drive a run without the processor.
    let catalog = Arc::new(StepCatalog::new(STEPS).unwrap());
    let instructions = StaticInstructions::new().with("04-compose-reply", "Write the reply.");
    let executor = Arc::new(LlmStepExecutor::new(
        h.llm.clone(),
        Arc::new(instructions),
        Arc::clone(&catalog),
        Arc::new(ToolRegistry::new()),
        Duration::from_secs(5),
    ));
    let orchestrator =
        StepOrchestrator::new(executor, Arc::clone(&catalog), OrchestratorConfig::default());

    let context = StepContext::new("Device warranty check", "serial C074AD3D3102", "jane@example.com")
        .with_serial_number("C074AD3D3102");
    let routing = catalog.entry_route(Some("04-compose-reply")).unwrap();
    let outcome = orchestrator.run(context, routing).await;

    assert_eq!(outcome.state, OrchestratorState::Done);
    assert_eq!(outcome.response_text.as_deref(), Some("Email sent successfully"));
    assert_eq!(outcome.context.serial_number(), Some("C074AD3D3102"));
    assert_eq!(outcome.steps_executed, 1);
}
