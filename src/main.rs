use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use warranty_agent::channels::{EmailConfig, SpoolMailbox};
use warranty_agent::config::{OrchestratorConfig, ServiceConfig, instructions_dir_from_env};
use warranty_agent::llm::{LlmConfig, create_provider};
use warranty_agent::pipeline::{EmailProcessor, spawn_email_processor};
use warranty_agent::steps::{FileInstructions, LlmStepExecutor, StepCatalog, StepOrchestrator};
use warranty_agent::tools::ToolRegistry;
use warranty_agent::tools::builtin::{
    CreateTicketTool, HttpTicketService, HttpWarrantyService, WarrantyLookupTool,
};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    let _log_guard = init_tracing();

    let llm_config = LlmConfig::from_env()?;
    let llm = create_provider(&llm_config)?;

    // ── Step catalog ─────────────────────────────────────────────────────
    let instructions = FileInstructions::new(instructions_dir_from_env());
    let names = instructions
        .discover()
        .await
        .with_context(|| format!("reading instructions from {}", instructions.dir().display()))?;
    let catalog = Arc::new(StepCatalog::new(names)?);

    eprintln!("Warranty agent v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", llm.model_name());
    eprintln!("   Instructions: {}", instructions.dir().display());
    eprintln!("   Steps: {}", catalog.names().join(", "));

    // ── Tools ────────────────────────────────────────────────────────────
    let tools = Arc::new(ToolRegistry::new());
    match ServiceConfig::from_env() {
        Some(services) => {
            let warranty =
                HttpWarrantyService::new(&services.warranty_url, services.request_timeout)?;
            let tickets = HttpTicketService::new(&services.ticket_url, services.request_timeout)?;
            tools
                .register(Arc::new(WarrantyLookupTool::new(Arc::new(warranty))))
                .await;
            tools
                .register(Arc::new(CreateTicketTool::new(Arc::new(tickets))))
                .await;
            eprintln!("   Tools: {} registered", tools.count().await);
        }
        None => {
            tracing::warn!(
                "WARRANTY_SERVICE_URL / TICKET_SERVICE_URL not set, steps run without tools"
            );
        }
    }

    // ── Orchestration ────────────────────────────────────────────────────
    let executor = Arc::new(LlmStepExecutor::new(
        llm,
        Arc::new(instructions),
        Arc::clone(&catalog),
        tools,
        llm_config.call_timeout,
    ));
    let orchestrator = Arc::new(StepOrchestrator::new(
        executor,
        catalog,
        OrchestratorConfig::from_env(),
    ));

    let email_config = EmailConfig::from_env()?;
    let poll_interval = email_config.poll_interval;
    eprintln!("   Spool: {}", email_config.spool_dir.display());
    let transport = Arc::new(SpoolMailbox::new(email_config));
    let processor = Arc::new(EmailProcessor::new(orchestrator, transport)?);
    eprintln!("   Entry step: {}\n", processor.entry().step);

    match std::env::args().nth(1) {
        // One-shot: process a single .eml file and print the result
        Some(path) => {
            let raw = tokio::fs::read(&path)
                .await
                .with_context(|| format!("reading {path}"))?;
            let result = processor.process_raw(&raw).await;
            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.success {
                return Ok(ExitCode::from(2));
            }
        }
        None => {
            let (handle, shutdown) = spawn_email_processor(processor, poll_interval);
            tokio::signal::ctrl_c().await?;
            tracing::info!("Shutdown requested");
            shutdown.store(true, Ordering::Relaxed);
            handle.abort();
            let _ = handle.await;
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Log to stderr, or to a daily rolling file when `WARRANTY_LOG_DIR` is set.
fn init_tracing() -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match std::env::var("WARRANTY_LOG_DIR") {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "warranty-agent.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer)
                .init();
            Some(guard)
        }
        Err(_) => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
            None
        }
    }
}
