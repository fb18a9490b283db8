//! Email processor: turns inbound emails into orchestrated step runs.
//!
//! For each email:
//! 1. Build the initial `StepContext` from subject, body and sender
//! 2. Run the orchestrator from the entry step
//! 3. On DONE, send the reply the steps composed (`reply_body`, `reply_subject`)
//! 4. Map everything into a `ProcessingResult`
//!
//! A run that does not reach DONE never sends mail.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::channels::{EmailTransport, InboundEmail};
use crate::error::{ChannelError, ConfigError};
use crate::pipeline::types::{BatchSummary, INVALID_EMAIL, ProcessingResult, REPLY_SEND_FAILED};
use crate::steps::{StepContext, StepOrchestrator, StepRoutingResult};

/// Emails processed concurrently within one batch.
const DEFAULT_CONCURRENCY: usize = 4;

pub struct EmailProcessor {
    orchestrator: Arc<StepOrchestrator>,
    transport: Arc<dyn EmailTransport>,
    entry: StepRoutingResult,
    concurrency: usize,
}

impl EmailProcessor {
    /// Fails when the configured entry step is not in the catalog.
    pub fn new(
        orchestrator: Arc<StepOrchestrator>,
        transport: Arc<dyn EmailTransport>,
    ) -> Result<Self, ConfigError> {
        let entry = orchestrator
            .catalog()
            .entry_route(orchestrator.config().entry_step.as_deref())?;
        Ok(Self {
            orchestrator,
            transport,
            entry,
            concurrency: DEFAULT_CONCURRENCY,
        })
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn entry(&self) -> &StepRoutingResult {
        &self.entry
    }

    /// Process one email end to end.
    pub async fn process(&self, email: InboundEmail) -> ProcessingResult {
        let started = Instant::now();
        info!(
            email = %email.id,
            from = %email.from,
            subject = %email.subject,
            "Processing email"
        );

        let context = StepContext::new(&email.subject, &email.body, &email.from);
        let outcome = self.orchestrator.run(context, self.entry.clone()).await;

        let mut result = ProcessingResult::from_outcome(email.id, &outcome, 0);

        if outcome.is_success() {
            match outcome.context.get_str("reply_body").filter(|b| !b.trim().is_empty()) {
                Some(body) => {
                    let subject = outcome
                        .context
                        .get_str("reply_subject")
                        .filter(|s| !s.trim().is_empty())
                        .map(str::to_string)
                        .unwrap_or_else(|| email.reply_subject());

                    match self.transport.send(&email.from, &subject, body).await {
                        Ok(message_id) => {
                            result.reply_sent = true;
                            result.reply_message_id = Some(message_id);
                        }
                        Err(e) => {
                            error!(email = %email.id, error = %e, "Failed to send reply");
                            result.success = false;
                            result.error_code = Some(REPLY_SEND_FAILED.to_string());
                            result.error = Some(e.to_string());
                        }
                    }
                }
                None => debug!(email = %email.id, "Run finished without composing a reply"),
            }
        }

        result.processing_time_ms = started.elapsed().as_millis() as u64;

        if result.success {
            info!(
                email = %email.id,
                scenario = result.scenario_used.as_deref().unwrap_or("-"),
                reply_sent = result.reply_sent,
                elapsed_ms = result.processing_time_ms,
                "Email processed"
            );
        } else {
            warn!(
                email = %email.id,
                code = result.error_code.as_deref().unwrap_or("-"),
                elapsed_ms = result.processing_time_ms,
                "Email processing failed"
            );
        }

        result
    }

    /// Parse a raw RFC 5322 message and process it.
    pub async fn process_raw(&self, raw: &[u8]) -> ProcessingResult {
        let started = Instant::now();
        match InboundEmail::parse(raw) {
            Ok(email) => self.process(email).await,
            Err(e) => {
                warn!(error = %e, "Rejecting unparseable email");
                ProcessingResult::rejected(
                    uuid::Uuid::new_v4(),
                    INVALID_EMAIL,
                    e.to_string(),
                    started.elapsed().as_millis() as u64,
                )
            }
        }
    }

    /// Process independent emails concurrently. Results come back in completion order.
    pub async fn process_batch(&self, emails: Vec<InboundEmail>) -> Vec<ProcessingResult> {
        futures::stream::iter(emails)
            .map(|email| self.process(email))
            .buffer_unordered(self.concurrency)
            .collect()
            .await
    }

    /// Fetch whatever the transport has and process it.
    pub async fn poll_once(&self) -> Result<Vec<ProcessingResult>, ChannelError> {
        let emails = self.transport.fetch_inbound().await?;
        if emails.is_empty() {
            return Ok(Vec::new());
        }

        info!("Processing {} inbound email(s)", emails.len());
        let results = self.process_batch(emails).await;
        let summary = BatchSummary::from_results(&results);
        info!(
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            replies = summary.replies_sent,
            "Batch processed"
        );
        Ok(results)
    }
}

/// Spawn a background task that polls the transport and processes new email.
///
/// Returns a `JoinHandle` and shutdown flag.
pub fn spawn_email_processor(
    processor: Arc<EmailProcessor>,
    interval: Duration,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        info!("Email processor started, polling every {}s", interval.as_secs());

        let mut tick = tokio::time::interval(interval);

        // First tick fires immediately.
        loop {
            tick.tick().await;

            if shutdown.load(Ordering::Relaxed) {
                info!("Email processor shutting down");
                return;
            }

            if let Err(e) = processor.poll_once().await {
                error!("Failed to fetch inbound email: {e}");
            }
        }
    });

    (handle, shutdown_flag)
}
