//! Shared types for the email processing pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::steps::{OrchestrationOutcome, OrchestratorState, StepRecord};

/// Error code when the inbound email could not be parsed.
pub const INVALID_EMAIL: &str = "invalid_email";
/// Error code when the run reached DONE but the reply could not be delivered.
pub const REPLY_SEND_FAILED: &str = "reply_send_failed";

/// Outcome record for one processed email.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessingResult {
    pub email_id: Uuid,
    pub success: bool,
    /// Step that produced the terminal state.
    pub scenario_used: Option<String>,
    pub serial_number: Option<String>,
    pub reply_sent: bool,
    /// Message-ID of the reply, when one was sent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_message_id: Option<String>,
    pub processing_time_ms: u64,
    /// Machine-readable failure code when `success` is false.
    pub error_code: Option<String>,
    pub error: Option<String>,
    pub final_state: Option<OrchestratorState>,
    pub response_text: Option<String>,
    pub steps_executed: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub trail: Vec<StepRecord>,
    pub processed_at: DateTime<Utc>,
}

impl ProcessingResult {
    /// Result for an email that never reached the orchestrator.
    pub fn rejected(email_id: Uuid, code: &str, error: impl Into<String>, elapsed_ms: u64) -> Self {
        Self {
            email_id,
            success: false,
            scenario_used: None,
            serial_number: None,
            reply_sent: false,
            reply_message_id: None,
            processing_time_ms: elapsed_ms,
            error_code: Some(code.to_string()),
            error: Some(error.into()),
            final_state: None,
            response_text: None,
            steps_executed: 0,
            trail: Vec::new(),
            processed_at: Utc::now(),
        }
    }

    /// Map an orchestration outcome. The reply fields are filled in by the caller.
    pub fn from_outcome(email_id: Uuid, outcome: &OrchestrationOutcome, elapsed_ms: u64) -> Self {
        Self {
            email_id,
            success: outcome.is_success(),
            scenario_used: outcome.last_step.as_ref().map(|s| s.to_string()),
            serial_number: outcome.context.serial_number().map(str::to_string),
            reply_sent: false,
            reply_message_id: None,
            processing_time_ms: elapsed_ms,
            error_code: outcome.error.as_ref().map(|e| e.kind.code().to_string()),
            error: outcome.error.as_ref().map(|e| e.message.clone()),
            final_state: Some(outcome.state),
            response_text: outcome.response_text.clone(),
            steps_executed: outcome.steps_executed,
            trail: outcome.trail.clone(),
            processed_at: Utc::now(),
        }
    }
}

/// Counts over a processed batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub replies_sent: usize,
}

impl BatchSummary {
    pub fn from_results(results: &[ProcessingResult]) -> Self {
        let succeeded = results.iter().filter(|r| r.success).count();
        Self {
            total: results.len(),
            succeeded,
            failed: results.len() - succeeded,
            replies_sent: results.iter().filter(|r| r.reply_sent).count(),
        }
    }
}
