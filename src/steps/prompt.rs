//! Prompt construction and reply parsing for step execution.

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::steps::context::StepContext;
use crate::steps::types::{DONE_SENTINEL, StepId};
use crate::tools::ToolDefinition;

/// Body characters included in the user prompt.
const BODY_PREVIEW_CHARS: usize = 4000;

/// Device serials: 8-16 uppercase alphanumerics containing at least one digit.
static SERIAL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Z0-9]{8,16}\b").expect("valid serial regex"));

/// Serial-number-looking tokens in `text`, in order of appearance, deduplicated.
pub fn serial_candidates(text: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    for m in SERIAL_PATTERN.find_iter(text) {
        let token = m.as_str();
        let has_digit = token.chars().any(|c| c.is_ascii_digit());
        let has_alpha = token.chars().any(|c| c.is_ascii_alphabetic());
        if has_digit && has_alpha && !found.iter().any(|f| f == token) {
            found.push(token.to_string());
        }
    }
    found
}

/// System prompt: the reply contract, the step graph, available tools, then the instruction.
pub fn build_system_prompt(
    step: &StepId,
    instruction: &str,
    known_steps: &[&str],
    tools: &[ToolDefinition],
) -> String {
    let mut prompt = String::with_capacity(1024 + instruction.len());

    prompt.push_str(
        "You are one step in an automated warranty support workflow. \
         Follow the step instruction below, using the email and context provided.\n\n\
         Respond with ONLY a JSON object:\n\
         {\"next_step\": \"...\", \"response\": \"...\", \"metadata\": {...}, \"tool_calls\": [{\"name\": \"...\", \"arguments\": {...}}]}\n\n\
         Rules:\n",
    );
    prompt.push_str(&format!(
        "- \"next_step\" must be one of the known steps or \"{DONE_SENTINEL}\" when the workflow is finished\n"
    ));
    prompt.push_str(
        "- \"metadata\" records what you learned (e.g. \"serial\", \"reply_subject\", \"reply_body\")\n\
         - Never put empty values in metadata\n\
         - Only request tools from the list below; omit \"tool_calls\" if none are needed\n\n",
    );

    prompt.push_str(&format!("Current step: {step}\n"));
    prompt.push_str(&format!("Known steps: {}\n", known_steps.join(", ")));

    if !tools.is_empty() {
        prompt.push_str("\nAvailable tools:\n");
        for tool in tools {
            prompt.push_str(&format!(
                "- {}: {} Arguments: {}\n",
                tool.name, tool.description, tool.parameters
            ));
        }
    }

    prompt.push_str("\n## Step instruction\n\n");
    prompt.push_str(instruction.trim());
    prompt
}

/// User prompt: the email and everything learned so far.
pub fn build_user_prompt(ctx: &StepContext) -> String {
    let mut prompt = String::with_capacity(1024);

    prompt.push_str(&format!("From: {}\n", ctx.sender()));
    prompt.push_str(&format!("Subject: {}\n", ctx.subject()));

    let candidates = serial_candidates(&format!("{}\n{}", ctx.subject(), ctx.body()));
    if !candidates.is_empty() {
        prompt.push_str(&format!("Serial candidates: {}\n", candidates.join(", ")));
    }

    prompt.push_str("\nContext:\n");
    prompt.push_str(&format!(
        "  serial_number: {}\n",
        ctx.serial_number().unwrap_or("(unknown)")
    ));
    match ctx.warranty() {
        Some(w) => prompt.push_str(&format!(
            "  warranty: {}\n",
            serde_json::to_string(w).unwrap_or_else(|_| w.status.clone())
        )),
        None => prompt.push_str("  warranty: (not checked)\n"),
    }
    prompt.push_str(&format!(
        "  ticket_id: {}\n",
        ctx.ticket_id().unwrap_or("(none)")
    ));
    for (key, value) in ctx.extra() {
        prompt.push_str(&format!("  {key}: {value}\n"));
    }

    let body_preview: String = ctx.body().chars().take(BODY_PREVIEW_CHARS).collect();
    prompt.push_str(&format!("\nEmail body:\n{body_preview}"));

    prompt
}

/// A tool the model asked to run.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCallRequest {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// Parsed step reply.
#[derive(Debug, Clone, Deserialize)]
pub struct StepReply {
    #[serde(default)]
    pub next_step: String,
    #[serde(default, alias = "response_text")]
    pub response: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRequest>,
}

/// Parse the model's reply. Errors describe what was wrong with it.
pub fn parse_step_reply(raw: &str) -> Result<StepReply, String> {
    let json_str = extract_json_object(raw);
    let reply: StepReply =
        serde_json::from_str(&json_str).map_err(|e| format!("JSON parse error: {e}"))?;
    if reply.next_step.trim().is_empty() {
        return Err("reply has no next_step".to_string());
    }
    Ok(reply)
}

/// Extract a JSON object from LLM output (handles markdown wrapping).
fn extract_json_object(text: &str) -> String {
    let trimmed = text.trim();

    if trimmed.starts_with('{') {
        return trimmed.to_string();
    }

    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            let inner = after[..end].trim();
            if inner.starts_with('{') {
                return inner.to_string();
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && end > start
    {
        return trimmed[start..=end].to_string();
    }

    trimmed.to_string()
}
