//! Support ticket creation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ToolError;
use crate::steps::context::StepContext;
use crate::tools::tool::{Tool, optional_str};

const TOOL_NAME: &str = "create_ticket";

/// Payload sent to the ticketing backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketRequest {
    pub customer_email: String,
    pub subject: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warranty_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
}

/// Ticketing backend.
#[async_trait]
pub trait TicketService: Send + Sync {
    /// Create a ticket and return its identifier.
    async fn create(&self, request: &TicketRequest) -> Result<String, ToolError>;
}

/// JSON-over-HTTP ticketing backend: `POST {base}/tickets`.
pub struct HttpTicketService {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTicketService {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ToolError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ToolError::ExecutionFailed {
                name: TOOL_NAME.to_string(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

#[derive(Deserialize)]
struct CreatedTicket {
    #[serde(alias = "id")]
    ticket_id: Value,
}

#[async_trait]
impl TicketService for HttpTicketService {
    async fn create(&self, request: &TicketRequest) -> Result<String, ToolError> {
        let url = format!("{}/tickets", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| ToolError::Unavailable {
                name: TOOL_NAME.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ToolError::Unavailable {
                name: TOOL_NAME.to_string(),
                reason: format!("HTTP {status}"),
            });
        }
        if !status.is_success() {
            return Err(ToolError::ExecutionFailed {
                name: TOOL_NAME.to_string(),
                reason: format!("HTTP {status}"),
            });
        }

        let created: CreatedTicket =
            response
                .json()
                .await
                .map_err(|e| ToolError::ExecutionFailed {
                    name: TOOL_NAME.to_string(),
                    reason: format!("invalid ticket payload: {e}"),
                })?;

        match created.ticket_id {
            Value::String(s) if !s.is_empty() => Ok(s),
            Value::Number(n) => Ok(n.to_string()),
            other => Err(ToolError::ExecutionFailed {
                name: TOOL_NAME.to_string(),
                reason: format!("unusable ticket id: {other}"),
            }),
        }
    }
}

/// Tool wrapper: builds the ticket from context, with optional overrides.
pub struct CreateTicketTool {
    service: Arc<dyn TicketService>,
}

impl CreateTicketTool {
    pub fn new(service: Arc<dyn TicketService>) -> Self {
        Self { service }
    }

    fn build_request(params: &Value, ctx: &StepContext) -> TicketRequest {
        TicketRequest {
            customer_email: ctx.sender().to_string(),
            subject: optional_str(params, "subject")
                .unwrap_or(ctx.subject())
                .to_string(),
            description: optional_str(params, "description")
                .map(str::to_string)
                .unwrap_or_else(|| ctx.body().chars().take(2000).collect()),
            serial_number: ctx.serial_number().map(str::to_string),
            warranty_status: ctx.warranty().map(|w| w.status.clone()),
            priority: optional_str(params, "priority").map(str::to_string),
        }
    }
}

#[async_trait]
impl Tool for CreateTicketTool {
    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn description(&self) -> &str {
        "Open a support ticket for this customer. Writes `ticket_id`."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "subject": {"type": "string"},
                "description": {"type": "string"},
                "priority": {"type": "string", "enum": ["low", "normal", "high"]}
            }
        })
    }

    async fn execute(
        &self,
        params: &Value,
        ctx: &StepContext,
    ) -> Result<Map<String, Value>, ToolError> {
        if let Some(existing) = ctx.ticket_id() {
            // Orchestrator retries may re-run this step; don't open a second ticket.
            tracing::debug!(ticket_id = %existing, "Ticket already exists, skipping creation");
            let mut out = Map::new();
            out.insert("ticket_id".to_string(), Value::String(existing.to_string()));
            return Ok(out);
        }

        let request = Self::build_request(params, ctx);
        let ticket_id = self.service.create(&request).await?;
        tracing::info!(ticket_id = %ticket_id, customer = %request.customer_email, "Created support ticket");

        let mut out = Map::new();
        out.insert("ticket_id".to_string(), Value::String(ticket_id));
        Ok(out)
    }
}
