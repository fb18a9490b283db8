//! Warranty lookup: service client and the tool steps call it through.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::ToolError;
use crate::steps::context::{StepContext, WarrantyInfo};
use crate::tools::tool::{Tool, optional_str};

const TOOL_NAME: &str = "check_warranty";

/// Warranty backend keyed by serial number.
#[async_trait]
pub trait WarrantyService: Send + Sync {
    async fn check(&self, serial: &str) -> Result<WarrantyInfo, ToolError>;
}

/// JSON-over-HTTP warranty backend: `GET {base}/warranty/{serial}`.
pub struct HttpWarrantyService {
    client: reqwest::Client,
    base_url: String,
}

impl HttpWarrantyService {
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

#[async_trait]
impl WarrantyService for HttpWarrantyService {
    async fn check(&self, serial: &str) -> Result<WarrantyInfo, ToolError> {
        let url = format!("{}/warranty/{}", self.base_url, serial);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ToolError::Unavailable {
                name: TOOL_NAME.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            // Unknown serials are an answer, not a failure: let the step route on it.
            return Ok(WarrantyInfo::new("not_found"));
        }
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

        response
            .json::<WarrantyInfo>()
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                name: TOOL_NAME.to_string(),
                reason: format!("invalid warranty payload: {e}"),
            })
    }
}

/// Tool wrapper: looks up the serial given in the arguments, or the one in context.
pub struct WarrantyLookupTool {
    service: Arc<dyn WarrantyService>,
}

impl WarrantyLookupTool {
    pub fn new(service: Arc<dyn WarrantyService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Tool for WarrantyLookupTool {
    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn description(&self) -> &str {
        "Look up warranty status for a device serial number. Writes `warranty`."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "serial": {"type": "string", "description": "Device serial number; defaults to the one already extracted"}
            }
        })
    }

    async fn execute(
        &self,
        params: &Value,
        ctx: &StepContext,
    ) -> Result<Map<String, Value>, ToolError> {
        let serial = optional_str(params, "serial")
            .or_else(|| ctx.serial_number())
            .ok_or_else(|| ToolError::InvalidParameters {
                name: TOOL_NAME.to_string(),
                reason: "no serial number given and none in context".to_string(),
            })?;

        let info = self.service.check(serial).await?;
        tracing::info!(serial = %serial, status = %info.status, "Warranty lookup complete");

        let mut out = Map::new();
        out.insert("serial".to_string(), Value::String(serial.to_string()));
        out.insert(
            "warranty".to_string(),
            serde_json::to_value(&info).map_err(|e| ToolError::ExecutionFailed {
                name: TOOL_NAME.to_string(),
                reason: e.to_string(),
            })?,
        );
        Ok(out)
    }
}
