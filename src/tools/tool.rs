//! Tool trait: backend operations a step can request.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::ToolError;
use crate::steps::context::StepContext;

/// Tool description shown to the model.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// A backend operation a step may request in its reply.
///
/// The returned map is merged into the step's metadata, so tools write the
/// context keys they own (`warranty`, `ticket_id`, ...).
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the arguments.
    fn parameters_schema(&self) -> Value;

    async fn execute(
        &self,
        params: &Value,
        ctx: &StepContext,
    ) -> Result<Map<String, Value>, ToolError>;
}

/// Read a non-empty string argument.
pub fn optional_str<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}
