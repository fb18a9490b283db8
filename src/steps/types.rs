//! Step identifiers, execution results and routing decisions.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Sentinel directive that ends a run.
pub const DONE_SENTINEL: &str = "DONE";

/// A step known to the catalog.
///
/// Only `StepCatalog` hands these out, so holding one means the name was
/// validated against the closed step set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StepId(Arc<str>);

impl StepId {
    pub(crate) fn new(name: &str) -> Self {
        Self(Arc::from(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for StepId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

/// Where a step says to go next, before validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// Run the named step next.
    Step(String),
    /// Finished.
    Done,
}

impl Directive {
    /// Interpret a raw `next_step` string from a model reply.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else if trimmed.eq_ignore_ascii_case(DONE_SENTINEL) {
            Some(Self::Done)
        } else {
            Some(Self::Step(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Step(name) => name,
            Self::Done => DONE_SENTINEL,
        }
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of executing one step.
#[derive(Debug, Clone)]
pub struct StepExecutionResult {
    /// Step that produced this result.
    pub step: StepId,
    pub next: Directive,
    /// Human-readable text for logs and reply composition.
    pub response_text: String,
    /// What the step decided, keyed by field name.
    pub metadata: Map<String, Value>,
}

impl StepExecutionResult {
    pub fn new(step: StepId, next: Directive) -> Self {
        Self {
            step,
            next,
            response_text: String::new(),
            metadata: Map::new(),
        }
    }

    pub fn with_response(mut self, text: impl Into<String>) -> Self {
        self.response_text = text.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// The only termination signal the orchestrator recognizes.
    pub fn is_terminal(&self) -> bool {
        self.next == Directive::Done
    }
}

/// How the entry step was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingMethod {
    Default,
    Explicit,
    ModelInferred,
}

impl RoutingMethod {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Explicit => "explicit",
            Self::ModelInferred => "model_inferred",
        }
    }
}

/// Choice of the first step for a run.
#[derive(Debug, Clone)]
pub struct StepRoutingResult {
    pub step: StepId,
    /// Informational only; nothing in the default flow gates on it.
    pub confidence: f32,
    pub method: RoutingMethod,
}

impl StepRoutingResult {
    pub fn new(step: StepId, confidence: f32, method: RoutingMethod) -> Self {
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
        Self {
            step,
            confidence,
            method,
        }
    }
}

/// Audit entry for one successfully executed step.
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub step: StepId,
    pub directive: String,
    /// Executor invocations spent on this step, including failed ones.
    pub attempts: u32,
    pub elapsed: Duration,
    /// Metadata keys that changed the context.
    pub applied_keys: Vec<String>,
}
