//! Step routing: turn a step result into the next control decision.

use std::sync::Arc;

use crate::steps::catalog::StepCatalog;
use crate::steps::context::StepContext;
use crate::steps::types::{Directive, StepExecutionResult, StepId};

/// Why routing refused a result.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    /// The directive names a step outside the catalog.
    #[error("step {from} routed to unknown step '{directive}'")]
    UnknownStep { from: String, directive: String },
}

/// What the orchestrator does next.
#[derive(Debug, Clone)]
pub enum RouteDecision {
    Continue {
        next: StepId,
        context: StepContext,
        applied_keys: Vec<String>,
    },
    Done {
        context: StepContext,
        response_text: String,
        applied_keys: Vec<String>,
    },
    Error(RouteError),
}

/// Validates directives against the catalog and merges step metadata.
#[derive(Debug, Clone)]
pub struct StepRouter {
    catalog: Arc<StepCatalog>,
}

impl StepRouter {
    pub fn new(catalog: Arc<StepCatalog>) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &StepCatalog {
        &self.catalog
    }

    /// Route a result. The context is only merged when the result is accepted.
    pub fn route(&self, result: StepExecutionResult, context: &StepContext) -> RouteDecision {
        match &result.next {
            Directive::Done => {
                let (context, applied_keys) = context.merged(&result.metadata);
                RouteDecision::Done {
                    context,
                    response_text: result.response_text,
                    applied_keys,
                }
            }
            Directive::Step(name) => match self.catalog.resolve(name) {
                Some(next) => {
                    let (context, applied_keys) = context.merged(&result.metadata);
                    RouteDecision::Continue {
                        next,
                        context,
                        applied_keys,
                    }
                }
                None => {
                    tracing::warn!(
                        step = %result.step,
                        directive = %name,
                        "Step routed to a step outside the catalog"
                    );
                    RouteDecision::Error(RouteError::UnknownStep {
                        from: result.step.to_string(),
                        directive: name.clone(),
                    })
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn router() -> StepRouter {
        StepRouter::new(Arc::new(
            StepCatalog::new(["01-extract-serial", "02-check-warranty"]).unwrap(),
        ))
    }

    fn ctx() -> StepContext {
        StepContext::new("Device warranty check", "serial C074AD3D3102", "customer@example.com")
    }

    #[test]
    fn continue_merges_metadata() {
        let router = router();
        let from = router.catalog().resolve("01-extract-serial").unwrap();
        let result = StepExecutionResult::new(from, Directive::Step("02-check-warranty".into()))
            .with_metadata("serial", json!("C074AD3D3102"));

        match router.route(result, &ctx()) {
            RouteDecision::Continue {
                next,
                context,
                applied_keys,
            } => {
                assert_eq!(next.as_str(), "02-check-warranty");
                assert_eq!(context.serial_number(), Some("C074AD3D3102"));
                assert_eq!(applied_keys, vec!["serial"]);
            }
            other => panic!("Expected Continue, got {:?}", other),
        }
    }

    #[test]
    fn done_preserves_response_verbatim() {
        let router = router();
        let from = router.catalog().resolve("02-check-warranty").unwrap();
        let result = StepExecutionResult::new(from, Directive::Done)
            .with_response("Email sent successfully")
            .with_metadata("ticket_id", json!("TCK-1"));

        match router.route(result, &ctx()) {
            RouteDecision::Done {
                context,
                response_text,
                ..
            } => {
                assert_eq!(response_text, "Email sent successfully");
                assert_eq!(context.ticket_id(), Some("TCK-1"));
            }
            other => panic!("Expected Done, got {:?}", other),
        }
    }

    #[test]
    fn unknown_step_is_an_error() {
        let router = router();
        let from = router.catalog().resolve("01-extract-serial").unwrap();
        let result = StepExecutionResult::new(from, Directive::Step("07-refund-everyone".into()))
            .with_metadata("serial", json!("C074AD3D3102"));

        match router.route(result, &ctx()) {
            RouteDecision::Error(RouteError::UnknownStep { from, directive }) => {
                assert_eq!(from, "01-extract-serial");
                assert_eq!(directive, "07-refund-everyone");
            }
            other => panic!("Expected Error, got {:?}", other),
        }
    }
}
