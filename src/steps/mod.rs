//! Step-driven warranty workflow.
//!
//! A catalog of named steps, each backed by an instruction document. The
//! orchestrator executes the entry step, routes on the step's directive, and
//! repeats until a step reports DONE or the run fails.

pub mod catalog;
pub mod context;
pub mod executor;
pub mod instructions;
pub mod orchestrator;
pub mod prompt;
pub mod router;
pub mod types;

pub use catalog::StepCatalog;
pub use context::{StepContext, WarrantyInfo};
pub use executor::{LlmStepExecutor, StepExecutor, StepFailure};
pub use instructions::{FileInstructions, InstructionSource, StaticInstructions};
pub use orchestrator::{
    FailureKind, OrchestrationError, OrchestrationOutcome, OrchestratorState, StepOrchestrator,
};
pub use router::{RouteDecision, RouteError, StepRouter};
pub use types::{
    DONE_SENTINEL, Directive, RoutingMethod, StepExecutionResult, StepId, StepRecord,
    StepRoutingResult,
};
