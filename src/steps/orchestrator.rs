//! Step orchestrator: the execute → route loop for one email.
//!
//! States: Init → Running → {Done, Failed, StepLimitExceeded}.
//!
//! Each iteration executes the current step (retrying transient failures
//! with the same context), routes the result, and merges the step's metadata
//! only once the result is accepted. The loop is bounded by `max_steps`
//! successful executions and by an overall deadline; the in-flight executor
//! call is dropped when the deadline passes.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::OrchestratorConfig;
use crate::steps::catalog::StepCatalog;
use crate::steps::context::StepContext;
use crate::steps::executor::{StepExecutor, StepFailure};
use crate::steps::router::{RouteDecision, RouteError, StepRouter};
use crate::steps::types::{StepExecutionResult, StepId, StepRecord, StepRoutingResult};

/// State of an orchestration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorState {
    Init,
    Running,
    Done,
    Failed,
    StepLimitExceeded,
}

impl OrchestratorState {
    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: OrchestratorState) -> bool {
        use OrchestratorState::*;

        matches!(
            (self, target),
            (Init, Running)
                | (Running, Running)
                | (Running, Done)
                | (Running, Failed)
                | (Running, StepLimitExceeded)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::StepLimitExceeded)
    }
}

impl fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Init => "init",
            Self::Running => "running",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::StepLimitExceeded => "step_limit_exceeded",
        };
        write!(f, "{s}")
    }
}

/// Machine-readable failure classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    TransientExecutorFailure,
    FatalExecutorFailure,
    RoutingParseFailure,
    UnknownStep,
    StepLimitExceeded,
    DeadlineExceeded,
}

impl FailureKind {
    /// Stable code for result records and logs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::TransientExecutorFailure => "transient_executor_failure",
            Self::FatalExecutorFailure => "fatal_executor_failure",
            Self::RoutingParseFailure => "routing_parse_failure",
            Self::UnknownStep => "unknown_step",
            Self::StepLimitExceeded => "step_limit_exceeded",
            Self::DeadlineExceeded => "deadline_exceeded",
        }
    }

    fn terminal_state(&self) -> OrchestratorState {
        match self {
            Self::StepLimitExceeded | Self::DeadlineExceeded => {
                OrchestratorState::StepLimitExceeded
            }
            _ => OrchestratorState::Failed,
        }
    }
}

impl From<&StepFailure> for FailureKind {
    fn from(failure: &StepFailure) -> Self {
        match failure {
            StepFailure::Transient { .. } => Self::TransientExecutorFailure,
            StepFailure::Fatal { .. } => Self::FatalExecutorFailure,
            StepFailure::Parse { .. } => Self::RoutingParseFailure,
        }
    }
}

/// Why a run did not reach Done.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("{}: {message}", .kind.code())]
pub struct OrchestrationError {
    pub kind: FailureKind,
    /// Step active when the run stopped.
    pub step: Option<String>,
    pub message: String,
}

impl OrchestrationError {
    fn new(kind: FailureKind, step: Option<&StepId>, message: impl Into<String>) -> Self {
        Self {
            kind,
            step: step.map(|s| s.to_string()),
            message: message.into(),
        }
    }
}

/// Final result of a run. Every exit of the orchestrator produces one.
#[derive(Debug, Clone)]
pub struct OrchestrationOutcome {
    pub state: OrchestratorState,
    /// Context after the last accepted step.
    pub context: StepContext,
    /// Response text of the terminal step, when the run reached Done.
    pub response_text: Option<String>,
    pub error: Option<OrchestrationError>,
    /// Step that produced the terminal state.
    pub last_step: Option<StepId>,
    /// Successful step executions; failed retries are not counted.
    pub steps_executed: u32,
    /// Executor invocations, failed retries included.
    pub attempts: u32,
    pub trail: Vec<StepRecord>,
    /// Wall time of the whole run, all attempts and backoff included.
    pub elapsed: Duration,
}

impl OrchestrationOutcome {
    pub fn is_success(&self) -> bool {
        self.state == OrchestratorState::Done
    }
}

/// Timing for one run, kept apart from the context so the warning can fire
/// while an executor call still borrows that context.
struct RunClock {
    started: Instant,
    deadline: Instant,
    warn_at: Instant,
    warned: bool,
}

impl RunClock {
    /// Warn once when the run nears its deadline.
    fn check(&mut self) {
        let now = Instant::now();
        if self.warned || now < self.warn_at {
            return;
        }
        self.warned = true;
        if now < self.deadline {
            warn!(
                elapsed_ms = self.started.elapsed().as_millis() as u64,
                remaining_ms = (self.deadline - now).as_millis() as u64,
                "Orchestration approaching deadline"
            );
        }
    }
}

/// Bookkeeping for one run. Owned by a single `run_until` call.
struct Run {
    state: OrchestratorState,
    clock: RunClock,
    context: StepContext,
    steps_executed: u32,
    attempts: u32,
    trail: Vec<StepRecord>,
}

impl Run {
    fn enter(&mut self, target: OrchestratorState) {
        debug_assert!(
            self.state.can_transition_to(target),
            "invalid orchestrator transition {} -> {}",
            self.state,
            target
        );
        if self.state != target {
            debug!(from = %self.state, to = %target, "Orchestrator transition");
        }
        self.state = target;
    }

    fn finish(
        mut self,
        state: OrchestratorState,
        last_step: Option<StepId>,
        response_text: Option<String>,
        error: Option<OrchestrationError>,
    ) -> OrchestrationOutcome {
        self.enter(state);
        let elapsed = self.clock.started.elapsed();

        match &error {
            None => info!(
                state = %state,
                steps = self.steps_executed,
                attempts = self.attempts,
                elapsed_ms = elapsed.as_millis() as u64,
                "Orchestration finished"
            ),
            Some(e) => error!(
                state = %state,
                code = e.kind.code(),
                step = e.step.as_deref().unwrap_or("-"),
                steps = self.steps_executed,
                attempts = self.attempts,
                elapsed_ms = elapsed.as_millis() as u64,
                "Orchestration failed: {}",
                e.message
            ),
        }

        OrchestrationOutcome {
            state,
            context: self.context,
            response_text,
            error,
            last_step,
            steps_executed: self.steps_executed,
            attempts: self.attempts,
            trail: self.trail,
            elapsed,
        }
    }

    fn fail(self, step: Option<StepId>, error: OrchestrationError) -> OrchestrationOutcome {
        let state = error.kind.terminal_state();
        self.finish(state, step, None, Some(error))
    }
}

/// Drives the executor/router loop for one email at a time.
///
/// Holds no per-run state, so one instance can serve concurrent runs.
pub struct StepOrchestrator {
    executor: Arc<dyn StepExecutor>,
    router: StepRouter,
    config: OrchestratorConfig,
}

impl StepOrchestrator {
    pub fn new(
        executor: Arc<dyn StepExecutor>,
        catalog: Arc<StepCatalog>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            executor,
            router: StepRouter::new(catalog),
            config,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn catalog(&self) -> &StepCatalog {
        self.router.catalog()
    }

    /// Run to a terminal state within the configured overall timeout.
    pub async fn run(
        &self,
        context: StepContext,
        routing: StepRoutingResult,
    ) -> OrchestrationOutcome {
        let deadline = Instant::now() + self.config.overall_timeout;
        self.run_until(context, routing, deadline).await
    }

    /// Run to a terminal state, giving up at `deadline`.
    pub async fn run_until(
        &self,
        context: StepContext,
        routing: StepRoutingResult,
        deadline: Instant,
    ) -> OrchestrationOutcome {
        let started = Instant::now();
        let warn_at = (started + self.config.warn_after).min(deadline);
        let mut run = Run {
            state: OrchestratorState::Init,
            clock: RunClock {
                started,
                deadline,
                warn_at,
                warned: false,
            },
            context,
            steps_executed: 0,
            attempts: 0,
            trail: Vec::new(),
        };

        info!(
            entry = %routing.step,
            method = routing.method.label(),
            confidence = routing.confidence,
            max_steps = self.config.max_steps,
            "Starting orchestration"
        );
        run.enter(OrchestratorState::Running);

        let mut current = routing.step;

        loop {
            if run.steps_executed >= self.config.max_steps {
                let last = run.trail.last().map(|r| r.step.clone());
                let error = OrchestrationError::new(
                    FailureKind::StepLimitExceeded,
                    Some(&current),
                    format!(
                        "step limit of {} reached before running {current}",
                        self.config.max_steps
                    ),
                );
                return run.fail(last, error);
            }

            let step_started = Instant::now();
            let attempts_before = run.attempts;
            let result = match self.execute_with_retry(&current, &mut run).await {
                Ok(result) => result,
                Err(error) => return run.fail(Some(current), error),
            };

            run.steps_executed += 1;
            let directive = result.next.to_string();

            match self.router.route(result, &run.context) {
                RouteDecision::Continue {
                    next,
                    context,
                    applied_keys,
                } => {
                    info!(
                        step = %current,
                        next = %next,
                        applied = ?applied_keys,
                        "Step completed"
                    );
                    run.trail.push(StepRecord {
                        step: current.clone(),
                        directive,
                        attempts: run.attempts - attempts_before,
                        elapsed: step_started.elapsed(),
                        applied_keys,
                    });
                    run.context = context;
                    run.enter(OrchestratorState::Running);
                    current = next;
                }
                RouteDecision::Done {
                    context,
                    response_text,
                    applied_keys,
                } => {
                    info!(step = %current, applied = ?applied_keys, "Step signalled DONE");
                    run.trail.push(StepRecord {
                        step: current.clone(),
                        directive,
                        attempts: run.attempts - attempts_before,
                        elapsed: step_started.elapsed(),
                        applied_keys,
                    });
                    run.context = context;
                    return run.finish(
                        OrchestratorState::Done,
                        Some(current),
                        Some(response_text),
                        None,
                    );
                }
                RouteDecision::Error(route_error @ RouteError::UnknownStep { .. }) => {
                    let error = OrchestrationError::new(
                        FailureKind::UnknownStep,
                        Some(&current),
                        route_error.to_string(),
                    );
                    return run.fail(Some(current), error);
                }
            }
        }
    }

    /// Execute one step, retrying per the failure kind's budget.
    ///
    /// Every attempt sees the same context; nothing is merged until a result
    /// comes back.
    async fn execute_with_retry(
        &self,
        step: &StepId,
        run: &mut Run,
    ) -> Result<StepExecutionResult, OrchestrationError> {
        let mut transient_retries = 0;
        let mut parse_retries = 0;

        loop {
            if Instant::now() >= run.clock.deadline {
                return Err(self.deadline_error(step, run));
            }

            run.attempts += 1;
            let outcome = {
                let call =
                    AssertUnwindSafe(self.executor.execute(step, &run.context)).catch_unwind();
                let call = tokio::time::timeout_at(run.clock.deadline, call);
                tokio::pin!(call);
                let clock = &mut run.clock;
                loop {
                    tokio::select! {
                        outcome = &mut call => break outcome,
                        _ = tokio::time::sleep_until(clock.warn_at), if !clock.warned => clock.check(),
                    }
                }
            };

            let failure = match outcome {
                Err(_) => return Err(self.deadline_error(step, run)),
                Ok(Err(_panic)) => StepFailure::Fatal {
                    step: step.to_string(),
                    reason: "step executor panicked".to_string(),
                },
                Ok(Ok(Ok(result))) => return Ok(result),
                Ok(Ok(Err(failure))) => failure,
            };

            let (used, budget) = match &failure {
                StepFailure::Transient { .. } => {
                    (&mut transient_retries, self.config.max_retries_per_step)
                }
                StepFailure::Parse { .. } => (&mut parse_retries, self.config.parse_retries),
                StepFailure::Fatal { .. } => {
                    return Err(OrchestrationError::new(
                        FailureKind::FatalExecutorFailure,
                        Some(step),
                        failure.reason(),
                    ));
                }
            };

            if *used >= budget {
                let kind = FailureKind::from(&failure);
                let message = if budget == 0 {
                    failure.reason().to_string()
                } else {
                    format!("{} (gave up after {} retries)", failure.reason(), budget)
                };
                return Err(OrchestrationError::new(kind, Some(step), message));
            }
            *used += 1;
            let retry = *used;

            let backoff = self.config.retry_backoff.saturating_mul(retry);
            warn!(
                step = %step,
                retry,
                budget,
                backoff_ms = backoff.as_millis() as u64,
                error = %failure,
                "Step failed, retrying with unchanged context"
            );

            let wake = (Instant::now() + backoff).min(run.clock.deadline);
            tokio::time::sleep_until(wake).await;
            run.clock.check();
        }
    }

    fn deadline_error(&self, step: &StepId, run: &Run) -> OrchestrationError {
        OrchestrationError::new(
            FailureKind::DeadlineExceeded,
            Some(step),
            format!(
                "deadline exceeded after {}ms while running {step}",
                run.clock.started.elapsed().as_millis()
            ),
        )
    }
}
