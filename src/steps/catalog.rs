//! The closed set of steps a run may visit.

use crate::error::ConfigError;
use crate::steps::types::{DONE_SENTINEL, RoutingMethod, StepId, StepRoutingResult};

/// Known steps, in catalog order. The first one is the default entry step.
#[derive(Debug, Clone)]
pub struct StepCatalog {
    steps: Vec<StepId>,
}

impl StepCatalog {
    /// Build a catalog from step names. Order is preserved; duplicates are dropped.
    pub fn new<I, S>(names: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut steps: Vec<StepId> = Vec::new();
        for name in names {
            let name = name.as_ref().trim();
            if name.is_empty() {
                continue;
            }
            if name.eq_ignore_ascii_case(DONE_SENTINEL) {
                return Err(ConfigError::InvalidValue {
                    key: "steps".to_string(),
                    message: format!("'{name}' is reserved for the terminal directive"),
                });
            }
            if !steps.iter().any(|s| s.as_str() == name) {
                steps.push(StepId::new(name));
            }
        }

        if steps.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "steps".to_string(),
                message: "step catalog is empty".to_string(),
            });
        }

        Ok(Self { steps })
    }

    /// Validate a step name. Tolerates surrounding whitespace, a `.md` suffix,
    /// and case differences; anything else is unknown.
    pub fn resolve(&self, name: &str) -> Option<StepId> {
        let trimmed = name.trim();
        let bare = trimmed.strip_suffix(".md").unwrap_or(trimmed);

        self.steps
            .iter()
            .find(|s| s.as_str() == bare)
            .or_else(|| self.steps.iter().find(|s| s.as_str().eq_ignore_ascii_case(bare)))
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.resolve(name).is_some()
    }

    pub fn steps(&self) -> &[StepId] {
        &self.steps
    }

    pub fn names(&self) -> Vec<&str> {
        self.steps.iter().map(StepId::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Default entry: the first step in catalog order.
    pub fn default_route(&self) -> StepRoutingResult {
        StepRoutingResult::new(self.steps[0].clone(), 1.0, RoutingMethod::Default)
    }

    /// Entry routing for a run: the explicit step when given, else the default.
    pub fn entry_route(&self, explicit: Option<&str>) -> Result<StepRoutingResult, ConfigError> {
        match explicit {
            None => Ok(self.default_route()),
            Some(name) => self
                .resolve(name)
                .map(|step| StepRoutingResult::new(step, 1.0, RoutingMethod::Explicit))
                .ok_or_else(|| ConfigError::InvalidValue {
                    key: "entry_step".to_string(),
                    message: format!("unknown step '{name}'"),
                }),
        }
    }
}
