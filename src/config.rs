//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

/// Default directory holding the step instruction documents.
pub const DEFAULT_INSTRUCTIONS_DIR: &str = "./instructions";

/// Orchestrator bounds: step limit, retry budgets, and the overall deadline.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Maximum number of successful step executions per email.
    pub max_steps: u32,
    /// Extra attempts allowed for a step after a transient executor failure.
    pub max_retries_per_step: u32,
    /// Extra attempts allowed for a step whose reply could not be parsed.
    pub parse_retries: u32,
    /// Overall budget for one email's run, all attempts included.
    pub overall_timeout: Duration,
    /// Elapsed time after which a run logs that it is nearing the deadline.
    pub warn_after: Duration,
    /// Base delay between retries; attempt `n` waits `n * retry_backoff`.
    pub retry_backoff: Duration,
    /// Explicit entry step. `None` uses the first step of the catalog.
    pub entry_step: Option<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_steps: 10,
            max_retries_per_step: 2,
            parse_retries: 0,
            overall_timeout: Duration::from_secs(30),
            warn_after: Duration::from_secs(25),
            retry_backoff: Duration::from_millis(500),
            entry_step: None,
        }
    }
}

impl OrchestratorConfig {
    /// Build config from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let overall_timeout = env_parse::<u64>("WARRANTY_TIMEOUT_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.overall_timeout);

        // The warning must fire before the deadline, never after it.
        let warn_after = env_parse::<u64>("WARRANTY_WARN_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.warn_after)
            .min(overall_timeout);

        Self {
            max_steps: env_parse("WARRANTY_MAX_STEPS")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_steps),
            max_retries_per_step: env_parse("WARRANTY_MAX_RETRIES")
                .unwrap_or(defaults.max_retries_per_step),
            parse_retries: env_parse("WARRANTY_PARSE_RETRIES").unwrap_or(defaults.parse_retries),
            overall_timeout,
            warn_after,
            retry_backoff: env_parse::<u64>("WARRANTY_RETRY_BACKOFF_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_backoff),
            entry_step: std::env::var("WARRANTY_ENTRY_STEP")
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
        }
    }
}

/// Base URLs of the warranty and ticketing backends.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub warranty_url: String,
    pub ticket_url: String,
    pub request_timeout: Duration,
}

impl ServiceConfig {
    /// Build config from environment variables.
    /// Returns `None` if either backend URL is unset (tools disabled).
    pub fn from_env() -> Option<Self> {
        let warranty_url = std::env::var("WARRANTY_SERVICE_URL").ok()?;
        let ticket_url = std::env::var("TICKET_SERVICE_URL").ok()?;
        Some(Self {
            warranty_url: warranty_url.trim_end_matches('/').to_string(),
            ticket_url: ticket_url.trim_end_matches('/').to_string(),
            request_timeout: env_parse::<u64>("WARRANTY_SERVICE_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(Duration::from_secs(10)),
        })
    }
}

/// Directory holding one `<step-name>.md` instruction document per step.
pub fn instructions_dir_from_env() -> PathBuf {
    std::env::var("WARRANTY_INSTRUCTIONS_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_INSTRUCTIONS_DIR))
}

/// Parse an environment variable, treating unset or unparsable values as absent.
pub(crate) fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_warn_before_deadline() {
        let config = OrchestratorConfig::default();
        assert!(config.warn_after < config.overall_timeout);
        assert_eq!(config.max_steps, 10);
        assert_eq!(config.max_retries_per_step, 2);
        assert_eq!(config.parse_retries, 0);
        assert!(config.entry_step.is_none());
    }

    #[test]
    fn env_parse_missing_is_none() {
        assert_eq!(env_parse::<u32>("WARRANTY_TEST_UNSET_VARIABLE_XYZ"), None);
    }
}
