use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables of the orchestration loop.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Maximum number of output tokens per request.
    pub max_tokens: u32,
    /// Token budget of extended thinking, disabled if `None`.
    pub thinking_budget: Option<u32>,
    /// Maximum number of rounds in one run.
    pub max_rounds: usize,
    /// Deadline of a single round, tool dispatch included.
    pub round_timeout: Option<Duration>,
    /// How long to keep retrying a stream that failed to open because the
    /// endpoint was rate limited. Zero disables retries.
    pub open_retry_max_elapsed: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_tokens: 8192,
            thinking_budget: None,
            max_rounds: 16,
            round_timeout: None,
            open_retry_max_elapsed: Duration::from_secs(30),
        }
    }
}
