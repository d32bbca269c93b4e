use offer_agent_model::ToolUse;
use serde::{Deserialize, Serialize};

/// The events in a preset response.
///
/// Consecutive text (or reasoning) events are merged into one content
/// block, every other event closes the open block.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum PresetEvent {
    /// A fragment of reasoning text.
    Thinking(String),
    /// A fragment of plain text.
    Text(String),
    /// A tool invocation, streamed as several input fragments.
    ToolUse(ToolUse),
    /// A tool invocation whose streamed input fragments don't form valid
    /// JSON, while the finalized turn still carries the real input.
    GarbledToolUse(ToolUse),
    /// The stream fails at this point.
    Fail,
    /// The stream stops producing events without ending.
    Hang,
    /// The stream ends here without a complete message.
    Disconnect,
}

/// The preset response for an assistant step.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PresetResponse {
    /// Events in this response.
    pub events: Vec<PresetEvent>,
    /// If set, opening the response will fail in the first `failure`
    /// attempts. `Some(0)` means it will fail infinitely.
    pub failures: Option<u64>,
}

impl PresetResponse {
    /// Creates a `PresetResponse` with the specified events.
    #[inline]
    pub fn with_events(events: impl Into<Vec<PresetEvent>>) -> Self {
        Self {
            events: events.into(),
            failures: None,
        }
    }

    /// Sets failure times before a successful response. `0` means the
    /// response will always be a failure.
    #[inline]
    pub fn with_failures(mut self, failures: u64) -> Self {
        self.failures = Some(failures);
        self
    }
}
