use std::pin::Pin;
use std::task::{self, Poll};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::provider::ModelProviderError;
use crate::request::{ContentBlock, ModelMessage, Role};

/// A streamed response from the model provider.
pub trait ModelResponse: Sized + Send + 'static {
    /// The error type that may be returned by the provider.
    type Error: ModelProviderError;

    /// Attempts to pull out the next event from the response.
    ///
    /// # Return value
    ///
    /// There are several possible return values, each indicating a
    /// distinct response state:
    ///
    /// - `Poll::Pending` means that this response is still waiting for
    ///   the next event. Implementations will ensure that the current
    ///   task will be notified when the next event may be ready.
    /// - `Poll::Ready(Ok(Some(event)))` means the response has an event
    ///   to deliver, and may produce further events on subsequent
    ///   `poll_next_event` calls.
    /// - `Poll::Ready(Ok(None))` means the endpoint signaled the end of
    ///   the response.
    /// - `Poll::Ready(Err(error))` means an error occurred while
    ///   processing the response.
    ///
    /// Calling this method after completion should always return `None`.
    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>>;

    /// Returns the fully materialized turn of this response.
    ///
    /// You should call this method after polling all events from this
    /// response, and the implementations should always return the same
    /// turn for one response. `None` means the response ended without
    /// a complete message.
    fn finalized_turn(&self) -> Option<FinalizedTurn>;
}

/// The event from a streamed model response.
///
/// Events describe content blocks as they are generated: a block is
/// opened implicitly by its first delta (or explicitly for tool
/// invocations), and closed by [`ModelResponseEvent::BlockStop`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelResponseEvent {
    /// Received a fragment of reasoning text.
    ThinkingDelta(String),
    /// Received a fragment of plain text.
    TextDelta(String),
    /// A tool invocation block has started.
    ToolUseStart {
        /// Identifier of the invocation.
        id: String,
        /// Declared name of the tool.
        name: String,
    },
    /// Received a fragment of the raw JSON input for the open invocation.
    ToolInputDelta(String),
    /// The current content block has ended.
    BlockStop,
}

/// The reason why a model response has finished.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The model finished its turn.
    EndTurn,
    /// The model needs to call tools.
    ToolUse,
    /// The output token limit was hit.
    MaxTokens,
    /// A stop sequence was generated.
    StopSequence,
    /// Any reason this crate doesn't know about.
    #[serde(other)]
    Other,
}

impl StopReason {
    /// Parses the wire representation of a stop reason.
    pub fn from_wire(reason: &str) -> Self {
        match reason {
            "end_turn" => StopReason::EndTurn,
            "tool_use" => StopReason::ToolUse,
            "max_tokens" => StopReason::MaxTokens,
            "stop_sequence" => StopReason::StopSequence,
            _ => StopReason::Other,
        }
    }
}

/// A tool invocation taken from a finalized turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolUse {
    /// Unique identifier of the invocation.
    pub id: String,
    /// Name of the tool to call.
    pub name: String,
    /// Structured input of the invocation.
    pub input: Value,
}

/// The authoritative assistant turn, materialized by the provider after
/// the stream has ended.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FinalizedTurn {
    /// Identifier of the message assigned by the endpoint.
    pub id: String,
    /// Ordered content blocks of the turn.
    pub content: Vec<ContentBlock>,
    /// Why the model stopped generating.
    pub stop_reason: Option<StopReason>,
}

impl FinalizedTurn {
    /// Returns the tool invocations of this turn, in generation order.
    pub fn tool_uses(&self) -> Vec<ToolUse> {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolUse { id, name, input } => Some(ToolUse {
                    id: id.clone(),
                    name: name.clone(),
                    input: input.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    /// Concatenates the plain text blocks of this turn.
    pub fn text(&self) -> String {
        let mut text = String::new();
        for block in &self.content {
            if let ContentBlock::Text { text: t } = block {
                text.push_str(t);
            }
        }
        text
    }

    /// Concatenates the reasoning blocks of this turn.
    pub fn thinking(&self) -> String {
        let mut thinking = String::new();
        for block in &self.content {
            if let ContentBlock::Thinking { thinking: t, .. } = block {
                thinking.push_str(t);
            }
        }
        thinking
    }

    /// Converts this turn into an assistant turn for a follow-up request.
    ///
    /// Reasoning blocks with empty text are dropped, since the endpoint
    /// rejects them when they are sent back.
    pub fn into_followup_message(self) -> ModelMessage {
        let content = self
            .content
            .into_iter()
            .filter(|block| {
                !matches!(
                    block,
                    ContentBlock::Thinking { thinking, .. } if thinking.trim().is_empty()
                )
            })
            .collect();
        ModelMessage {
            role: Role::Assistant,
            content,
        }
    }
}
