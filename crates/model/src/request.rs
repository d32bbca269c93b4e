use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A request to be sent to the model provider.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelRequest {
    /// The system instructions. Providers that support prompt caching
    /// should mark them as cacheable, since they rarely change between
    /// rounds.
    pub system: Option<String>,
    /// The input turns, alternating between user and assistant.
    pub messages: Vec<ModelMessage>,
    /// Tools that are available to the model.
    pub tools: Vec<ModelTool>,
    /// The maximum number of tokens to generate.
    pub max_tokens: u32,
    /// Token budget for extended thinking. `None` disables it.
    pub thinking_budget: Option<u32>,
}

/// The author of a turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user, or tool results sent on their behalf.
    User,
    /// The model.
    Assistant,
}

impl Role {
    /// Returns the other role.
    #[inline]
    pub fn opposite(self) -> Self {
        match self {
            Role::User => Role::Assistant,
            Role::Assistant => Role::User,
        }
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// A single turn in the request sequence.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelMessage {
    /// Who authored the turn.
    pub role: Role,
    /// Ordered content blocks of the turn.
    pub content: Vec<ContentBlock>,
}

impl ModelMessage {
    /// Creates a user turn with a single text block.
    #[inline]
    pub fn user_text<S: Into<String>>(text: S) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    /// Creates an assistant turn with a single text block.
    #[inline]
    pub fn assistant_text<S: Into<String>>(text: S) -> Self {
        Self {
            role: Role::Assistant,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    /// Returns the ids of all tool invocations in this turn.
    pub fn tool_use_ids(&self) -> Vec<&str> {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolUse { id, .. } => Some(id.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Returns the referenced invocation ids of all tool results in this
    /// turn.
    pub fn tool_result_ids(&self) -> Vec<&str> {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolResult { tool_use_id, .. } => {
                    Some(tool_use_id.as_str())
                }
                _ => None,
            })
            .collect()
    }

    /// Concatenates all text blocks of this turn.
    pub fn text(&self) -> String {
        let mut text = String::new();
        for block in &self.content {
            if let ContentBlock::Text { text: t } = block {
                text.push_str(t);
            }
        }
        text
    }
}

/// A block of content in a turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Extended reasoning produced by the model.
    Thinking {
        /// The reasoning text.
        thinking: String,
        /// Opaque signature the endpoint requires when the block is
        /// echoed back in a follow-up request.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
    /// Reasoning the endpoint returned encrypted. It has nothing to
    /// display, but must be sent back with the rest of the turn.
    RedactedThinking {
        /// The encrypted payload.
        data: String,
    },
    /// Plain text.
    Text {
        /// The text.
        text: String,
    },
    /// A tool invocation requested by the model.
    ToolUse {
        /// Unique identifier of the invocation.
        id: String,
        /// Name of the tool to call.
        name: String,
        /// Structured input of the invocation.
        input: Value,
    },
    /// The outcome of a tool invocation.
    ToolResult {
        /// Identifier of the invocation this result answers.
        tool_use_id: String,
        /// The output payload. Failures carry a structured error envelope.
        content: String,
        /// Whether the invocation failed.
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

/// Describes a tool that can be used by the model.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelTool {
    /// Name of the tool.
    pub name: String,
    /// Description of the tool.
    pub description: String,
    /// Input definition of the tool.
    ///
    /// For most model providers, the input should typically be defined by
    /// a [JSON schema](https://json-schema.org/).
    pub input_schema: Value,
}
