use offer_agent_model::{
    ContentBlock, ModelMessage, ModelRequest, ModelTool, Role,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::AnthropicConfig;

// Room left for visible output when a thinking budget eats into
// `max_tokens`.
const MIN_OUTPUT_TOKENS: u32 = 1024;

// ------------------------------
// Types received from the server
// ------------------------------

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    MessageStart {
        message: MessageStart,
    },
    ContentBlockStart {
        index: usize,
        content_block: StartBlock,
    },
    ContentBlockDelta {
        index: usize,
        delta: BlockDelta,
    },
    ContentBlockStop {
        index: usize,
    },
    MessageDelta {
        delta: MessageDeltaBody,
    },
    MessageStop,
    Ping,
    Error {
        error: ErrorBody,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct MessageStart {
    pub id: String,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StartBlock {
    Thinking {
        #[serde(default)]
        thinking: String,
    },
    RedactedThinking {
        data: String,
    },
    Text {
        #[serde(default)]
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockDelta {
    ThinkingDelta { thinking: String },
    SignatureDelta { signature: String },
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
    #[serde(other)]
    Unknown,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct MessageDeltaBody {
    pub stop_reason: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ErrorBody {
    pub r#type: String,
    pub message: String,
}

// ------------------------
// Types sent to the server
// ------------------------

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
struct CacheControl {
    r#type: &'static str,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
struct SystemBlock {
    r#type: &'static str,
    text: String,
    cache_control: CacheControl,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
struct ThinkingConfig {
    r#type: &'static str,
    budget_tokens: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
struct Tool {
    name: String,
    description: String,
    input_schema: Value,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RequestBlock {
    Thinking {
        thinking: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
    RedactedThinking {
        data: String,
    },
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Message {
    role: &'static str,
    content: Vec<RequestBlock>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MessagesRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    system: Vec<SystemBlock>,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Tool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking: Option<ThinkingConfig>,
    stream: bool,
}

// -----------
// Conversions
// -----------

pub fn create_request(
    req: &ModelRequest,
    config: &AnthropicConfig,
) -> MessagesRequest {
    let mut max_tokens = req.max_tokens;
    let thinking = req.thinking_budget.map(|budget_tokens| {
        let needed = budget_tokens.saturating_add(MIN_OUTPUT_TOKENS);
        if needed > max_tokens {
            debug!(
                "raising max_tokens from {max_tokens} to fit thinking budget {budget_tokens}"
            );
            max_tokens = needed;
        }
        ThinkingConfig {
            r#type: "enabled",
            budget_tokens,
        }
    });

    MessagesRequest {
        model: config.model.clone(),
        max_tokens,
        system: req
            .system
            .iter()
            .map(|text| SystemBlock {
                r#type: "text",
                text: text.clone(),
                cache_control: CacheControl {
                    r#type: "ephemeral",
                },
            })
            .collect(),
        messages: req.messages.iter().map(create_message).collect(),
        tools: req.tools.iter().map(create_tool).collect(),
        thinking,
        stream: true,
    }
}

#[inline]
fn create_message(msg: &ModelMessage) -> Message {
    Message {
        role: match msg.role {
            Role::User => "user",
            Role::Assistant => "assistant",
        },
        content: msg.content.iter().map(create_block).collect(),
    }
}

#[inline]
fn create_block(block: &ContentBlock) -> RequestBlock {
    match block {
        ContentBlock::Thinking {
            thinking,
            signature,
        } => RequestBlock::Thinking {
            thinking: thinking.clone(),
            signature: signature.clone(),
        },
        ContentBlock::RedactedThinking { data } => {
            RequestBlock::RedactedThinking { data: data.clone() }
        }
        ContentBlock::Text { text } => RequestBlock::Text { text: text.clone() },
        ContentBlock::ToolUse { id, name, input } => RequestBlock::ToolUse {
            id: id.clone(),
            name: name.clone(),
            input: input.clone(),
        },
        ContentBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => RequestBlock::ToolResult {
            tool_use_id: tool_use_id.clone(),
            content: content.clone(),
            is_error: *is_error,
        },
    }
}

#[inline]
fn create_tool(tool: &ModelTool) -> Tool {
    Tool {
        name: tool.name.clone(),
        description: tool.description.clone(),
        input_schema: tool.input_schema.clone(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::AnthropicConfigBuilder;

    fn config() -> AnthropicConfig {
        AnthropicConfigBuilder::with_api_key("xxx")
            .with_model("custom")
            .build()
    }

    #[test]
    fn test_create_request() {
        let request = ModelRequest {
            system: Some("You prepare commercial offers.".to_owned()),
            messages: vec![
                ModelMessage::user_text("Sukomplektuokime HNVN10"),
                ModelMessage {
                    role: Role::Assistant,
                    content: vec![ContentBlock::ToolUse {
                        id: "t1".to_owned(),
                        name: "search_equipment".to_owned(),
                        input: json!({ "query": "HNVN10" }),
                    }],
                },
                ModelMessage {
                    role: Role::User,
                    content: vec![ContentBlock::ToolResult {
                        tool_use_id: "t1".to_owned(),
                        content: "[]".to_owned(),
                        is_error: false,
                    }],
                },
            ],
            tools: vec![ModelTool {
                name: "search_equipment".to_owned(),
                description: "Searches the catalog.".to_owned(),
                input_schema: json!({ "type": "object" }),
            }],
            max_tokens: 4096,
            thinking_budget: None,
        };

        let encoded =
            serde_json::to_value(create_request(&request, &config())).unwrap();
        assert_eq!(
            encoded,
            json!({
                "model": "custom",
                "max_tokens": 4096,
                "system": [{
                    "type": "text",
                    "text": "You prepare commercial offers.",
                    "cache_control": { "type": "ephemeral" }
                }],
                "messages": [
                    {
                        "role": "user",
                        "content": [{ "type": "text", "text": "Sukomplektuokime HNVN10" }]
                    },
                    {
                        "role": "assistant",
                        "content": [{
                            "type": "tool_use",
                            "id": "t1",
                            "name": "search_equipment",
                            "input": { "query": "HNVN10" }
                        }]
                    },
                    {
                        "role": "user",
                        "content": [{
                            "type": "tool_result",
                            "tool_use_id": "t1",
                            "content": "[]"
                        }]
                    }
                ],
                "tools": [{
                    "name": "search_equipment",
                    "description": "Searches the catalog.",
                    "input_schema": { "type": "object" }
                }],
                "stream": true
            })
        );
    }

    #[test]
    fn test_thinking_budget_raises_max_tokens() {
        let request = ModelRequest {
            system: None,
            messages: vec![ModelMessage::user_text("Hi")],
            tools: vec![],
            max_tokens: 2048,
            thinking_budget: Some(4000),
        };
        let encoded =
            serde_json::to_value(create_request(&request, &config())).unwrap();
        assert_eq!(encoded["max_tokens"], json!(5024));
        assert_eq!(
            encoded["thinking"],
            json!({ "type": "enabled", "budget_tokens": 4000 })
        );
        assert!(encoded.get("system").is_none());
    }

    #[test]
    fn test_huge_thinking_budget_saturates() {
        let request = ModelRequest {
            system: None,
            messages: vec![ModelMessage::user_text("Hi")],
            tools: vec![],
            max_tokens: 2048,
            thinking_budget: Some(u32::MAX - 10),
        };
        let encoded =
            serde_json::to_value(create_request(&request, &config())).unwrap();
        assert_eq!(encoded["max_tokens"], json!(u32::MAX));
    }

    #[test]
    fn test_redacted_thinking_is_sent_back() {
        let msg = ModelMessage {
            role: Role::Assistant,
            content: vec![
                ContentBlock::RedactedThinking {
                    data: "ZW5jcnlwdGVk".to_owned(),
                },
                ContentBlock::Text {
                    text: "Checking.".to_owned(),
                },
            ],
        };
        let encoded = serde_json::to_value(create_message(&msg)).unwrap();
        assert_eq!(
            encoded["content"][0],
            json!({ "type": "redacted_thinking", "data": "ZW5jcnlwdGVk" })
        );
    }

    #[test]
    fn test_decode_stream_events() {
        let event: StreamEvent = serde_json::from_str(
            r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{\"qu"}}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            StreamEvent::ContentBlockDelta {
                index: 1,
                delta: BlockDelta::InputJsonDelta {
                    partial_json: "{\"qu".to_owned()
                }
            }
        );

        let event: StreamEvent =
            serde_json::from_str(r#"{"type":"brand_new_event"}"#).unwrap();
        assert_eq!(event, StreamEvent::Unknown);
    }
}
