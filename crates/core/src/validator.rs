//! Checks the tool pairing rules of a request before it is sent.

use std::collections::HashSet;

use offer_agent_model::{ContentBlock, ModelMessage, Role};
use thiserror::Error;

/// A request sequence that the endpoint would reject.
///
/// This always indicates a bug in history normalization or in the loop,
/// so it is never retried.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("structural violation: {}", .reasons.join("; "))]
pub struct StructuralViolation {
    /// Every problem found, in turn order.
    pub reasons: Vec<String>,
}

/// Validates `messages`, collecting every violation before failing.
pub fn validate(messages: &[ModelMessage]) -> Result<(), StructuralViolation> {
    let mut reasons = Vec::new();

    match messages.first() {
        None => reasons.push("request has no turns".to_owned()),
        Some(first) if first.role != Role::User => {
            reasons.push("turn 0: request must start with a user turn".to_owned())
        }
        _ => {}
    }

    for (idx, msg) in messages.iter().enumerate() {
        if idx > 0 && messages[idx - 1].role == msg.role {
            reasons.push(format!("turn {idx}: same role as the previous turn"));
        }

        let tool_use_ids = msg.tool_use_ids();
        let result_ids = msg.tool_result_ids();

        if !result_ids.is_empty() {
            let announced: HashSet<&str> = idx
                .checked_sub(1)
                .map(|prev| &messages[prev])
                .filter(|prev| prev.role == Role::Assistant)
                .map(|prev| prev.tool_use_ids().into_iter().collect())
                .unwrap_or_default();
            for id in &result_ids {
                if !announced.contains(id) {
                    reasons.push(format!("turn {idx}: orphan result for `{id}`"));
                }
            }
        }

        if tool_use_ids.is_empty() {
            continue;
        }
        if msg.role == Role::User {
            reasons.push(format!("turn {idx}: tool use in a user turn"));
            continue;
        }

        let mut seen = HashSet::new();
        for id in &tool_use_ids {
            if id.is_empty() {
                reasons.push(format!("turn {idx}: tool use without an id"));
            } else if !seen.insert(*id) {
                reasons.push(format!("turn {idx}: duplicate tool use `{id}`"));
            }
        }

        let next_idx = idx + 1;
        let Some(next) = messages.get(next_idx) else {
            reasons.push(format!(
                "turn {idx}: tool use is not followed by any turn"
            ));
            continue;
        };
        if next.role != msg.role.opposite() {
            reasons.push(format!(
                "turn {next_idx}: expected a {} turn after tool use",
                msg.role.opposite()
            ));
        }
        if next
            .content
            .iter()
            .any(|block| !matches!(block, ContentBlock::ToolResult { .. }))
        {
            reasons.push(format!(
                "turn {next_idx}: carries content other than tool results"
            ));
        }

        let next_result_ids = next.tool_result_ids();
        let mut counted = HashSet::new();
        for id in &next_result_ids {
            if !counted.insert(*id) {
                reasons.push(format!(
                    "turn {next_idx}: duplicate result for `{id}`"
                ));
            }
        }
        for id in &tool_use_ids {
            if !id.is_empty() && !counted.contains(id) {
                reasons.push(format!(
                    "turn {next_idx}: missing result for `{id}`"
                ));
            }
        }
    }

    if reasons.is_empty() {
        Ok(())
    } else {
        error!("request failed validation: {reasons:?}");
        Err(StructuralViolation { reasons })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn tool_use(id: &str) -> ContentBlock {
        ContentBlock::ToolUse {
            id: id.to_owned(),
            name: "search_equipment".to_owned(),
            input: json!({}),
        }
    }

    fn tool_result(id: &str) -> ContentBlock {
        ContentBlock::ToolResult {
            tool_use_id: id.to_owned(),
            content: "[]".to_owned(),
            is_error: false,
        }
    }

    fn turn(role: Role, content: Vec<ContentBlock>) -> ModelMessage {
        ModelMessage { role, content }
    }

    #[test]
    fn test_valid_pairing() {
        let messages = vec![
            ModelMessage::user_text("Quote HNVN10"),
            turn(Role::Assistant, vec![tool_use("t1"), tool_use("t2")]),
            turn(Role::User, vec![tool_result("t2"), tool_result("t1")]),
        ];
        assert_eq!(validate(&messages), Ok(()));
    }

    #[test]
    fn test_trailing_tool_use() {
        let messages = vec![
            ModelMessage::user_text("Quote HNVN10"),
            turn(Role::Assistant, vec![tool_use("t1")]),
        ];
        let err = validate(&messages).unwrap_err();
        assert_eq!(
            err.reasons,
            vec!["turn 1: tool use is not followed by any turn"]
        );
    }

    #[test]
    fn test_collects_every_reason() {
        let messages = vec![
            ModelMessage::user_text("Quote HNVN10"),
            turn(Role::Assistant, vec![tool_use("t1"), tool_use("t2")]),
            turn(
                Role::User,
                vec![
                    tool_result("t1"),
                    tool_result("t1"),
                    ContentBlock::Text {
                        text: "and also".to_owned(),
                    },
                ],
            ),
            turn(Role::Assistant, vec![ContentBlock::Text {
                text: "Done".to_owned(),
            }]),
            turn(Role::User, vec![tool_result("t9")]),
        ];
        let err = validate(&messages).unwrap_err();
        assert_eq!(
            err.reasons,
            vec![
                "turn 2: carries content other than tool results",
                "turn 2: duplicate result for `t1`",
                "turn 2: missing result for `t2`",
                "turn 4: orphan result for `t9`",
            ]
        );
    }

    #[test]
    fn test_empty_and_misplaced() {
        let err = validate(&[]).unwrap_err();
        assert_eq!(err.reasons, vec!["request has no turns"]);

        let messages = vec![
            turn(Role::User, vec![tool_use("t1")]),
            turn(Role::User, vec![tool_result("t1")]),
        ];
        let err = validate(&messages).unwrap_err();
        assert_eq!(
            err.reasons,
            vec![
                "turn 0: tool use in a user turn",
                "turn 1: same role as the previous turn",
                "turn 1: orphan result for `t1`",
            ]
        );
    }
}
