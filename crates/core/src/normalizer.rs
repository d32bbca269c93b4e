//! Turns persisted history into a request sequence the endpoint accepts.

use std::fmt::{self, Display};

use offer_agent_model::{ModelMessage, Role};

use crate::conversation::{Message, MessageContent};
use crate::transcript;

/// Markers that prefix synthetic tool result placeholders written by older
/// clients.
const SYNTHETIC_MARKERS: &[&str] =
    &["[tool_result", "[tool_use", "[Tool result", "[Tool call"];
/// Prefix of tool invocation ids assigned by the endpoint.
const INTERNAL_ID_PREFIX: &str = "toolu_";

/// Why a message was left out of the request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RejectReason {
    /// The content isn't plain text.
    LegacyContent,
    /// The content is empty, or only had a transcript.
    Empty,
    /// The content is `{}` or `[]`.
    EmptyLiteral,
    /// The content starts with a synthetic tool result marker.
    SyntheticMarker,
    /// The content carries an internal tool invocation id.
    InternalToolId,
    /// The request can't start with an assistant turn.
    LeadingAssistant,
    /// The role is the same as the previous accepted turn.
    SameRole,
    /// A trailing user turn replaced by the outgoing message.
    Superseded,
}

impl Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            RejectReason::LegacyContent => "content is not plain text",
            RejectReason::Empty => "content is empty",
            RejectReason::EmptyLiteral => "content is an empty literal",
            RejectReason::SyntheticMarker => "synthetic tool result",
            RejectReason::InternalToolId => "contains an internal tool id",
            RejectReason::LeadingAssistant => "leading assistant turn",
            RejectReason::SameRole => "same role as the previous turn",
            RejectReason::Superseded => "superseded by the outgoing message",
        };
        f.write_str(reason)
    }
}

/// A message left out of the request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rejection {
    /// Index in the history, the outgoing message takes `history.len()`.
    pub index: usize,
    /// Identifier of the message.
    pub message_id: String,
    /// Why it was left out.
    pub reason: RejectReason,
}

/// The result of [`normalize`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Normalized {
    /// Strictly alternating turns, starting with a user turn.
    pub messages: Vec<ModelMessage>,
    /// Messages that were left out, in history order.
    pub rejected: Vec<Rejection>,
}

fn contains_internal_id(text: &str) -> bool {
    text.match_indices(INTERNAL_ID_PREFIX).any(|(pos, _)| {
        text[pos + INTERNAL_ID_PREFIX.len()..]
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphanumeric())
    })
}

/// Checks a single message, returning the text to send.
fn check(msg: &Message) -> Result<String, RejectReason> {
    let MessageContent::Text(raw) = &msg.content else {
        return Err(RejectReason::LegacyContent);
    };
    let text = transcript::strip(raw);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(RejectReason::Empty);
    }
    if trimmed == "{}" || trimmed == "[]" {
        return Err(RejectReason::EmptyLiteral);
    }
    if SYNTHETIC_MARKERS.iter().any(|m| trimmed.starts_with(m)) {
        return Err(RejectReason::SyntheticMarker);
    }
    if contains_internal_id(trimmed) {
        return Err(RejectReason::InternalToolId);
    }
    Ok(text)
}

fn reject(
    rejected: &mut Vec<Rejection>,
    index: usize,
    msg: &Message,
    reason: RejectReason,
) {
    if reason == RejectReason::SameRole {
        warn!("skipping message {index} ({}): {reason}", msg.id);
    } else {
        debug!("skipping message {index} ({}): {reason}", msg.id);
    }
    rejected.push(Rejection {
        index,
        message_id: msg.id.clone(),
        reason,
    });
}

/// Builds the request sequence from `history` followed by `outgoing`.
///
/// This never fails: unusable messages are skipped and reported in
/// [`Normalized::rejected`]. A user turn left at the end of the history
/// (e.g. from an aborted round) gives way to the outgoing message.
pub fn normalize(history: &[Message], outgoing: &Message) -> Normalized {
    let mut normalized = Normalized::default();
    // Message indices of the accepted turns, parallel to `messages`.
    let mut accepted: Vec<usize> = Vec::new();

    let all = history.iter().chain(std::iter::once(outgoing));
    for (index, msg) in all.enumerate() {
        let is_outgoing = index == history.len();
        let text = match check(msg) {
            Ok(text) => text,
            Err(reason) => {
                reject(&mut normalized.rejected, index, msg, reason);
                continue;
            }
        };

        match normalized.messages.last().map(|m| m.role) {
            None if msg.role == Role::Assistant => {
                let reason = RejectReason::LeadingAssistant;
                reject(&mut normalized.rejected, index, msg, reason);
                continue;
            }
            Some(last) if last == msg.role => {
                if !is_outgoing {
                    let reason = RejectReason::SameRole;
                    reject(&mut normalized.rejected, index, msg, reason);
                    continue;
                }
                // The outgoing message wins over a stale trailing turn.
                normalized.messages.pop();
                if let Some(stale) = accepted.pop() {
                    let stale_msg = &history[stale];
                    let reason = RejectReason::Superseded;
                    reject(&mut normalized.rejected, stale, stale_msg, reason);
                }
            }
            _ => {}
        }

        let mut turn = ModelMessage::user_text(text);
        turn.role = msg.role;
        normalized.messages.push(turn);
        accepted.push(index);
    }

    normalized.rejected.sort_by_key(|r| r.index);
    normalized
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::transcript::{TranscriptEntry, embed};

    fn roles(normalized: &Normalized) -> Vec<Role> {
        normalized.messages.iter().map(|m| m.role).collect()
    }

    #[test]
    fn test_empty_history() {
        let normalized =
            normalize(&[], &Message::user("Sukomplektuokime HNVN10"));
        assert_eq!(
            normalized.messages,
            vec![ModelMessage::user_text("Sukomplektuokime HNVN10")]
        );
        assert!(normalized.rejected.is_empty());
    }

    #[test]
    fn test_rejects_placeholders() {
        let history = vec![
            Message::user("Hello"),
            Message::legacy(Role::Assistant, json!([{ "type": "text" }])),
            Message::assistant("{}"),
            Message::assistant("[tool_result] 3 items"),
            Message::assistant("Called toolu_01AbC for you"),
            Message::assistant(""),
            Message::assistant("Hi! How can I help?"),
        ];
        let normalized = normalize(&history, &Message::user("Quote please"));
        assert_eq!(
            roles(&normalized),
            vec![Role::User, Role::Assistant, Role::User]
        );
        let reasons: Vec<RejectReason> =
            normalized.rejected.iter().map(|r| r.reason).collect();
        assert_eq!(
            reasons,
            vec![
                RejectReason::LegacyContent,
                RejectReason::EmptyLiteral,
                RejectReason::SyntheticMarker,
                RejectReason::InternalToolId,
                RejectReason::Empty,
            ]
        );
    }

    #[test]
    fn test_strips_transcript() {
        let entries = [TranscriptEntry {
            name: "search_equipment".to_owned(),
            input: json!({ "query": "HNVN10" }),
            result: Some("toolu_ref_1".to_owned()),
        }];
        let history = vec![
            Message::user("Find HNVN10"),
            Message::assistant(embed("Found it.", &entries)),
        ];
        let normalized = normalize(&history, &Message::user("Thanks"));
        assert_eq!(normalized.messages[1].text(), "Found it.");
        assert!(normalized.rejected.is_empty());
    }

    #[test]
    fn test_alternation() {
        let history = vec![
            Message::assistant("Welcome!"),
            Message::user("One"),
            Message::user("Two"),
            Message::assistant("A"),
            Message::assistant("B"),
            Message::user("Three"),
        ];
        let normalized = normalize(&history, &Message::user("Four"));
        for pair in normalized.messages.windows(2) {
            assert_ne!(pair[0].role, pair[1].role);
        }
        assert_eq!(normalized.messages[0].role, Role::User);
        let texts: Vec<String> =
            normalized.messages.iter().map(|m| m.text()).collect();
        assert_eq!(texts, vec!["One", "A", "Four"]);
        let reasons: Vec<(usize, RejectReason)> = normalized
            .rejected
            .iter()
            .map(|r| (r.index, r.reason))
            .collect();
        assert_eq!(
            reasons,
            vec![
                (0, RejectReason::LeadingAssistant),
                (2, RejectReason::SameRole),
                (4, RejectReason::SameRole),
                (5, RejectReason::Superseded),
            ]
        );
    }
}
