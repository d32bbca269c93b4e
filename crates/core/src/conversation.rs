//! Conversation-related types.

use chrono::{DateTime, Utc};
pub use offer_agent_model::Role;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::Error;
use crate::artifact::Artifact;

/// The content of a persisted message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Plain text, possibly with an embedded tool transcript.
    Text(String),
    /// Structured content written by an older schema. It is kept for
    /// display but never sent to the model.
    Legacy(Value),
}

impl MessageContent {
    /// Returns the text if this is plain text content.
    #[inline]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MessageContent::Text(text) => Some(text),
            MessageContent::Legacy(_) => None,
        }
    }
}

/// A button of an interactive choice.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceOption {
    /// Text shown on the button.
    pub label: String,
    /// Text sent back to the model when selected, defaults to the label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl ChoiceOption {
    /// Returns the text sent back to the model for this option.
    #[inline]
    pub fn reply(&self) -> &str {
        self.value.as_deref().unwrap_or(&self.label)
    }
}

/// A set of buttons the user picks one answer from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractiveChoice {
    /// The question shown above the buttons.
    pub prompt: String,
    /// Available answers.
    pub options: Vec<ChoiceOption>,
    /// Index of the selected option. Set at most once.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected: Option<usize>,
}

impl InteractiveChoice {
    /// Records the selection of the option at `index`.
    pub fn select(&mut self, index: usize) -> Result<&ChoiceOption, Error> {
        if let Some(selected) = self.selected {
            return Err(Error::Choice(format!(
                "option {selected} has already been selected"
            )));
        }
        if index >= self.options.len() {
            return Err(Error::Choice(format!(
                "option {index} is out of range ({} options)",
                self.options.len()
            )));
        }
        self.selected = Some(index);
        Ok(&self.options[index])
    }
}

/// A persisted conversation message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier.
    pub id: String,
    /// Who wrote the message.
    pub role: Role,
    /// The message content.
    pub content: MessageContent,
    /// Reasoning text produced alongside an assistant message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    /// Buttons attached to the message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choice: Option<InteractiveChoice>,
    /// Silent messages are sent to the model but not rendered.
    #[serde(default)]
    pub silent: bool,
    /// When the message was created.
    pub created_at: DateTime<Utc>,
}

impl Message {
    fn new(role: Role, content: MessageContent) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content,
            thinking: None,
            choice: None,
            silent: false,
            created_at: Utc::now(),
        }
    }

    /// Creates a user message.
    #[inline]
    pub fn user<S: Into<String>>(text: S) -> Self {
        Self::new(Role::User, MessageContent::Text(text.into()))
    }

    /// Creates an assistant message.
    #[inline]
    pub fn assistant<S: Into<String>>(text: S) -> Self {
        Self::new(Role::Assistant, MessageContent::Text(text.into()))
    }

    /// Creates a message with content from an older schema.
    #[inline]
    pub fn legacy(role: Role, content: Value) -> Self {
        Self::new(role, MessageContent::Legacy(content))
    }

    /// Attaches reasoning text, empty text is ignored.
    #[inline]
    pub fn with_thinking<S: Into<String>>(mut self, thinking: S) -> Self {
        let thinking = thinking.into();
        self.thinking = (!thinking.is_empty()).then_some(thinking);
        self
    }

    /// Attaches an interactive choice.
    #[inline]
    pub fn with_choice(mut self, choice: InteractiveChoice) -> Self {
        self.choice = Some(choice);
        self
    }

    /// Marks the message as silent.
    #[inline]
    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    /// Returns the text content, if any.
    #[inline]
    pub fn text(&self) -> Option<&str> {
        self.content.as_text()
    }
}

/// Represents a conversation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    /// Unique identifier.
    pub id: String,
    /// The project this conversation belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    /// Display title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Messages in creation order.
    pub messages: Vec<Message>,
    /// The current offer artifact.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<Artifact>,
    /// Number of messages, kept in sync by [`Conversation::push_message`].
    pub message_count: usize,
    /// Time of the last mutation.
    pub last_activity: DateTime<Utc>,
}

impl Conversation {
    /// Creates an empty conversation.
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self {
            id: id.into(),
            project_id: None,
            title: None,
            messages: vec![],
            artifact: None,
            message_count: 0,
            last_activity: Utc::now(),
        }
    }

    /// Sets the owning project.
    #[inline]
    pub fn with_project<S: Into<String>>(mut self, project_id: S) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    /// Appends a message and updates the counters.
    pub fn push_message(&mut self, msg: Message) {
        self.messages.push(msg);
        self.touch();
    }

    /// Replaces the artifact and updates the counters.
    pub fn set_artifact(&mut self, artifact: Artifact) {
        self.artifact = Some(artifact);
        self.touch();
    }

    /// Finds a message by its identifier.
    #[inline]
    pub fn message_mut(&mut self, id: &str) -> Option<&mut Message> {
        self.messages.iter_mut().find(|msg| msg.id == id)
    }

    fn touch(&mut self) {
        self.message_count = self.messages.len();
        self.last_activity = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_choice_single_selection() {
        let mut choice = InteractiveChoice {
            prompt: "Which tank?".to_owned(),
            options: vec![
                ChoiceOption {
                    label: "Plastic".to_owned(),
                    value: None,
                },
                ChoiceOption {
                    label: "Concrete".to_owned(),
                    value: Some("concrete tank".to_owned()),
                },
            ],
            selected: None,
        };
        assert!(choice.select(5).is_err());
        assert_eq!(choice.select(1).unwrap().reply(), "concrete tank");
        assert!(matches!(choice.select(0), Err(Error::Choice(_))));
        assert_eq!(choice.selected, Some(1));
    }

    #[test]
    fn test_legacy_content_deserializes() {
        let msg: Message = serde_json::from_value(json!({
            "id": "m1",
            "role": "assistant",
            "content": [{ "type": "text", "text": "old" }],
            "created_at": "2024-05-01T10:00:00Z"
        }))
        .unwrap();
        assert!(matches!(msg.content, MessageContent::Legacy(_)));
        assert!(msg.text().is_none());
        assert!(!msg.silent);

        let msg = Message::user("Labas");
        assert_eq!(msg.text(), Some("Labas"));
    }

    #[test]
    fn test_push_message_updates_counters() {
        let mut conversation = Conversation::new("c1");
        let before = conversation.last_activity;
        conversation.push_message(Message::user("Hi"));
        conversation.push_message(Message::assistant("Hello"));
        assert_eq!(conversation.message_count, 2);
        assert!(conversation.last_activity >= before);
    }
}
