//! Live classification of a streamed response.
//!
//! Everything accumulated here is a preview for the presentation layer.
//! Control flow must read the finalized turn from the provider instead,
//! which is why [`StreamingPreview`] shares no type with
//! [`offer_agent_model::FinalizedTurn`].

use offer_agent_model::ModelResponseEvent;
use serde_json::{Map, Value};

use crate::offer;

/// A change of the live preview.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PreviewSignal {
    /// A fragment of reasoning text.
    Reasoning(String),
    /// The complete chat-visible text so far.
    Chat(String),
    /// The offer open tag has been received.
    ArtifactStarted,
    /// The complete offer payload so far.
    Artifact(String),
    /// The offer close tag has been received.
    ArtifactClosed,
    /// A tool invocation is being generated.
    ToolActive {
        /// Declared name of the tool.
        name: String,
    },
    /// The tool invocation block has ended.
    ToolInactive,
}

/// A tool invocation reconstructed from streamed fragments.
#[derive(Clone, Debug, PartialEq)]
pub struct PreviewInvocation {
    /// Identifier of the invocation.
    pub id: String,
    /// Name of the tool.
    pub name: String,
    /// Parsed input.
    pub input: Value,
}

/// State accumulated from the stream.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StreamingPreview {
    /// Reasoning text.
    pub reasoning: String,
    /// Plain text, offer block included.
    pub text: String,
    /// Reasoning and plain text interleaved as received.
    pub full_text: String,
    /// Plain text outside the offer block.
    pub chat: String,
    /// Offer payload received so far.
    pub artifact: Option<String>,
    /// Whether the stream is inside the offer block.
    pub in_artifact: bool,
    /// Invocations whose input parsed.
    pub invocations: Vec<PreviewInvocation>,
}

struct OpenInvocation {
    id: String,
    name: String,
    raw_input: String,
}

/// Splits streamed events into chat text, offer payload and tool activity.
#[derive(Default)]
pub struct StreamClassifier {
    preview: StreamingPreview,
    open_invocation: Option<OpenInvocation>,
    artifact_started: bool,
}

impl StreamClassifier {
    /// Creates a classifier with an empty preview.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current preview.
    #[inline]
    pub fn preview(&self) -> &StreamingPreview {
        &self.preview
    }

    /// Consumes the classifier, returning the preview.
    #[inline]
    pub fn into_preview(self) -> StreamingPreview {
        self.preview
    }

    /// Feeds one event, returning the preview changes it caused.
    pub fn feed(&mut self, event: &ModelResponseEvent) -> Vec<PreviewSignal> {
        let mut signals = Vec::new();
        match event {
            ModelResponseEvent::ThinkingDelta(delta) => {
                self.preview.reasoning.push_str(delta);
                self.preview.full_text.push_str(delta);
                signals.push(PreviewSignal::Reasoning(delta.clone()));
            }
            ModelResponseEvent::TextDelta(delta) => {
                self.preview.text.push_str(delta);
                self.preview.full_text.push_str(delta);
                self.classify_text(&mut signals);
            }
            ModelResponseEvent::ToolUseStart { id, name } => {
                if let Some(open) = self.open_invocation.take() {
                    warn!("tool invocation {} was never closed", open.id);
                }
                self.open_invocation = Some(OpenInvocation {
                    id: id.clone(),
                    name: name.clone(),
                    raw_input: String::new(),
                });
                signals.push(PreviewSignal::ToolActive { name: name.clone() });
            }
            ModelResponseEvent::ToolInputDelta(delta) => {
                match &mut self.open_invocation {
                    Some(open) => open.raw_input.push_str(delta),
                    None => debug!("tool input without an open invocation"),
                }
            }
            ModelResponseEvent::BlockStop => {
                if let Some(open) = self.open_invocation.take() {
                    self.close_invocation(open);
                    signals.push(PreviewSignal::ToolInactive);
                }
            }
        }
        signals
    }

    fn classify_text(&mut self, signals: &mut Vec<PreviewSignal>) {
        let split = offer::split_streaming(&self.preview.text);

        if split.artifact.is_some() && !self.artifact_started {
            self.artifact_started = true;
            self.preview.in_artifact = true;
            signals.push(PreviewSignal::ArtifactStarted);
        }
        if split.chat != self.preview.chat {
            self.preview.chat = split.chat;
            signals.push(PreviewSignal::Chat(self.preview.chat.clone()));
        }
        if split.artifact.is_some() && split.artifact != self.preview.artifact {
            self.preview.artifact = split.artifact;
            if let Some(artifact) = &self.preview.artifact {
                signals.push(PreviewSignal::Artifact(artifact.clone()));
            }
        }
        if split.closed && self.preview.in_artifact {
            self.preview.in_artifact = false;
            signals.push(PreviewSignal::ArtifactClosed);
        }
    }

    fn close_invocation(&mut self, open: OpenInvocation) {
        let OpenInvocation { id, name, raw_input } = open;
        let input = if raw_input.trim().is_empty() {
            Ok(Value::Object(Map::new()))
        } else {
            serde_json::from_str(&raw_input)
        };
        match input {
            Ok(input) => {
                self.preview
                    .invocations
                    .push(PreviewInvocation { id, name, input });
            }
            Err(err) => {
                warn!("dropping malformed input of `{name}` ({id}): {err}");
            }
        }
    }
}
