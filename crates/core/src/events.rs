use crate::artifact::Artifact;
use crate::classifier::PreviewSignal;
use crate::conversation::Message;

/// States of the orchestration loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LoopState {
    /// No run is active.
    Idle,
    /// A request is being validated and sent.
    Requesting,
    /// The response is being streamed.
    Streaming,
    /// Tool invocations are being executed.
    ToolDispatch,
    /// The final message is being persisted.
    Finalizing,
    /// The run stopped to wait for an interactive choice.
    Paused,
}

/// Events emitted by the orchestration loop for the presentation layer.
///
/// Preview events reflect the live stream only, they are superseded by
/// [`LoopEvent::MessagePersisted`] once the run finishes.
#[derive(Clone, Debug, PartialEq)]
pub enum LoopEvent {
    /// The loop entered a new state.
    State(LoopState),
    /// A fragment of reasoning text.
    Reasoning(String),
    /// The chat-visible text of the current round so far.
    ChatPreview(String),
    /// The model started writing an offer.
    ArtifactStarted,
    /// The offer payload of the current round so far.
    ArtifactPreview(String),
    /// The model finished writing the offer.
    ArtifactClosed,
    /// The model is writing a tool invocation.
    ToolActive {
        /// Declared name of the tool.
        name: String,
    },
    /// The tool invocation block ended.
    ToolInactive,
    /// A tool invocation settled.
    ToolFinished {
        /// Identifier of the invocation.
        id: String,
        /// Name of the tool.
        name: String,
        /// Whether the invocation failed.
        is_error: bool,
    },
    /// A message was appended to the conversation.
    MessagePersisted(Message),
    /// The artifact of the conversation was replaced.
    ArtifactUpdated(Artifact),
    /// The run aborted with an error.
    Failed(String),
}

impl From<PreviewSignal> for LoopEvent {
    fn from(signal: PreviewSignal) -> Self {
        match signal {
            PreviewSignal::Reasoning(delta) => LoopEvent::Reasoning(delta),
            PreviewSignal::Chat(chat) => LoopEvent::ChatPreview(chat),
            PreviewSignal::ArtifactStarted => LoopEvent::ArtifactStarted,
            PreviewSignal::Artifact(payload) => LoopEvent::ArtifactPreview(payload),
            PreviewSignal::ArtifactClosed => LoopEvent::ArtifactClosed,
            PreviewSignal::ToolActive { name } => LoopEvent::ToolActive { name },
            PreviewSignal::ToolInactive => LoopEvent::ToolInactive,
        }
    }
}
