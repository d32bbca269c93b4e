mod builder;

use std::sync::Arc;

use offer_agent_model::{ModelMessage, ModelRequest, ModelResponseEvent, Role};
use tokio::time::timeout;
use tracing::Instrument;

pub use builder::OrchestratorBuilder;

use crate::artifact::{self, Extraction};
use crate::cancel::CancelToken;
use crate::classifier::StreamClassifier;
use crate::config::OrchestratorConfig;
use crate::conversation::{Conversation, InteractiveChoice, Message};
use crate::error::Error;
use crate::events::{LoopEvent, LoopState};
use crate::model_client::ModelClient;
use crate::normalizer;
use crate::store::ConversationStore;
use crate::tool::{Dispatcher, ToolOutcome};
use crate::transcript::{self, TranscriptEntry};
use crate::validator;

pub(crate) type OnEvent = Arc<dyn Fn(LoopEvent) + Send + Sync>;

/// How a run ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoopOutcome {
    /// A round produced no tool invocations and its message was persisted.
    Finished {
        /// Identifier of the persisted assistant message.
        message_id: String,
    },
    /// The model asked the user to choose, and the run stopped until the
    /// choice is answered.
    Paused {
        /// Identifier of the message carrying the choice.
        message_id: String,
    },
}

/// The state carried from one round to the next.
struct RoundState {
    round: usize,
    messages: Vec<ModelMessage>,
    carry: String,
    thinking: String,
}

/// What a round asks the loop to do next.
enum RoundStep {
    Continue,
    Pause {
        text: String,
        entries: Vec<TranscriptEntry>,
        choice: InteractiveChoice,
    },
    Finish {
        text: String,
    },
}

fn join_segments(carry: &mut String, segment: &str) {
    if segment.is_empty() {
        return;
    }
    if !carry.is_empty() {
        carry.push_str("\n\n");
    }
    carry.push_str(segment);
}

/// Drives the tool-use loop of a conversation.
///
/// An orchestrator holds no per-conversation state, but it doesn't prevent
/// two runs of the same conversation from interleaving either. Use a
/// [`crate::Session`] to serialize them.
pub struct Orchestrator {
    model_client: ModelClient,
    dispatcher: Dispatcher,
    store: Arc<dyn ConversationStore>,
    system_prompt: Option<String>,
    config: OrchestratorConfig,
    on_event: Option<OnEvent>,
}

impl Orchestrator {
    /// Returns the conversation store.
    #[inline]
    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    /// Returns the configuration.
    #[inline]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Sends a user message and runs rounds until the model stops calling
    /// tools or asks for a choice.
    ///
    /// The user message is persisted before the first request. If the run
    /// fails, nothing else is persisted and the conversation stays in its
    /// last saved state.
    pub async fn run(
        &self,
        conversation_id: &str,
        outgoing: Message,
        cancel: &CancelToken,
    ) -> Result<LoopOutcome, Error> {
        let result = self.run_inner(conversation_id, outgoing, cancel).await;
        if let Err(err) = &result {
            if err.is_structural() {
                error!("run of conversation {conversation_id} aborted: {err}");
            } else {
                warn!("run of conversation {conversation_id} aborted: {err}");
            }
            self.emit(LoopEvent::Failed(err.to_string()));
            self.emit(LoopEvent::State(LoopState::Idle));
        }
        result
    }

    /// Records the selection of an option of a paused message, then runs a
    /// new loop with the selected answer as a silent user message.
    pub async fn respond_to_choice(
        &self,
        conversation_id: &str,
        message_id: &str,
        option_index: usize,
        cancel: &CancelToken,
    ) -> Result<LoopOutcome, Error> {
        let mut conversation = self.load(conversation_id).await?;
        let msg = conversation.message_mut(message_id).ok_or_else(|| {
            Error::Choice(format!("message `{message_id}` not found"))
        })?;
        let choice = msg.choice.as_mut().ok_or_else(|| {
            Error::Choice(format!("message `{message_id}` has no choice"))
        })?;
        let reply = choice.select(option_index)?.reply().to_owned();
        self.store.save(&conversation).await?;
        debug!("option {option_index} of message {message_id} selected");

        self.run(conversation_id, Message::user(reply).silent(), cancel)
            .await
    }

    async fn run_inner(
        &self,
        conversation_id: &str,
        outgoing: Message,
        cancel: &CancelToken,
    ) -> Result<LoopOutcome, Error> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if outgoing.role != Role::User {
            return Err(Error::InvalidInput(
                "the outgoing message must be a user message".to_owned(),
            ));
        }
        let conversation = self.load(conversation_id).await?;

        let normalized =
            normalizer::normalize(&conversation.messages, &outgoing);
        let outgoing_index = conversation.messages.len();
        if let Some(rejection) = normalized
            .rejected
            .iter()
            .find(|r| r.index == outgoing_index)
        {
            return Err(Error::InvalidInput(format!(
                "the outgoing message is unusable: {}",
                rejection.reason
            )));
        }
        debug!(
            "normalized {} messages into {} turns",
            outgoing_index + 1,
            normalized.messages.len()
        );

        self.persist_message(conversation_id, outgoing).await?;

        let mut state = RoundState {
            round: 0,
            messages: normalized.messages,
            carry: String::new(),
            thinking: String::new(),
        };
        loop {
            if state.round >= self.config.max_rounds {
                return Err(Error::RoundLimitExceeded(self.config.max_rounds));
            }
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            state.round += 1;

            let span = debug_span!("round", n = state.round);
            let step = self
                .guarded_round(&mut state, cancel)
                .instrument(span)
                .await?;
            match step {
                RoundStep::Continue => continue,
                RoundStep::Pause {
                    text,
                    entries,
                    choice,
                } => {
                    return self
                        .pause(conversation_id, state, &text, &entries, choice)
                        .await;
                }
                RoundStep::Finish { text } => {
                    return self.finish(conversation_id, state, &text).await;
                }
            }
        }
    }

    /// Runs one round under the deadline and the cancel token.
    ///
    /// Nothing is persisted inside, so dropping the round at any point
    /// leaves the conversation untouched.
    async fn guarded_round(
        &self,
        state: &mut RoundState,
        cancel: &CancelToken,
    ) -> Result<RoundStep, Error> {
        let round = state.round;
        let fut = async {
            match self.config.round_timeout {
                Some(deadline) => {
                    match timeout(deadline, self.round(state)).await {
                        Ok(result) => result,
                        Err(_) => Err(Error::RoundTimeout(round)),
                    }
                }
                None => self.round(state).await,
            }
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("round {round} cancelled");
                Err(Error::Cancelled)
            }
            result = fut => result,
        }
    }

    async fn round(&self, state: &mut RoundState) -> Result<RoundStep, Error> {
        self.emit(LoopEvent::State(LoopState::Requesting));
        validator::validate(&state.messages)?;

        let req = ModelRequest {
            system: self.system_prompt.clone(),
            messages: state.messages.clone(),
            tools: self.dispatcher.definitions(),
            max_tokens: self.config.max_tokens,
            thinking_budget: self.config.thinking_budget,
        };
        let turn = self
            .model_client
            .send_request(req, self.stream_observer())
            .await?;
        debug!(
            "round {} finished with {:?}, {} blocks",
            state.round,
            turn.stop_reason,
            turn.content.len()
        );

        let tool_uses = turn.tool_uses();
        if tool_uses.is_empty() {
            join_segments(&mut state.thinking, &turn.thinking());
            return Ok(RoundStep::Finish { text: turn.text() });
        }

        self.emit(LoopEvent::State(LoopState::ToolDispatch));
        let outcomes = self.dispatcher.dispatch(&tool_uses).await;
        for outcome in &outcomes {
            self.emit(LoopEvent::ToolFinished {
                id: outcome.id.clone(),
                name: outcome.name.clone(),
                is_error: outcome.is_error,
            });
        }

        let text = turn.text();
        join_segments(&mut state.thinking, &turn.thinking());
        let entries: Vec<TranscriptEntry> = outcomes
            .iter()
            .filter(|outcome| !outcome.is_choice_tool())
            .map(ToolOutcome::to_transcript_entry)
            .collect();

        if let Some(choice) =
            outcomes.iter().find_map(ToolOutcome::interactive_choice)
        {
            return Ok(RoundStep::Pause {
                text,
                entries,
                choice,
            });
        }

        join_segments(&mut state.carry, &transcript::embed(&text, &entries));
        state.messages.push(turn.into_followup_message());
        state.messages.push(ModelMessage {
            role: Role::User,
            content: outcomes.iter().map(ToolOutcome::to_result_block).collect(),
        });
        Ok(RoundStep::Continue)
    }

    async fn pause(
        &self,
        conversation_id: &str,
        state: RoundState,
        text: &str,
        entries: &[TranscriptEntry],
        choice: InteractiveChoice,
    ) -> Result<LoopOutcome, Error> {
        let RoundState {
            mut carry,
            thinking,
            ..
        } = state;
        join_segments(&mut carry, &transcript::embed(text, entries));
        // An empty message would be dropped from the next request, taking
        // the question away from the model.
        if transcript::strip(&carry).trim().is_empty() {
            let mut content = choice.prompt.clone();
            join_segments(&mut content, &carry);
            carry = content;
        }
        let msg = Message::assistant(carry)
            .with_thinking(thinking)
            .with_choice(choice);
        let message_id = msg.id.clone();
        self.persist_message(conversation_id, msg).await?;

        info!("conversation {conversation_id} paused for a choice");
        self.emit(LoopEvent::State(LoopState::Paused));
        Ok(LoopOutcome::Paused { message_id })
    }

    async fn finish(
        &self,
        conversation_id: &str,
        state: RoundState,
        text: &str,
    ) -> Result<LoopOutcome, Error> {
        self.emit(LoopEvent::State(LoopState::Finalizing));
        let RoundState {
            mut carry,
            thinking,
            ..
        } = state;
        let earlier_text = transcript::strip(&carry);
        join_segments(&mut carry, text);

        let msg = Message::assistant(carry).with_thinking(thinking);
        let message_id = msg.id.clone();
        let conversation = self.persist_message(conversation_id, msg).await?;

        // The latest offer block wins over one written in an earlier round.
        let existing = conversation.artifact.as_ref();
        let extraction = artifact::extract(text, existing)
            .or_else(|| artifact::extract(&earlier_text, existing));
        match extraction {
            Some(Extraction::Created(artifact) | Extraction::Updated(artifact)) => {
                info!(
                    "artifact {} of conversation {conversation_id} is now version {}",
                    artifact.id, artifact.version
                );
                self.store
                    .replace_artifact(conversation_id, artifact.clone())
                    .await?
                    .ok_or_else(|| {
                        Error::ConversationNotFound(conversation_id.to_owned())
                    })?;
                self.emit(LoopEvent::ArtifactUpdated(artifact));
            }
            Some(Extraction::Unchanged) => {
                debug!("offer block repeats the current artifact");
            }
            None => {}
        }

        self.emit(LoopEvent::State(LoopState::Idle));
        Ok(LoopOutcome::Finished { message_id })
    }

    async fn load(&self, conversation_id: &str) -> Result<Conversation, Error> {
        self.store
            .get(conversation_id)
            .await?
            .ok_or_else(|| Error::ConversationNotFound(conversation_id.to_owned()))
    }

    async fn persist_message(
        &self,
        conversation_id: &str,
        msg: Message,
    ) -> Result<Conversation, Error> {
        let conversation = self
            .store
            .append_message(conversation_id, msg.clone())
            .await?
            .ok_or_else(|| Error::ConversationNotFound(conversation_id.to_owned()))?;
        trace!("persisted message {} ({})", msg.id, msg.role);
        self.emit(LoopEvent::MessagePersisted(msg));
        Ok(conversation)
    }

    /// Returns the callback that turns streamed events into live previews.
    ///
    /// The classifier lives in the callback, so nothing it accumulates can
    /// reach the control flow of the loop.
    fn stream_observer(
        &self,
    ) -> impl FnMut(&ModelResponseEvent) + Send + 'static {
        let on_event = self.on_event.clone();
        let mut classifier = StreamClassifier::new();
        let mut streaming = false;
        move |event| {
            let Some(on_event) = &on_event else {
                return;
            };
            if !streaming {
                streaming = true;
                on_event(LoopEvent::State(LoopState::Streaming));
            }
            for signal in classifier.feed(event) {
                on_event(signal.into());
            }
        }
    }

    #[inline]
    fn emit(&self, event: LoopEvent) {
        if let Some(on_event) = &self.on_event {
            on_event(event);
        }
    }
}
