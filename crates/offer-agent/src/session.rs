use std::sync::Arc;

use offer_agent_core::conversation::Conversation;
use offer_agent_core::store::{ConversationStore, MemoryStore};
use offer_agent_core::{
    Error, LoopEvent, LoopOutcome, Orchestrator, OrchestratorBuilder,
    OrchestratorConfig, Session as CoreSession,
};
use offer_agent_model::ModelProvider;

use crate::tools::*;

/// The default system instructions of the offer agent.
pub const SYSTEM_PROMPT: &str = include_str!("./system_prompt.md");

type OnIdle = Box<dyn Fn() + Send + Sync>;
type OnOutcome = Box<dyn Fn(Result<LoopOutcome, Error>) + Send + Sync>;

/// A session builder.
///
/// See [`Session`].
pub struct SessionBuilder {
    orchestrator_builder: OrchestratorBuilder,
    store: Arc<dyn ConversationStore>,
    webhook: Option<WebhookClient>,
    on_idle: Option<OnIdle>,
    on_outcome: Option<OnOutcome>,
}

impl SessionBuilder {
    /// Creates a session builder with a specified model provider.
    pub fn with_model_provider<M: ModelProvider + 'static>(
        provider: M,
    ) -> Self {
        let orchestrator_builder =
            OrchestratorBuilder::with_model_provider(provider)
                .with_system_prompt(SYSTEM_PROMPT);
        Self {
            orchestrator_builder,
            store: Arc::new(MemoryStore::new()),
            webhook: None,
            on_idle: None,
            on_outcome: None,
        }
    }

    /// Overrides the system prompt of the agent.
    #[inline]
    pub fn with_system_prompt<S: Into<String>>(mut self, prompt: S) -> Self {
        self.orchestrator_builder =
            self.orchestrator_builder.with_system_prompt(prompt);
        self
    }

    /// Sets the base URL of the catalog webhook. The catalog tools are only
    /// available if this is set.
    #[inline]
    pub fn with_webhook_url<S: Into<String>>(mut self, url: S) -> Self {
        self.webhook = Some(WebhookClient::new(url));
        self
    }

    /// Sets the conversation store.
    #[inline]
    pub fn with_store(mut self, store: Arc<dyn ConversationStore>) -> Self {
        self.store = store;
        self
    }

    /// Replaces the orchestrator configuration.
    #[inline]
    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.orchestrator_builder =
            self.orchestrator_builder.with_config(config);
        self
    }

    /// Attaches a callback to be invoked with every loop event.
    #[inline]
    pub fn on_event(
        mut self,
        on_event: impl Fn(LoopEvent) + Send + Sync + 'static,
    ) -> Self {
        self.orchestrator_builder = self.orchestrator_builder.on_event(on_event);
        self
    }

    /// Attaches a callback to be invoked when the session is idle.
    #[inline]
    pub fn on_idle(
        mut self,
        on_idle: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        self.on_idle = Some(Box::new(on_idle));
        self
    }

    /// Attaches a callback to be invoked with the result of every run.
    #[inline]
    pub fn on_outcome(
        mut self,
        on_outcome: impl Fn(Result<LoopOutcome, Error>) + Send + Sync + 'static,
    ) -> Self {
        self.on_outcome = Some(Box::new(on_outcome));
        self
    }

    /// Builds a session for a conversation, creating the conversation if it
    /// doesn't exist yet.
    ///
    /// This must be called within a Tokio runtime.
    pub async fn build<S: Into<String>>(
        self,
        conversation_id: S,
    ) -> Result<Session, Error> {
        let Self {
            mut orchestrator_builder,
            store,
            webhook,
            on_idle,
            on_outcome,
        } = self;
        let conversation_id = conversation_id.into();

        if store.get(&conversation_id).await?.is_none() {
            debug!("creating conversation {conversation_id}");
            store.save(&Conversation::new(&*conversation_id)).await?;
        }

        if let Some(webhook) = webhook {
            orchestrator_builder = orchestrator_builder
                .with_tool(SearchEquipmentTool::new(webhook.clone()))
                .with_tool(GetEquipmentDetailsTool::new(webhook));
        } else {
            warn!("no catalog webhook configured, tools are unavailable");
        }
        let orchestrator =
            Arc::new(orchestrator_builder.with_store(store).build());

        let mut session_builder =
            CoreSession::builder(Arc::clone(&orchestrator), conversation_id);
        if let Some(on_idle) = on_idle {
            session_builder = session_builder.on_idle(on_idle);
        }
        if let Some(on_outcome) = on_outcome {
            session_builder = session_builder.on_outcome(on_outcome);
        }
        let inner = session_builder.spawn();

        Ok(Session {
            orchestrator,
            inner,
        })
    }
}

/// A chat session, like a window that displays messages and has an input
/// box.
///
/// The session holds a fully configured orchestrator for one conversation,
/// and it is basically a wrapper around [`offer_agent_core::Session`].
pub struct Session {
    orchestrator: Arc<Orchestrator>,
    inner: CoreSession,
}

impl Session {
    /// Sends a message to the session.
    #[inline]
    pub fn send_message(&self, message: &str) {
        self.inner.send_message(message);
    }

    /// Answers the interactive choice of a message.
    #[inline]
    pub fn respond_to_choice(&self, message_id: &str, option_index: usize) {
        self.inner.respond_to_choice(message_id, option_index);
    }

    /// Cancels the active run and the queued inputs.
    #[inline]
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    /// Reads the current state of the conversation.
    pub async fn conversation(&self) -> Result<Conversation, Error> {
        let id = self.inner.conversation_id();
        self.orchestrator
            .store()
            .get(id)
            .await?
            .ok_or_else(|| Error::ConversationNotFound(id.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use offer_agent_test_model::{
        PresetEvent, PresetResponse, TestModelProvider,
    };
    use tokio::sync::watch;
    use tokio::time::timeout;

    use super::*;

    #[tokio::test]
    async fn test_build_creates_conversation() {
        let mut provider = TestModelProvider::default();
        provider.add_user_input_step();
        provider.add_assistant_response_step(PresetResponse::with_events([
            PresetEvent::Text("Which capacity do you need?".to_owned()),
        ]));

        let (done_tx, mut done_rx) = watch::channel(false);
        let session = SessionBuilder::with_model_provider(provider.clone())
            .on_outcome(move |outcome| {
                assert!(outcome.is_ok());
                done_tx.send_replace(true);
            })
            .build("c1")
            .await
            .unwrap();
        assert!(session.conversation().await.unwrap().messages.is_empty());

        session.send_message("I need a treatment plant");
        timeout(Duration::from_millis(500), done_rx.wait_for(|v| *v))
            .await
            .unwrap()
            .unwrap();

        let conversation = session.conversation().await.unwrap();
        assert_eq!(conversation.id, "c1");
        assert_eq!(conversation.messages.len(), 2);

        let requests = provider.recorded_requests();
        let system = requests[0].system.as_deref().unwrap();
        assert!(system.contains("<offer_tag"));
        // Without a webhook only the reserved choice tool is offered.
        let names: Vec<&str> =
            requests[0].tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["present_choices"]);
    }

    #[tokio::test]
    async fn test_build_registers_catalog_tools() {
        let mut provider = TestModelProvider::default();
        provider.add_user_input_step();
        provider.add_assistant_response_step(PresetResponse::with_events([
            PresetEvent::Text("Hello".to_owned()),
        ]));

        let (done_tx, mut done_rx) = watch::channel(false);
        let session = SessionBuilder::with_model_provider(provider.clone())
            .with_webhook_url("http://127.0.0.1:9/hooks/")
            .with_system_prompt("Be brief.")
            .on_idle(move || {
                done_tx.send_replace(true);
            })
            .build("c1")
            .await
            .unwrap();
        session.send_message("Hi");
        timeout(Duration::from_millis(500), done_rx.wait_for(|v| *v))
            .await
            .unwrap()
            .unwrap();

        let requests = provider.recorded_requests();
        assert_eq!(requests[0].system.as_deref(), Some("Be brief."));
        let names: Vec<&str> =
            requests[0].tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec![
            "get_equipment_details",
            "present_choices",
            "search_equipment"
        ]);
    }
}
