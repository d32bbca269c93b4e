use std::sync::Arc;

use offer_agent_model::ModelProvider;

use super::{OnEvent, Orchestrator};
use crate::config::OrchestratorConfig;
use crate::events::LoopEvent;
use crate::model_client::ModelClient;
use crate::store::{ConversationStore, MemoryStore};
use crate::tool::{Dispatcher, Tool};

/// [`Orchestrator`] builder.
pub struct OrchestratorBuilder {
    model_client: ModelClient,
    dispatcher: Dispatcher,
    store: Option<Arc<dyn ConversationStore>>,
    system_prompt: Option<String>,
    config: OrchestratorConfig,
    on_event: Option<OnEvent>,
}

impl OrchestratorBuilder {
    /// Creates a new builder with the specified model provider.
    #[inline]
    pub fn with_model_provider<P: ModelProvider + 'static>(
        provider: P,
    ) -> Self {
        Self {
            model_client: ModelClient::new(provider),
            dispatcher: Dispatcher::default(),
            store: None,
            system_prompt: None,
            config: OrchestratorConfig::default(),
            on_event: None,
        }
    }

    /// Registers a tool.
    #[inline]
    pub fn with_tool<T: Tool>(mut self, tool: T) -> Self {
        self.dispatcher.add_tool(tool);
        self
    }

    /// Sets the conversation store. An in-memory store is used if unset.
    #[inline]
    pub fn with_store(mut self, store: Arc<dyn ConversationStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets the system instructions sent with every request.
    #[inline]
    pub fn with_system_prompt<S: Into<String>>(mut self, prompt: S) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Replaces the configuration.
    #[inline]
    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Attaches a callback to be invoked with every loop event.
    ///
    /// The callback is called from the task driving the run, so it should
    /// return quickly.
    #[inline]
    pub fn on_event(
        mut self,
        on_event: impl Fn(LoopEvent) + Send + Sync + 'static,
    ) -> Self {
        self.on_event = Some(Arc::new(on_event));
        self
    }

    /// Builds the orchestrator.
    pub fn build(self) -> Orchestrator {
        let Self {
            mut model_client,
            dispatcher,
            store,
            system_prompt,
            config,
            on_event,
        } = self;
        model_client.set_open_retry_max_elapsed(config.open_retry_max_elapsed);
        let store = store.unwrap_or_else(|| Arc::new(MemoryStore::new()));
        Orchestrator {
            model_client,
            dispatcher,
            store,
            system_prompt,
            config,
            on_event,
        }
    }
}
