//! Persistence of conversations.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::artifact::Artifact;
use crate::conversation::{Conversation, Message};

/// A failure of the backing store.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("conversation store failed: {0}")]
pub struct StoreError(pub String);

/// A document store holding whole conversations.
///
/// Every mutation is a full-record rewrite through [`ConversationStore::save`],
/// implementations don't need to support partial updates.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Reads a conversation by its identifier.
    async fn get(&self, id: &str) -> Result<Option<Conversation>, StoreError>;

    /// Writes a conversation, replacing any previous record.
    async fn save(&self, conversation: &Conversation) -> Result<(), StoreError>;

    /// Lists conversations of a project, most recently active first.
    async fn list_by_project(
        &self,
        project_id: &str,
    ) -> Result<Vec<Conversation>, StoreError>;

    /// Appends a message to a conversation, returning the updated record.
    async fn append_message(
        &self,
        id: &str,
        msg: Message,
    ) -> Result<Option<Conversation>, StoreError> {
        let Some(mut conversation) = self.get(id).await? else {
            return Ok(None);
        };
        conversation.push_message(msg);
        self.save(&conversation).await?;
        Ok(Some(conversation))
    }

    /// Replaces the artifact of a conversation, returning the updated
    /// record.
    async fn replace_artifact(
        &self,
        id: &str,
        artifact: Artifact,
    ) -> Result<Option<Conversation>, StoreError> {
        let Some(mut conversation) = self.get(id).await? else {
            return Ok(None);
        };
        conversation.set_artifact(artifact);
        self.save(&conversation).await?;
        Ok(Some(conversation))
    }
}

/// A store that keeps conversations in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    conversations: Mutex<HashMap<String, Conversation>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a conversation, replacing any previous record.
    pub async fn insert(&self, conversation: Conversation) {
        self.conversations
            .lock()
            .await
            .insert(conversation.id.clone(), conversation);
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn get(&self, id: &str) -> Result<Option<Conversation>, StoreError> {
        Ok(self.conversations.lock().await.get(id).cloned())
    }

    async fn save(&self, conversation: &Conversation) -> Result<(), StoreError> {
        trace!("saving conversation {}", conversation.id);
        self.conversations
            .lock()
            .await
            .insert(conversation.id.clone(), conversation.clone());
        Ok(())
    }

    async fn list_by_project(
        &self,
        project_id: &str,
    ) -> Result<Vec<Conversation>, StoreError> {
        let mut conversations: Vec<Conversation> = self
            .conversations
            .lock()
            .await
            .values()
            .filter(|c| c.project_id.as_deref() == Some(project_id))
            .cloned()
            .collect();
        conversations.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        Ok(conversations)
    }
}
