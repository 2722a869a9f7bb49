//! The primary store as seen from the retrieval layer.
//!
//! The relational database lives outside this workspace. [`ContentSource`]
//! is the narrow read interface the indexer and recommender need from it.
//! [`MemoryContentSource`] backs tests and the CLI.

use std::collections::HashMap;

use agora_core::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::entity::{Entity, EntityRef};

/// What a user did to a piece of content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionKind {
    /// Up-vote.
    Upvote,
    /// Down-vote.
    Downvote,
    /// Bookmark.
    Bookmark,
    /// Commented on it.
    Comment,
    /// Opened it.
    View,
}

/// One interaction from the user's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    /// The content interacted with.
    pub target: EntityRef,
    /// What happened.
    pub kind: InteractionKind,
    /// When it happened.
    pub occurred_at: DateTime<Utc>,
}

/// Read access to the primary store.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Load the current, fully joined state of an entity.
    ///
    /// Returns `Ok(None)` when the entity no longer exists.
    async fn load_entity(&self, entity: EntityRef) -> Result<Option<Entity>>;

    /// The user's interaction history, newest first.
    async fn user_interactions(&self, user_id: i64) -> Result<Vec<Interaction>>;
}

/// In-memory [`ContentSource`].
#[derive(Debug, Default)]
pub struct MemoryContentSource {
    entities: RwLock<HashMap<EntityRef, Entity>>,
    interactions: RwLock<HashMap<i64, Vec<Interaction>>>,
}

impl MemoryContentSource {
    /// Create an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an entity.
    pub async fn put(&self, entity: Entity) {
        self.entities
            .write()
            .await
            .insert(entity.entity_ref(), entity);
    }

    /// Remove an entity.
    pub async fn remove(&self, entity: EntityRef) -> Option<Entity> {
        self.entities.write().await.remove(&entity)
    }

    /// Append an interaction to a user's history.
    pub async fn record(&self, user_id: i64, interaction: Interaction) {
        self.interactions
            .write()
            .await
            .entry(user_id)
            .or_default()
            .push(interaction);
    }
}

#[async_trait]
impl ContentSource for MemoryContentSource {
    async fn load_entity(&self, entity: EntityRef) -> Result<Option<Entity>> {
        Ok(self.entities.read().await.get(&entity).cloned())
    }

    async fn user_interactions(&self, user_id: i64) -> Result<Vec<Interaction>> {
        let mut history = self
            .interactions
            .read()
            .await
            .get(&user_id)
            .cloned()
            .unwrap_or_default();
        history.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));
        Ok(history)
    }
}
