//! Typed point payloads.
//!
//! Each entity kind has its own payload shape carrying what a result list
//! needs to render without going back to the primary store. The variants
//! are tagged with `type` on the wire, so a payload read back from the
//! vector store is checked before use.

use agora_core::{Error, Result};
use agora_vector::PayloadMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entity::{Entity, EntityKind, EntityRef};

/// Payload key holding the discriminator.
pub const TYPE_KEY: &str = "type";

/// Payload key holding the primary-store id.
pub const ENTITY_ID_KEY: &str = "entity_id";

/// Payload key holding the author's user id.
pub const AUTHOR_ID_KEY: &str = "author_id";

/// Payload key holding the post's category id.
pub const CATEGORY_ID_KEY: &str = "category_id";

/// Payload of a post point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostPayload {
    /// Post id.
    pub entity_id: i64,
    /// Title.
    pub title: String,
    /// Leading slice of the body.
    pub excerpt: String,
    /// Author id.
    pub author_id: i64,
    /// Author username.
    pub author_name: String,
    /// Category id.
    #[serde(default)]
    pub category_id: Option<i64>,
    /// Category name.
    #[serde(default)]
    pub category_name: Option<String>,
    /// Tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Net vote score.
    pub vote_score: i64,
    /// Comment count.
    pub comment_count: i64,
    /// Bookmark count.
    pub bookmark_count: i64,
}

/// Payload of a comment point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentPayload {
    /// Comment id.
    pub entity_id: i64,
    /// Parent post id.
    pub post_id: i64,
    /// Parent post title.
    pub post_title: String,
    /// Leading slice of the body.
    pub excerpt: String,
    /// Author id.
    pub author_id: i64,
    /// Author username.
    pub author_name: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Net vote score.
    pub vote_score: i64,
}

/// Payload of a category point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryPayload {
    /// Category id.
    pub entity_id: i64,
    /// Name.
    pub name: String,
    /// Description.
    #[serde(default)]
    pub description: Option<String>,
    /// Post count.
    pub post_count: i64,
}

/// Payload of a user point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserPayload {
    /// User id.
    pub entity_id: i64,
    /// Login name.
    pub username: String,
    /// Display name.
    #[serde(default)]
    pub display_name: Option<String>,
    /// Leading slice of the bio.
    #[serde(default)]
    pub bio_excerpt: Option<String>,
    /// Post count.
    pub post_count: i64,
    /// Comment count.
    pub comment_count: i64,
}

/// Point payload, one variant per entity kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Payload {
    /// Post payload.
    Post(PostPayload),
    /// Comment payload.
    Comment(CommentPayload),
    /// Category payload.
    Category(CategoryPayload),
    /// User payload.
    User(UserPayload),
}

/// First `max_chars` characters, trimmed, with an ellipsis when cut.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}…", text[..cut].trim_end()),
        None => text.to_string(),
    }
}

impl Payload {
    /// Build the payload for an entity.
    pub fn from_entity(entity: &Entity, excerpt_chars: usize) -> Self {
        match entity {
            Entity::Post(p) => Self::Post(PostPayload {
                entity_id: p.id,
                title: p.title.clone(),
                excerpt: excerpt(&p.content, excerpt_chars),
                author_id: p.author.id,
                author_name: p.author.username.clone(),
                category_id: p.category.as_ref().map(|c| c.id),
                category_name: p.category.as_ref().map(|c| c.name.clone()),
                tags: p.tags.clone(),
                created_at: p.created_at,
                vote_score: p.vote_score,
                comment_count: p.comment_count,
                bookmark_count: p.bookmark_count,
            }),
            Entity::Comment(c) => Self::Comment(CommentPayload {
                entity_id: c.id,
                post_id: c.post_id,
                post_title: c.post_title.clone(),
                excerpt: excerpt(&c.content, excerpt_chars),
                author_id: c.author.id,
                author_name: c.author.username.clone(),
                created_at: c.created_at,
                vote_score: c.vote_score,
            }),
            Entity::Category(c) => Self::Category(CategoryPayload {
                entity_id: c.id,
                name: c.name.clone(),
                description: c.description.clone(),
                post_count: c.post_count,
            }),
            Entity::User(u) => Self::User(UserPayload {
                entity_id: u.id,
                username: u.username.clone(),
                display_name: u.display_name.clone(),
                bio_excerpt: u.bio.as_deref().map(|b| excerpt(b, excerpt_chars)),
                post_count: u.post_count,
                comment_count: u.comment_count,
            }),
        }
    }

    /// The kind this payload belongs to.
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Post(_) => EntityKind::Post,
            Self::Comment(_) => EntityKind::Comment,
            Self::Category(_) => EntityKind::Category,
            Self::User(_) => EntityKind::User,
        }
    }

    /// The entity this payload was derived from.
    pub fn entity_ref(&self) -> EntityRef {
        let id = match self {
            Self::Post(p) => p.entity_id,
            Self::Comment(c) => c.entity_id,
            Self::Category(c) => c.entity_id,
            Self::User(u) => u.entity_id,
        };
        EntityRef::new(self.kind(), id)
    }

    /// A one-line label for display.
    pub fn title(&self) -> &str {
        match self {
            Self::Post(p) => &p.title,
            Self::Comment(c) => &c.post_title,
            Self::Category(c) => &c.name,
            Self::User(u) => u.display_name.as_deref().unwrap_or(&u.username),
        }
    }

    /// The text carried in the payload, for re-embedding without a
    /// primary-store read.
    pub fn text(&self) -> String {
        let parts: Vec<&str> = match self {
            Self::Post(p) => vec![p.title.as_str(), p.excerpt.as_str()],
            Self::Comment(c) => vec![c.post_title.as_str(), c.excerpt.as_str()],
            Self::Category(c) => {
                let mut parts = vec![c.name.as_str()];
                parts.extend(c.description.as_deref());
                parts
            }
            Self::User(u) => {
                let mut parts = vec![u.username.as_str()];
                parts.extend(u.display_name.as_deref());
                parts.extend(u.bio_excerpt.as_deref());
                parts
            }
        };
        parts.join(" | ")
    }

    /// Engagement score used by the popularity fallback.
    ///
    /// `votes + 2·comments + 3·bookmarks` for posts, votes for comments,
    /// activity counts otherwise.
    pub fn engagement(&self) -> i64 {
        match self {
            Self::Post(p) => p.vote_score + 2 * p.comment_count + 3 * p.bookmark_count,
            Self::Comment(c) => c.vote_score,
            Self::Category(c) => c.post_count,
            Self::User(u) => u.post_count + u.comment_count,
        }
    }

    /// Serialize into the untyped store representation.
    pub fn into_map(self) -> Result<PayloadMap> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            other => Err(Error::serialization(format!(
                "payload serialized to a non-object: {other}"
            ))),
        }
    }

    /// Parse an untyped store payload.
    pub fn from_map(map: &PayloadMap) -> Result<Self> {
        Ok(serde_json::from_value(Value::Object(map.clone()))?)
    }
}

/// The engagement fields of an entity, as a partial payload.
///
/// Used by signal refresh to patch counters without re-embedding.
pub fn signal_fields(entity: &Entity) -> PayloadMap {
    let mut map = PayloadMap::new();
    match entity {
        Entity::Post(p) => {
            map.insert("vote_score".into(), p.vote_score.into());
            map.insert("comment_count".into(), p.comment_count.into());
            map.insert("bookmark_count".into(), p.bookmark_count.into());
        }
        Entity::Comment(c) => {
            map.insert("vote_score".into(), c.vote_score.into());
        }
        Entity::Category(c) => {
            map.insert("post_count".into(), c.post_count.into());
        }
        Entity::User(u) => {
            map.insert("post_count".into(), u.post_count.into());
            map.insert("comment_count".into(), u.comment_count.into());
        }
    }
    map
}

// ============================================================================
// Tests
// ============================================================================
