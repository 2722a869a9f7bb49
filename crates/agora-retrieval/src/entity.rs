//! Forum entities as seen by the indexer.
//!
//! These are read-only, fully joined snapshots handed over by the primary
//! store after a write. The indexer derives a point from them and never
//! writes back.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use agora_core::{Error, Result};
use agora_vector::{PointId, term_weights};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Kinds and references
// ============================================================================

/// The four indexed entity types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    /// Forum post.
    Post,
    /// Comment on a post.
    Comment,
    /// Post category.
    Category,
    /// User profile.
    User,
}

impl EntityKind {
    /// Every kind, in collection order.
    pub const ALL: [EntityKind; 4] = [Self::Post, Self::Comment, Self::Category, Self::User];

    /// Singular name, used in point names and payload `type`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Post => "post",
            Self::Comment => "comment",
            Self::Category => "category",
            Self::User => "user",
        }
    }

    /// The collection holding this kind.
    pub fn collection(&self) -> &'static str {
        match self {
            Self::Post => "posts",
            Self::Comment => "comments",
            Self::Category => "categories",
            Self::User => "users",
        }
    }

    /// Reverse of [`collection`](Self::collection).
    pub fn from_collection(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.collection() == name)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = Error;

    /// Accepts singular or collection names.
    fn from_str(s: &str) -> Result<Self> {
        let lower = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == lower || k.collection() == lower)
            .ok_or_else(|| Error::bad_request(format!("unknown entity kind '{s}'")))
    }
}

/// Identity of an entity: its kind and primary-store id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    /// Entity kind.
    pub kind: EntityKind,
    /// Primary-store id.
    pub id: i64,
}

impl EntityRef {
    /// Create a reference.
    pub fn new(kind: EntityKind, id: i64) -> Self {
        Self { kind, id }
    }

    /// Reference to a post.
    pub fn post(id: i64) -> Self {
        Self::new(EntityKind::Post, id)
    }

    /// The deterministic point id for this entity.
    pub fn point_id(&self) -> PointId {
        PointId::from_name(&self.to_string())
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

impl FromStr for EntityRef {
    type Err = Error;

    /// Parses `post:42`.
    fn from_str(s: &str) -> Result<Self> {
        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| Error::bad_request(format!("expected '<kind>:<id>', got '{s}'")))?;
        let id = id
            .parse()
            .map_err(|_| Error::bad_request(format!("invalid entity id in '{s}'")))?;
        Ok(Self::new(kind.parse()?, id))
    }
}

// ============================================================================
// Entities
// ============================================================================

/// Author reference joined into posts and comments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSummary {
    /// User id.
    pub id: i64,
    /// Login name.
    pub username: String,
}

/// Category reference joined into posts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorySummary {
    /// Category id.
    pub id: i64,
    /// Category name.
    pub name: String,
}

/// A forum post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    /// Post id.
    pub id: i64,
    /// Title.
    pub title: String,
    /// Body text.
    pub content: String,
    /// Author.
    pub author: UserSummary,
    /// Category, if any.
    #[serde(default)]
    pub category: Option<CategorySummary>,
    /// Free-form tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last edit time.
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    /// Net vote score.
    #[serde(default)]
    pub vote_score: i64,
    /// Number of comments.
    #[serde(default)]
    pub comment_count: i64,
    /// Number of bookmarks.
    #[serde(default)]
    pub bookmark_count: i64,
}

/// A comment on a post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    /// Comment id.
    pub id: i64,
    /// Parent post id.
    pub post_id: i64,
    /// Parent post title, joined for display.
    pub post_title: String,
    /// Body text.
    pub content: String,
    /// Author.
    pub author: UserSummary,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Net vote score.
    #[serde(default)]
    pub vote_score: i64,
}

/// A post category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    /// Category id.
    pub id: i64,
    /// Name.
    pub name: String,
    /// Description.
    #[serde(default)]
    pub description: Option<String>,
    /// Number of posts.
    #[serde(default)]
    pub post_count: i64,
}

/// A user profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// User id.
    pub id: i64,
    /// Login name.
    pub username: String,
    /// Display name.
    #[serde(default)]
    pub display_name: Option<String>,
    /// Profile text.
    #[serde(default)]
    pub bio: Option<String>,
    /// Number of posts.
    #[serde(default)]
    pub post_count: i64,
    /// Number of comments.
    #[serde(default)]
    pub comment_count: i64,
    /// Sign-up time.
    pub created_at: DateTime<Utc>,
}

/// Any indexable entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Entity {
    /// A post.
    Post(Post),
    /// A comment.
    Comment(Comment),
    /// A category.
    Category(Category),
    /// A user.
    User(User),
}

impl Entity {
    /// The entity's kind.
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Post(_) => EntityKind::Post,
            Self::Comment(_) => EntityKind::Comment,
            Self::Category(_) => EntityKind::Category,
            Self::User(_) => EntityKind::User,
        }
    }

    /// The entity's primary-store id.
    pub fn id(&self) -> i64 {
        match self {
            Self::Post(p) => p.id,
            Self::Comment(c) => c.id,
            Self::Category(c) => c.id,
            Self::User(u) => u.id,
        }
    }

    /// Kind and id.
    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::new(self.kind(), self.id())
    }

    /// The text that gets embedded.
    ///
    /// Fields that define meaning, joined as `title | body`.
    pub fn embedding_text(&self) -> String {
        match self {
            Self::Post(p) => {
                let tags = p.tags.join(" ");
                let mut parts = vec![p.title.trim(), p.content.trim()];
                if let Some(category) = &p.category {
                    parts.push(category.name.trim());
                }
                if !tags.is_empty() {
                    parts.push(&tags);
                }
                parts.join(" | ")
            }
            Self::Comment(c) => format!("{} | {}", c.post_title.trim(), c.content.trim()),
            Self::Category(c) => match &c.description {
                Some(d) => format!("{} | {}", c.name.trim(), d.trim()),
                None => c.name.trim().to_string(),
            },
            Self::User(u) => {
                let mut parts = vec![u.username.as_str()];
                if let Some(name) = &u.display_name {
                    parts.push(name.as_str());
                }
                if let Some(bio) = &u.bio {
                    parts.push(bio.as_str());
                }
                parts.join(" | ")
            }
        }
    }

    /// Weighted keys for the sparse vector: text terms plus structure.
    ///
    /// Structural features (`category:`, `author:`, `tag:`) share the sparse
    /// space with text terms, so a collaborative profile built from these
    /// vectors also captures "same author" and "same category" affinity.
    pub fn sparse_features(&self) -> HashMap<String, f32> {
        let mut features = term_weights(&self.embedding_text());
        match self {
            Self::Post(p) => {
                features.insert(format!("author:{}", p.author.id), 1.0);
                if let Some(category) = &p.category {
                    features.insert(format!("category:{}", category.id), 1.0);
                }
                for tag in &p.tags {
                    features.insert(format!("tag:{}", tag.trim().to_lowercase()), 1.0);
                }
            }
            Self::Comment(c) => {
                features.insert(format!("author:{}", c.author.id), 1.0);
            }
            Self::Category(c) => {
                features.insert(format!("category:{}", c.id), 1.0);
            }
            Self::User(u) => {
                features.insert(format!("author:{}", u.id), 1.0);
            }
        }
        features
    }

    /// The author of user-generated content.
    pub fn author_id(&self) -> Option<i64> {
        match self {
            Self::Post(p) => Some(p.author.id),
            Self::Comment(c) => Some(c.author.id),
            _ => None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn post(id: i64, title: &str, content: &str) -> Post {
        Post {
            id,
            title: title.to_string(),
            content: content.to_string(),
            author: UserSummary {
                id: 7,
                username: "ada".into(),
            },
            category: Some(CategorySummary {
                id: 3,
                name: "Physics".into(),
            }),
            tags: vec!["Science".into()],
            created_at: DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
            updated_at: None,
            vote_score: 0,
            comment_count: 0,
            bookmark_count: 0,
        }
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(EntityKind::Post.collection(), "posts");
        assert_eq!(EntityKind::from_collection("categories"), Some(EntityKind::Category));
        assert_eq!("users".parse::<EntityKind>().unwrap(), EntityKind::User);
        assert_eq!("Comment".parse::<EntityKind>().unwrap(), EntityKind::Comment);
        assert!("thread".parse::<EntityKind>().is_err());
    }

    #[test]
    fn test_entity_ref_roundtrip_and_point_id() {
        let r: EntityRef = "post:42".parse().unwrap();
        assert_eq!(r, EntityRef::post(42));
        assert_eq!(r.to_string(), "post:42");
        assert_eq!(r.point_id(), EntityRef::post(42).point_id());
        assert_ne!(r.point_id(), EntityRef::new(EntityKind::Comment, 42).point_id());
        assert!("post:abc".parse::<EntityRef>().is_err());
        assert!("post".parse::<EntityRef>().is_err());
    }

    #[test]
    fn test_embedding_text_composition() {
        let entity = Entity::Post(post(1, "Quantum basics", "Qubits and superposition."));
        let text = entity.embedding_text();
        assert!(text.starts_with("Quantum basics | Qubits"));
        assert!(text.contains("Physics"));
        assert!(text.ends_with("Science"));
    }

    #[test]
    fn test_sparse_features_include_structure() {
        let entity = Entity::Post(post(1, "Quantum basics", "Qubits"));
        let features = entity.sparse_features();
        assert!(features.contains_key("term:quantum"));
        assert!(features.contains_key("author:7"));
        assert!(features.contains_key("category:3"));
        assert!(features.contains_key("tag:science"));
    }

    #[test]
    fn test_entity_json_is_tagged() {
        let entity = Entity::Category(Category {
            id: 3,
            name: "Physics".into(),
            description: None,
            post_count: 12,
        });
        let json = serde_json::to_value(&entity).unwrap();
        assert_eq!(json["type"], "category");
        let back: Entity = serde_json::from_value(json).unwrap();
        assert_eq!(back.entity_ref(), EntityRef::new(EntityKind::Category, 3));
    }
}
