//! Payload filters for vector searches and scrolls.
//!
//! `must` conditions are AND-ed; `must_not` conditions are AND-NOT-ed.
//! The in-memory store evaluates filters with [`Filter::matches`]; the
//! Qdrant gateway translates them with [`Filter::to_qdrant`].

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::types::{PayloadMap, PointId};

/// A single condition on a payload field or on the point id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Condition {
    /// Field equals a scalar value.
    Equals {
        /// Payload key.
        key: String,
        /// Expected value.
        value: Value,
    },

    /// Field equals any of the values.
    AnyOf {
        /// Payload key.
        key: String,
        /// Accepted values.
        values: Vec<Value>,
    },

    /// Numeric field within an inclusive range.
    Range {
        /// Payload key.
        key: String,
        /// Lower bound (inclusive).
        gte: Option<f64>,
        /// Upper bound (inclusive).
        lte: Option<f64>,
    },

    /// Point id is one of the given ids.
    HasId {
        /// Accepted ids.
        ids: Vec<PointId>,
    },
}

/// A payload filter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    /// Conditions that must all hold.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub must: Vec<Condition>,

    /// Conditions that must all fail.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub must_not: Vec<Condition>,
}

impl Filter {
    /// An empty filter (matches everything).
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `key == value`.
    pub fn must_equal(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.must.push(Condition::Equals {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    /// Require `key` within `[gte, lte]`.
    pub fn must_range(mut self, key: impl Into<String>, gte: Option<f64>, lte: Option<f64>) -> Self {
        self.must.push(Condition::Range {
            key: key.into(),
            gte,
            lte,
        });
        self
    }

    /// Exclude points whose `key == value`.
    pub fn must_not_equal(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.must_not.push(Condition::Equals {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    /// Exclude the given point ids.
    pub fn exclude_ids(mut self, ids: Vec<PointId>) -> Self {
        if !ids.is_empty() {
            self.must_not.push(Condition::HasId { ids });
        }
        self
    }

    /// Whether the filter has no conditions.
    pub fn is_empty(&self) -> bool {
        self.must.is_empty() && self.must_not.is_empty()
    }

    /// Combine two optional filters (conditions concatenated).
    pub fn merge(a: Option<Filter>, b: Option<Filter>) -> Option<Filter> {
        match (a, b) {
            (None, None) => None,
            (Some(f), None) | (None, Some(f)) => Some(f),
            (Some(mut a), Some(b)) => {
                a.must.extend(b.must);
                a.must_not.extend(b.must_not);
                Some(a)
            }
        }
    }

    /// Evaluate the filter against a point.
    pub fn matches(&self, id: &PointId, payload: &PayloadMap) -> bool {
        self.must.iter().all(|c| c.evaluate(id, payload))
            && !self.must_not.iter().any(|c| c.evaluate(id, payload))
    }

    /// Translate into Qdrant's filter JSON.
    pub fn to_qdrant(&self) -> Value {
        let mut out = serde_json::Map::new();
        if !self.must.is_empty() {
            out.insert(
                "must".into(),
                Value::Array(self.must.iter().map(Condition::to_qdrant).collect()),
            );
        }
        if !self.must_not.is_empty() {
            out.insert(
                "must_not".into(),
                Value::Array(self.must_not.iter().map(Condition::to_qdrant).collect()),
            );
        }
        Value::Object(out)
    }
}

impl Condition {
    fn evaluate(&self, id: &PointId, payload: &PayloadMap) -> bool {
        match self {
            Self::Equals { key, value } => payload.get(key).is_some_and(|v| json_eq(v, value)),
            Self::AnyOf { key, values } => payload
                .get(key)
                .is_some_and(|v| values.iter().any(|candidate| json_eq(v, candidate))),
            Self::Range { key, gte, lte } => match payload.get(key).and_then(Value::as_f64) {
                Some(v) => gte.is_none_or(|lo| v >= lo) && lte.is_none_or(|hi| v <= hi),
                None => false,
            },
            Self::HasId { ids } => ids.contains(id),
        }
    }

    fn to_qdrant(&self) -> Value {
        match self {
            Self::Equals { key, value } => json!({ "key": key, "match": { "value": value } }),
            Self::AnyOf { key, values } => json!({ "key": key, "match": { "any": values } }),
            Self::Range { key, gte, lte } => {
                let mut range = serde_json::Map::new();
                if let Some(lo) = gte {
                    range.insert("gte".into(), json!(lo));
                }
                if let Some(hi) = lte {
                    range.insert("lte".into(), json!(hi));
                }
                json!({ "key": key, "range": range })
            }
            Self::HasId { ids } => json!({ "has_id": ids }),
        }
    }
}

/// Equality that treats integer and float JSON numbers as comparable.
fn json_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(i), Some(j)) => i == j,
            _ => x
                .as_f64()
                .zip(y.as_f64())
                .is_some_and(|(f, g)| (f - g).abs() < f64::EPSILON),
        },
        _ => a == b,
    }
}

// ============================================================================
// Tests
// ============================================================================
