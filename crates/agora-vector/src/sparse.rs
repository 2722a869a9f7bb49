//! Sparse vector generation.
//!
//! Turns a bag of weighted keys (query terms, structural features,
//! interaction signals) into the `{indices, weights}` form the vector
//! store's sparse format requires.
//!
//! # Invariants
//!
//! - `indices` are strictly ascending and unique
//! - `weights[i]` belongs to `indices[i]`
//! - zero and non-finite weights are dropped, so empty input yields an
//!   empty vector

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

/// A sparse vector in index/weight form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SparseVector {
    /// Dimension indices, strictly ascending.
    pub indices: Vec<u32>,

    /// Weights aligned with `indices`.
    #[serde(rename = "values")]
    pub weights: Vec<f32>,
}

impl SparseVector {
    /// Build from an index → weight map (already sorted by `BTreeMap`).
    fn from_sorted(map: BTreeMap<u32, f32>) -> Self {
        let mut indices = Vec::with_capacity(map.len());
        let mut weights = Vec::with_capacity(map.len());
        for (index, weight) in map {
            if weight != 0.0 && weight.is_finite() {
                indices.push(index);
                weights.push(weight);
            }
        }
        Self { indices, weights }
    }

    /// Number of non-zero entries.
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// Whether the vector has no entries.
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Weighted overlap (dot product) with another sparse vector.
    ///
    /// Merge-joins the two sorted index lists.
    pub fn dot(&self, other: &SparseVector) -> f32 {
        let (mut i, mut j) = (0, 0);
        let mut sum = 0.0;
        while i < self.indices.len() && j < other.indices.len() {
            match self.indices[i].cmp(&other.indices[j]) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    sum += self.weights[i] * other.weights[j];
                    i += 1;
                    j += 1;
                }
            }
        }
        sum
    }

    /// Whether the index list is strictly ascending with aligned weights.
    pub fn is_well_formed(&self) -> bool {
        self.indices.len() == self.weights.len()
            && self.indices.windows(2).all(|w| w[0] < w[1])
    }

    /// Iterate over `(index, weight)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (u32, f32)> + '_ {
        self.indices.iter().copied().zip(self.weights.iter().copied())
    }
}

/// Maps string keys to sparse indices.
#[derive(Debug, Clone, Default)]
pub enum SparseEncoder {
    /// Stable hash: the first four bytes of blake3(key). Colliding keys sum.
    #[default]
    Hashed,

    /// Registered vocabulary. Keys outside it are dropped.
    Vocabulary(HashMap<String, u32>),
}

impl SparseEncoder {
    /// Build a vocabulary encoder from keys, assigning indices in order.
    pub fn vocabulary<I, K>(keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        let mut vocab = HashMap::new();
        for key in keys {
            let next = vocab.len() as u32;
            vocab.entry(key.into()).or_insert(next);
        }
        Self::Vocabulary(vocab)
    }

    /// The index for a key, if the encoder knows it.
    pub fn index_of(&self, key: &str) -> Option<u32> {
        match self {
            Self::Hashed => Some(hash_index(key)),
            Self::Vocabulary(vocab) => vocab.get(key).copied(),
        }
    }

    /// Turn weighted keys into a sparse vector.
    pub fn sparsify<I, K>(&self, weights: I) -> SparseVector
    where
        I: IntoIterator<Item = (K, f32)>,
        K: AsRef<str>,
    {
        let mut merged: BTreeMap<u32, f32> = BTreeMap::new();
        for (key, weight) in weights {
            if weight == 0.0 || !weight.is_finite() {
                continue;
            }
            if let Some(index) = self.index_of(key.as_ref()) {
                *merged.entry(index).or_insert(0.0) += weight;
            }
        }
        SparseVector::from_sorted(merged)
    }
}

/// Sparsify with the default hashed encoder.
pub fn sparsify<I, K>(weights: I) -> SparseVector
where
    I: IntoIterator<Item = (K, f32)>,
    K: AsRef<str>,
{
    SparseEncoder::Hashed.sparsify(weights)
}

/// Combine sparse vectors as a weighted sum.
pub fn weighted_sum<'a, I>(vectors: I) -> SparseVector
where
    I: IntoIterator<Item = (&'a SparseVector, f32)>,
{
    let mut merged: BTreeMap<u32, f32> = BTreeMap::new();
    for (vector, scale) in vectors {
        for (index, weight) in vector.iter() {
            *merged.entry(index).or_insert(0.0) += weight * scale;
        }
    }
    SparseVector::from_sorted(merged)
}

fn hash_index(key: &str) -> u32 {
    let hash = blake3::hash(key.as_bytes());
    let bytes = hash.as_bytes();
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

// ============================================================================
// Text term weighting
// ============================================================================

fn stop_words() -> &'static HashSet<String> {
    static STOP_WORDS: OnceLock<HashSet<String>> = OnceLock::new();
    STOP_WORDS.get_or_init(|| {
        stop_words::get(stop_words::Language::English)
            .iter()
            .map(|w| w.to_string())
            .collect()
    })
}

/// Lowercased alphanumeric words of two or more characters.
pub fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 2)
        .map(|t| t.to_lowercase())
        .collect()
}

/// [`words`] with English function words removed.
pub fn tokenize(text: &str) -> Vec<String> {
    let stop = stop_words();
    words(text)
        .into_iter()
        .filter(|t| !stop.contains(t))
        .collect()
}

/// Sublinear term frequencies (`1 + ln(tf)`) keyed `term:<token>`.
///
/// The `term:` prefix keeps text terms apart from structural features
/// (`category:`, `author:`, `tag:`) that share the same sparse space.
pub fn term_weights(text: &str) -> HashMap<String, f32> {
    let mut counts: HashMap<String, u32> = HashMap::new();
    for token in tokenize(text) {
        *counts.entry(token).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .map(|(token, tf)| (format!("term:{token}"), 1.0 + (tf as f32).ln()))
        .collect()
}

// ============================================================================
// Tests
// ============================================================================
