//! Rank fusion for hybrid search and hybrid recommendations.
//!
//! # Algorithms
//!
//! - **RRF**: `score(d) = Σ 1/(k + rank_i(d))` with 1-based ranks. Ignores
//!   score magnitudes, so dense cosine and sparse dot scores can be mixed.
//! - **DBSF**: each list's scores are mapped onto `[μ-3σ, μ+3σ] → [0, 1]`
//!   before summing, preserving relative magnitudes within a list. A list
//!   whose scores have zero spread maps every item to 1.0.
//!
//! # Ordering
//!
//! Fused score descending, then the item's first appearance (earliest list,
//! then best rank in it), then id. Per-item contributions are summed in a
//! fixed order so equal contributions from different lists produce exactly
//! equal scores.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::str::FromStr;

use agora_core::Error;
use serde::{Deserialize, Serialize};

/// Standard RRF smoothing constant.
pub const DEFAULT_RRF_K: usize = 60;

/// How multiple ranked lists are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FusionMethod {
    /// Reciprocal rank fusion.
    #[default]
    Rrf,
    /// Distribution-based score fusion.
    Dbsf,
}

impl fmt::Display for FusionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Rrf => "rrf",
            Self::Dbsf => "dbsf",
        })
    }
}

impl FromStr for FusionMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "rrf" => Ok(Self::Rrf),
            "dbsf" => Ok(Self::Dbsf),
            other => Err(Error::bad_request(format!(
                "unknown fusion method '{other}' (expected rrf or dbsf)"
            ))),
        }
    }
}

/// One fused item.
#[derive(Debug, Clone, PartialEq)]
pub struct Fused<T> {
    /// Item identifier.
    pub id: T,
    /// Fused score (higher is better).
    pub score: f64,
    /// Indices of the input lists the item appeared in, ascending.
    pub sources: Vec<usize>,
}

struct Accumulator {
    contributions: Vec<f64>,
    sources: Vec<usize>,
    first_seen: (usize, usize),
}

/// Fuse ranked lists with the given method.
///
/// Each list is `(id, native_score)` ordered best first. Duplicate ids
/// within one list count once, at their best rank.
pub fn fuse<T>(lists: &[Vec<(T, f32)>], method: FusionMethod, k: usize) -> Vec<Fused<T>>
where
    T: Clone + Eq + Hash + Ord,
{
    match method {
        FusionMethod::Rrf => reciprocal_rank_fusion(lists, k),
        FusionMethod::Dbsf => distribution_based_fusion(lists),
    }
}

/// Reciprocal rank fusion over any number of lists.
pub fn reciprocal_rank_fusion<T>(lists: &[Vec<(T, f32)>], k: usize) -> Vec<Fused<T>>
where
    T: Clone + Eq + Hash + Ord,
{
    accumulate(lists, |_list, rank, _score| 1.0 / (k as f64 + (rank + 1) as f64))
}

/// Distribution-based score fusion over any number of lists.
pub fn distribution_based_fusion<T>(lists: &[Vec<(T, f32)>]) -> Vec<Fused<T>>
where
    T: Clone + Eq + Hash + Ord,
{
    let bounds: Vec<Option<(f64, f64)>> = lists.iter().map(|l| three_sigma_bounds(l)).collect();
    accumulate(lists, |list, _rank, score| match bounds[list] {
        Some((lower, upper)) if upper > lower => (f64::from(score) - lower) / (upper - lower),
        _ => 1.0,
    })
}

/// `(μ - 3σ, μ + 3σ)` of a list's scores; `None` for an empty list.
fn three_sigma_bounds<T>(list: &[(T, f32)]) -> Option<(f64, f64)> {
    if list.is_empty() {
        return None;
    }
    let n = list.len() as f64;
    let mean = list.iter().map(|(_, s)| f64::from(*s)).sum::<f64>() / n;
    let variance = list
        .iter()
        .map(|(_, s)| (f64::from(*s) - mean).powi(2))
        .sum::<f64>()
        / n;
    let sigma = variance.sqrt();
    Some((mean - 3.0 * sigma, mean + 3.0 * sigma))
}

fn accumulate<T, F>(lists: &[Vec<(T, f32)>], contribution: F) -> Vec<Fused<T>>
where
    T: Clone + Eq + Hash + Ord,
    F: Fn(usize, usize, f32) -> f64,
{
    let mut acc: HashMap<T, Accumulator> = HashMap::new();

    for (list_idx, list) in lists.iter().enumerate() {
        for (rank, (id, score)) in list.iter().enumerate() {
            let entry = acc.entry(id.clone()).or_insert_with(|| Accumulator {
                contributions: Vec::new(),
                sources: Vec::new(),
                first_seen: (list_idx, rank),
            });
            if entry.sources.last() == Some(&list_idx) {
                continue;
            }
            entry.sources.push(list_idx);
            entry.contributions.push(contribution(list_idx, rank, *score));
        }
    }

    let mut fused: Vec<(Fused<T>, (usize, usize))> = acc
        .into_iter()
        .map(|(id, mut a)| {
            a.contributions.sort_by(|x, y| x.total_cmp(y));
            let score = a.contributions.iter().sum();
            (
                Fused {
                    id,
                    score,
                    sources: a.sources,
                },
                a.first_seen,
            )
        })
        .collect();

    fused.sort_by(|(a, a_seen), (b, b_seen)| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a_seen.cmp(b_seen))
            .then_with(|| a.id.cmp(&b.id))
    });
    fused.into_iter().map(|(f, _)| f).collect()
}

// ============================================================================
// Tests
// ============================================================================
