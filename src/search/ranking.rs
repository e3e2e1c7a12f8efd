//! Ranking strategies for recall results
//!
//! Each strategy re-scores and re-orders an already-filtered candidate set.
//! Archived and expired memories never reach this point.

use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::HashSet;

use crate::types::{RankStrategy, RecallResult};

/// Decay floor: old memories never vanish entirely
pub const DECAY_FLOOR: f64 = 0.1;

/// Composite score weights
const WEIGHT_DECAY: f64 = 0.3;
const WEIGHT_IMPORTANCE: f64 = 0.4;
const WEIGHT_SIMILARITY: f64 = 0.3;

/// Bonus for sharing a tag with the top-similarity hit (semantic linking)
const TAG_LINK_BONUS: f64 = 0.1;

/// Logarithmic temporal decay: `max(0.1, 1 / (1 + ln(1 + age_days)))`.
/// Monotonic, never zero, cheap.
pub fn temporal_decay(age_days: f64) -> f64 {
    let age = age_days.max(0.0);
    (1.0 / (1.0 + age.ln_1p())).max(DECAY_FLOOR)
}

fn age_days(updated_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    (now - updated_at).num_seconds().max(0) as f64 / 86_400.0
}

fn by_score_desc(a: &RecallResult, b: &RecallResult) -> Ordering {
    b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal)
}

/// Apply a ranking strategy in place
pub fn apply_strategy(results: &mut Vec<RecallResult>, strategy: RankStrategy, now: DateTime<Utc>) {
    match strategy {
        RankStrategy::Similarity => {
            for r in results.iter_mut() {
                r.score = r.similarity.unwrap_or(0.0);
            }
            results.sort_by(by_score_desc);
        }
        RankStrategy::Recency => {
            for r in results.iter_mut() {
                let decay = temporal_decay(age_days(r.memory.updated_at, now));
                r.score = (r.similarity.unwrap_or(1.0) as f64 * decay) as f32;
            }
            results.sort_by(|a, b| b.memory.updated_at.cmp(&a.memory.updated_at));
        }
        RankStrategy::Importance => {
            for r in results.iter_mut() {
                r.score = r.memory.importance.as_int() as f32 / 4.0;
            }
            results.sort_by(|a, b| {
                b.memory
                    .importance
                    .cmp(&a.memory.importance)
                    .then_with(|| {
                        b.similarity
                            .unwrap_or(0.0)
                            .partial_cmp(&a.similarity.unwrap_or(0.0))
                            .unwrap_or(Ordering::Equal)
                    })
            });
        }
        RankStrategy::Frequency => {
            // No access counter in the data model; importance stands in,
            // with recency breaking ties.
            for r in results.iter_mut() {
                r.score = r.memory.importance.as_int() as f32 / 4.0;
            }
            results.sort_by(|a, b| {
                b.memory
                    .importance
                    .cmp(&a.memory.importance)
                    .then_with(|| b.memory.updated_at.cmp(&a.memory.updated_at))
            });
        }
        RankStrategy::Composite => {
            let top_tags: HashSet<String> = top_similarity_tags(results);
            for r in results.iter_mut() {
                let decay = temporal_decay(age_days(r.memory.updated_at, now));
                let importance = r.memory.importance.as_int() as f64 / 4.0;
                let mut similarity_boost = r.similarity.unwrap_or(0.0) as f64;
                if !top_tags.is_empty() && r.memory.tags.iter().any(|t| top_tags.contains(t)) {
                    similarity_boost = (similarity_boost + TAG_LINK_BONUS).min(1.0);
                }
                r.score = (WEIGHT_DECAY * decay
                    + WEIGHT_IMPORTANCE * importance
                    + WEIGHT_SIMILARITY * similarity_boost) as f32;
            }
            results.sort_by(by_score_desc);
        }
    }
}

/// Tags of the highest-similarity result, the anchor for semantic linking
fn top_similarity_tags(results: &[RecallResult]) -> HashSet<String> {
    results
        .iter()
        .filter(|r| r.similarity.is_some())
        .max_by(|a, b| {
            a.similarity
                .partial_cmp(&b.similarity)
                .unwrap_or(Ordering::Equal)
        })
        .map(|r| r.memory.tags.iter().cloned().collect())
        .unwrap_or_default()
}
