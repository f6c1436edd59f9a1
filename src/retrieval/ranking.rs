//! Multi-factor ranking: `α·S_sem + β·W_learned + γ·C_concept + δ·R_recency`

use super::{learned_weight, Filters, Hit, Predicate, RankingConfig, ScoreBreakdown};
use crate::chunking::Chunk;
use crate::storage::InteractionRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Caller-facing search options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOptions {
    /// Number of hits to return
    pub k: usize,
    /// Metadata predicates applied in the index
    pub filters: Filters,
    /// Apply feedback-derived learned weights
    pub use_learned: bool,
    /// Apply the concept overlap signal and boost
    pub use_concepts: bool,
    /// Apply the recency signal
    pub use_recency: bool,
    /// Override the configured MMR setting
    pub mmr: Option<bool>,
    /// Attach a score breakdown to every hit
    pub explain: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            k: 8,
            filters: Filters::new(),
            use_learned: true,
            use_concepts: true,
            use_recency: false,
            mmr: None,
            explain: false,
        }
    }
}

impl SearchOptions {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            ..Self::default()
        }
    }

    pub fn with_filters(mut self, filters: Filters) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_filter(mut self, predicate: Predicate) -> Self {
        self.filters = self.filters.with(predicate);
        self
    }

    /// Pure semantic ranking: no learned weights, no concepts
    pub fn baseline(mut self) -> Self {
        self.use_learned = false;
        self.use_concepts = false;
        self
    }

    pub fn without_learned(mut self) -> Self {
        self.use_learned = false;
        self
    }

    pub fn without_concepts(mut self) -> Self {
        self.use_concepts = false;
        self
    }

    pub fn with_recency(mut self) -> Self {
        self.use_recency = true;
        self
    }

    pub fn with_mmr(mut self, enabled: bool) -> Self {
        self.mmr = Some(enabled);
        self
    }

    pub fn explain(mut self) -> Self {
        self.explain = true;
        self
    }
}

/// Raw signals for one candidate before weighting
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScoreInputs {
    pub semantic: f32,
    pub learned: f32,
    pub concept: f32,
    pub recency: f32,
}

/// Fraction of the query's concept path shared with a candidate's tags
///
/// Both sides are compared as node ids. Returns 0 for an empty path.
pub fn concept_overlap(query_concepts: &[String], tag_ids: &[String]) -> f32 {
    if query_concepts.is_empty() {
        return 0.0;
    }
    let tags: HashSet<&str> = tag_ids.iter().map(String::as_str).collect();
    let overlap = query_concepts
        .iter()
        .filter(|c| tags.contains(c.as_str()))
        .count();
    overlap as f32 / query_concepts.len() as f32
}

/// Fuses per-candidate signals into a final score
#[derive(Debug, Clone)]
pub struct RankingEngine {
    config: RankingConfig,
}

impl RankingEngine {
    pub fn new(config: RankingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RankingConfig {
        &self.config
    }

    /// Learned weight for a candidate's interactions within the query cluster
    pub fn learned(&self, interactions: &[InteractionRecord], now: DateTime<Utc>) -> f32 {
        learned_weight(interactions, now, &self.config)
    }

    /// Half-life recency of a chunk, by freshness date or creation time
    pub fn recency(&self, chunk: &Chunk, now: DateTime<Utc>) -> f32 {
        let stamp = chunk.freshness.unwrap_or(chunk.created_at);
        let age_secs = ((now - stamp).num_milliseconds() as f64 / 1000.0).max(0.0);
        let half_life_secs = (self.config.recency_half_life_days * 86_400.0).max(f64::MIN_POSITIVE);
        2f64.powf(-age_secs / half_life_secs) as f32
    }

    /// Weighted sum of the signals, boosted by concept overlap
    pub fn combine(&self, inputs: ScoreInputs) -> ScoreBreakdown {
        let c = &self.config;
        let base = c.alpha * inputs.semantic
            + c.beta * inputs.learned
            + c.gamma * inputs.concept
            + c.delta * inputs.recency;
        let total = base * (1.0 + c.concept_boost * inputs.concept);

        ScoreBreakdown {
            semantic: inputs.semantic,
            learned: inputs.learned,
            concept: inputs.concept,
            recency: inputs.recency,
            total,
        }
    }

    /// Apply scores, sort by total (highest first) and keep the top `k`
    ///
    /// Equal totals keep their incoming (cosine) order.
    pub fn rank(&self, scored: Vec<(Hit, ScoreBreakdown)>, k: usize, explain: bool) -> Vec<Hit> {
        let mut hits: Vec<Hit> = scored
            .into_iter()
            .map(|(mut hit, breakdown)| {
                hit.score = breakdown.total;
                hit.explanation = explain.then_some(breakdown);
                hit
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(k);
        hits
    }
}
