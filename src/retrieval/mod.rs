//! Retrieval & Ranking
//!
//! Filter predicates for index searches, the metadata/hit types flowing out
//! of the index, and the ranking engine that fuses semantic similarity with
//! feedback-derived learned weights, concept overlap and recency.

mod filter;
mod learned;
mod provenance;
mod ranking;

pub use filter::{FilterError, FilterField, Filters, Predicate};
pub use learned::{learned_weight, sigmoid, LearnedSignals};
pub use provenance::{ChunkMetadata, Hit, ScoreBreakdown};
pub use ranking::{concept_overlap, RankingEngine, ScoreInputs, SearchOptions};

use serde::{Deserialize, Serialize};

/// Ranking coefficients and parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    /// Semantic similarity weight
    pub alpha: f32,
    /// Learned weight
    pub beta: f32,
    /// Concept overlap weight
    pub gamma: f32,
    /// Recency weight
    pub delta: f32,

    /// Explicit votes (pos - neg)
    pub a1: f32,
    /// Mean dwell time in seconds
    pub a2: f32,
    /// Inverse mean click rank
    pub a3: f32,
    /// Transfer from similar queries
    pub a4: f32,
    /// Time decay penalty
    pub a5: f32,

    /// Half-life of interaction decay
    pub half_life_days: f64,
    /// Half-life of the recency signal
    pub recency_half_life_days: f64,

    /// Minimum cosine for a past query to join the current query's cluster
    pub cluster_threshold: f32,
    /// Maximum number of past queries in a cluster
    pub cluster_limit: usize,

    /// Multiplicative boost proportional to concept overlap
    pub concept_boost: f32,
    /// Index candidates fetched per requested hit before re-ranking, without MMR
    pub candidate_pool: usize,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            alpha: 0.6,
            beta: 0.3,
            gamma: 0.1,
            delta: 0.0,
            a1: 1.0,
            a2: 0.8,
            a3: 0.6,
            a4: 0.4,
            a5: 0.5,
            half_life_days: 14.0,
            recency_half_life_days: 30.0,
            cluster_threshold: 0.35,
            cluster_limit: 10,
            concept_boost: 0.2,
            candidate_pool: 3,
        }
    }
}
