/// Embedding & Indexing
///
/// Deterministic text embeddings and the in-memory vector index.
/// Architecture:
/// - EmbeddingProvider trait for abstraction
/// - HashingEmbedder for model-free local embedding (384-dim by default)
/// - VectorIndex for filtered exact kNN with MMR diversity selection
pub mod math;
mod provider;
mod vector_index;

pub use math::{centroid, cosine, l2_normalize};
pub use provider::{
    EmbeddingError, EmbeddingProvider, HashingEmbedder, DEFAULT_DIMENSION, DEFAULT_NAMESPACE,
};
pub use vector_index::{
    IndexError, IndexQuery, UpsertStats, VectorIndex, DEFAULT_CANDIDATE_MULTIPLIER,
    DEFAULT_MMR_LAMBDA,
};

use serde::{Deserialize, Serialize};

/// Configuration for embedding generation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Hashing namespace; part of the embedding fingerprint
    pub namespace: String,
    /// Embedding dimension
    pub dimension: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            dimension: DEFAULT_DIMENSION,
        }
    }
}

impl EmbeddingConfig {
    /// Build the hashing embedder described by this configuration
    pub fn build(&self) -> Result<HashingEmbedder, EmbeddingError> {
        HashingEmbedder::new(self.namespace.clone(), self.dimension)
    }
}

/// Configuration for the vector index
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Raw-cosine candidates gathered per requested result before MMR
    pub candidate_multiplier: usize,
    /// Whether searches apply MMR unless told otherwise
    pub mmr: bool,
    /// MMR relevance/diversity trade-off (1.0 = pure relevance)
    pub mmr_lambda: f32,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            candidate_multiplier: DEFAULT_CANDIDATE_MULTIPLIER,
            mmr: true,
            mmr_lambda: DEFAULT_MMR_LAMBDA,
        }
    }
}
