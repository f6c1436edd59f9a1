//! In-memory vector index with filtered kNN and MMR diversity selection
use super::math;
use crate::retrieval::{ChunkMetadata, Filters, Hit};
use ahash::{HashMap, HashMapExt};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

/// Default MMR trade-off between relevance and diversity
pub const DEFAULT_MMR_LAMBDA: f32 = 0.7;
/// Default ratio of raw-cosine candidates gathered per requested result
pub const DEFAULT_CANDIDATE_MULTIPLIER: usize = 3;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Invalid dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    #[error("Vector contains non-finite values (chunk {id})")]
    NonFinite { id: String },

    #[error("Mismatched upsert: {vectors} vectors for {metadatas} metadata entries")]
    LengthMismatch { vectors: usize, metadatas: usize },

    #[error("Embedding space mismatch: index holds '{expected}', got '{actual}'")]
    SpaceMismatch { expected: String, actual: String },

    #[error("Snapshot failed: {context}: {source}")]
    Snapshot {
        source: std::io::Error,
        context: String,
    },

    #[error("Snapshot serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Counts reported by an upsert
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertStats {
    /// New vectors appended
    pub inserted: usize,
    /// Existing entries whose metadata was replaced
    pub updated: usize,
}

/// Search parameters for [`VectorIndex::search`]
#[derive(Debug, Clone)]
pub struct IndexQuery<'a> {
    /// Number of results to return
    pub top_n: usize,
    /// Metadata predicates (logical AND)
    pub filters: &'a Filters,
    /// MMR lambda; `None` disables diversity reselection
    pub mmr_lambda: Option<f32>,
    /// Raw-cosine candidates gathered per requested result before MMR
    pub candidate_multiplier: usize,
}

impl<'a> IndexQuery<'a> {
    pub fn new(top_n: usize, filters: &'a Filters) -> Self {
        Self {
            top_n,
            filters,
            mmr_lambda: Some(DEFAULT_MMR_LAMBDA),
            candidate_multiplier: DEFAULT_CANDIDATE_MULTIPLIER,
        }
    }

    pub fn without_mmr(mut self) -> Self {
        self.mmr_lambda = None;
        self
    }

    pub fn with_mmr(mut self, lambda: f32) -> Self {
        self.mmr_lambda = Some(lambda.clamp(0.0, 1.0));
        self
    }

    pub fn with_candidate_multiplier(mut self, multiplier: usize) -> Self {
        self.candidate_multiplier = multiplier.max(1);
        self
    }
}

/// Flat in-memory vector index
///
/// Exact cosine scan over every stored vector. Entries are deduplicated by
/// content hash: re-upserting known content replaces metadata and keeps the
/// vector. The index is bound to one embedding space (fingerprint) and
/// refuses vectors from any other.
pub struct VectorIndex {
    dimension: usize,
    fingerprint: String,
    vectors: Vec<Vec<f32>>,
    metadata: Vec<ChunkMetadata>,
    by_hash: HashMap<String, usize>,
}

impl VectorIndex {
    /// Create an empty index for vectors of `dimension` from embedding space `fingerprint`
    pub fn new(dimension: usize, fingerprint: impl Into<String>) -> Self {
        Self {
            dimension,
            fingerprint: fingerprint.into(),
            vectors: Vec::new(),
            metadata: Vec::new(),
            by_hash: HashMap::new(),
        }
    }

    /// Fail unless `fingerprint` names the same embedding space as this index
    pub fn ensure_space(&self, fingerprint: &str) -> Result<(), IndexError> {
        if fingerprint != self.fingerprint {
            return Err(IndexError::SpaceMismatch {
                expected: self.fingerprint.clone(),
                actual: fingerprint.to_string(),
            });
        }
        Ok(())
    }

    /// Insert or update entries, deduplicating by content hash
    pub fn upsert(
        &mut self,
        vectors: Vec<Vec<f32>>,
        metadatas: Vec<ChunkMetadata>,
    ) -> Result<UpsertStats, IndexError> {
        if vectors.len() != metadatas.len() {
            return Err(IndexError::LengthMismatch {
                vectors: vectors.len(),
                metadatas: metadatas.len(),
            });
        }

        // Validate everything before mutating so a bad batch leaves no partial state
        for (vector, meta) in vectors.iter().zip(metadatas.iter()) {
            self.validate(vector)?;
            if !math::is_finite(vector) {
                return Err(IndexError::NonFinite {
                    id: meta.id().to_string(),
                });
            }
        }

        let mut stats = UpsertStats::default();
        for (vector, meta) in vectors.into_iter().zip(metadatas) {
            if let Some(&slot) = self.by_hash.get(meta.hash()) {
                self.metadata[slot] = meta;
                stats.updated += 1;
                continue;
            }

            self.by_hash.insert(meta.hash().to_string(), self.vectors.len());
            self.vectors.push(vector);
            self.metadata.push(meta);
            stats.inserted += 1;
        }

        tracing::debug!(
            "Index upsert: {} inserted, {} updated, {} total",
            stats.inserted,
            stats.updated,
            self.len()
        );

        Ok(stats)
    }

    /// Filtered kNN search with optional MMR reselection
    ///
    /// Gathers `candidate_multiplier * top_n` candidates by raw cosine. With
    /// MMR enabled, candidates are picked greedily by
    /// `λ·sim(c, q) − (1−λ)·max sim(c, selected)` until `top_n` are chosen.
    /// Results are ordered by cosine to the query, highest first.
    pub fn search(&self, query: &[f32], params: &IndexQuery<'_>) -> Result<Vec<Hit>, IndexError> {
        self.validate(query)?;
        if !math::is_finite(query) {
            return Err(IndexError::NonFinite {
                id: "query".to_string(),
            });
        }

        if params.top_n == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(usize, f32)> = self
            .metadata
            .iter()
            .enumerate()
            .filter(|(_, meta)| params.filters.matches(meta))
            .map(|(slot, _)| (slot, math::cosine(query, &self.vectors[slot])))
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let selected = match params.mmr_lambda {
            Some(lambda) => {
                scored.truncate(params.top_n.saturating_mul(params.candidate_multiplier.max(1)));
                let mut picked = self.mmr_select(&scored, params.top_n, lambda);
                picked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
                picked
            }
            None => {
                scored.truncate(params.top_n);
                scored
            }
        };

        Ok(selected
            .into_iter()
            .map(|(slot, score)| Hit::new(score, self.metadata[slot].clone()))
            .collect())
    }

    /// Greedy Maximal Marginal Relevance over pre-scored candidates
    fn mmr_select(&self, candidates: &[(usize, f32)], k: usize, lambda: f32) -> Vec<(usize, f32)> {
        let mut selected: Vec<(usize, f32)> = Vec::with_capacity(k.min(candidates.len()));
        let mut chosen = vec![false; candidates.len()];

        while selected.len() < k {
            let mut best: Option<(usize, f32)> = None;

            for (i, &(slot, relevance)) in candidates.iter().enumerate() {
                if chosen[i] {
                    continue;
                }

                let redundancy = selected
                    .iter()
                    .map(|&(other, _)| math::cosine(&self.vectors[slot], &self.vectors[other]))
                    .fold(None, |acc: Option<f32>, s| Some(acc.map_or(s, |a| a.max(s))))
                    .unwrap_or(0.0);

                let marginal = lambda * relevance - (1.0 - lambda) * redundancy;
                if best.map_or(true, |(_, score)| marginal > score) {
                    best = Some((i, marginal));
                }
            }

            let Some((i, _)) = best else {
                break;
            };
            chosen[i] = true;
            selected.push(candidates[i]);
        }

        selected
    }

    /// Write current metadata (not vectors) as JSON lines for audit
    pub fn snapshot(&self, path: &Path) -> Result<usize, IndexError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| IndexError::Snapshot {
                source: e,
                context: format!("Failed to create snapshot directory: {}", parent.display()),
            })?;
        }

        let file = fs::File::create(path).map_err(|e| IndexError::Snapshot {
            source: e,
            context: format!("Failed to create snapshot file: {}", path.display()),
        })?;
        let mut writer = BufWriter::new(file);

        for meta in &self.metadata {
            serde_json::to_writer(&mut writer, meta)?;
            writer.write_all(b"\n").map_err(|e| IndexError::Snapshot {
                source: e,
                context: "Failed to write snapshot line".to_string(),
            })?;
        }

        writer.flush().map_err(|e| IndexError::Snapshot {
            source: e,
            context: format!("Failed to flush snapshot: {}", path.display()),
        })?;

        tracing::info!("Wrote {} index entries to {}", self.len(), path.display());
        Ok(self.len())
    }

    /// Drop every entry chunked from `url`; returns how many were removed
    pub fn remove_source(&mut self, url: &str) -> usize {
        let before = self.len();
        let mut slot = 0;
        self.vectors.retain(|_| {
            let keep = self.metadata[slot].source().url != url;
            slot += 1;
            keep
        });
        self.metadata.retain(|meta| meta.source().url != url);

        if self.len() != before {
            self.by_hash = self
                .metadata
                .iter()
                .enumerate()
                .map(|(slot, meta)| (meta.hash().to_string(), slot))
                .collect();
        }
        before - self.len()
    }

    /// Remove every entry
    pub fn reset(&mut self) {
        self.vectors.clear();
        self.metadata.clear();
        self.by_hash.clear();
    }

    /// Get the number of vectors in the index
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    /// Check if index is empty
    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Get vector dimension
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Stored metadata in insertion order
    pub fn metadata(&self) -> impl Iterator<Item = &ChunkMetadata> {
        self.metadata.iter()
    }

    fn validate(&self, vector: &[f32]) -> Result<(), IndexError> {
        if vector.len() != self.dimension {
            return Err(IndexError::InvalidDimension {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }
}
