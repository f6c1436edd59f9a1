//! Workspace management
//!
//! A workspace owns one vector index and one concept hierarchy and shares the
//! embedding provider and the feedback store with every other workspace.
//! Vectors are never persisted: item bodies live in the store and are
//! re-chunked and re-embedded by [`Workspace::rehydrate`].

mod registry;

pub use registry::WorkspaceRegistry;

use crate::chunking::{Chunker, ChunkingConfig, SourceRef};
use crate::concepts::{ConceptConfig, ConceptHierarchy, ConceptTree, ROOT_ID};
use crate::embedding::{EmbeddingConfig, EmbeddingProvider, IndexConfig, IndexQuery, VectorIndex};
use crate::error::{AmemError, Result};
use crate::retrieval::{
    concept_overlap, ChunkMetadata, Hit, RankingConfig, RankingEngine, ScoreInputs, SearchOptions,
};
use crate::storage::{FeedbackStats, FeedbackStore, NewInteraction, QueryEmbedding, Usefulness};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

/// Engine settings shared by every workspace
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    pub embedding: EmbeddingConfig,
    pub chunking: ChunkingConfig,
    pub index: IndexConfig,
    pub concepts: ConceptConfig,
    pub ranking: RankingConfig,
}

/// Workspace summary
#[derive(Debug, Clone, Serialize)]
pub struct WorkspaceStats {
    pub workspace: String,
    /// Embedding space of the index
    pub fingerprint: String,
    /// Chunks currently indexed
    pub chunks: usize,
    /// Concept nodes, root excluded
    pub concepts: usize,
    pub concept_depth: usize,
    /// Distinct sources carrying at least one concept tag
    pub tagged_sources: usize,
    #[serde(flatten)]
    pub feedback: FeedbackStats,
}

/// Check that `name` can be used as a workspace name
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(AmemError::validation("workspace", "name cannot be empty"));
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Err(AmemError::validation(
            "workspace",
            format!("invalid character '{}' in '{}'", bad, name),
        ));
    }
    Ok(())
}

/// One isolated retrieval memory
pub struct Workspace {
    name: String,
    settings: EngineConfig,
    provider: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn FeedbackStore>,
    chunker: Chunker,
    index: VectorIndex,
    concepts: ConceptHierarchy,
    ranking: RankingEngine,
    /// Concept node id -> sources already counted as support
    tagged_sources: BTreeMap<String, BTreeSet<String>>,
}

impl Workspace {
    /// Create an empty workspace; call [`Workspace::rehydrate`] to load stored items
    pub fn new(
        name: impl Into<String>,
        settings: EngineConfig,
        provider: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn FeedbackStore>,
    ) -> Result<Self> {
        let name = name.into();
        validate_name(&name)?;

        let concept_embedder = settings.embedding.build()?;
        let chunker = settings.chunking.build(settings.embedding.namespace.clone());
        let index = VectorIndex::new(provider.dimension(), provider.fingerprint());

        Ok(Self {
            concepts: ConceptHierarchy::new(concept_embedder, settings.concepts.clone()),
            ranking: RankingEngine::new(settings.ranking.clone()),
            name,
            chunker,
            index,
            tagged_sources: BTreeMap::new(),
            settings,
            provider,
            store,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &EngineConfig {
        &self.settings
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    pub fn concepts(&self) -> &ConceptHierarchy {
        &self.concepts
    }

    /// Store, chunk, embed and index a source; returns the chunk ids
    ///
    /// Re-adding identical text is idempotent: chunks are deduplicated by
    /// content hash and concept support is counted once per source.
    pub fn add(
        &mut self,
        source_id: &str,
        text: &str,
        tags: &[String],
        freshness: Option<DateTime<Utc>>,
    ) -> Result<Vec<String>> {
        if source_id.trim().is_empty() {
            return Err(AmemError::validation("source_id", "source id cannot be empty"));
        }
        if text.split_whitespace().next().is_none() {
            tracing::debug!("Skipping empty source {}", source_id);
            return Ok(Vec::new());
        }

        let tags = clean_tags(tags);
        let item_id = self
            .store
            .add_item(&self.name, source_id, text, &tags, freshness)?;

        self.ingest(&item_id, source_id, text, &tags, freshness)
    }

    fn ingest(
        &mut self,
        item_id: &str,
        source_id: &str,
        text: &str,
        tags: &[String],
        freshness: Option<DateTime<Utc>>,
    ) -> Result<Vec<String>> {
        let chunks = self
            .chunker
            .chunk(&self.name, &SourceRef::new(source_id), text, freshness);
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let ids: Vec<String> = chunks.iter().map(|c| c.id.clone()).collect();

        let stale = self.index.remove_source(source_id);
        if stale > 0 {
            tracing::debug!("Dropped {} indexed chunks of {}", stale, source_id);
        }

        if !chunks.is_empty() {
            let vectors = self.provider.embed_batch_checked(&texts)?;
            let metadatas = chunks
                .into_iter()
                .map(|chunk| ChunkMetadata::new(chunk, tags.to_vec(), Some(item_id.to_string())))
                .collect();
            let stats = self.index.upsert(vectors, metadatas)?;

            tracing::info!(
                "Indexed {} into '{}': {} new chunks, {} updated",
                source_id,
                self.name,
                stats.inserted,
                stats.updated
            );
        }

        for tag in tags {
            let outcome = self.concepts.insert(tag);
            if outcome.id == ROOT_ID {
                // Blank or merged into the root: nothing specific to support
                continue;
            }
            let sources = self.tagged_sources.entry(outcome.id).or_default();
            if sources.insert(source_id.to_string()) {
                self.concepts.record_support(tag);
            }
        }

        Ok(ids)
    }

    /// Ranked hits for `query`
    ///
    /// The query is logged with its embedding before anything is scored, so
    /// even an empty result contributes to future query clusters.
    pub fn search(&self, query: &str, options: &SearchOptions) -> Result<Vec<Hit>> {
        let vector = self.provider.embed_checked(query)?;
        let fingerprint = self.provider.fingerprint();
        let embedding = QueryEmbedding {
            model: &fingerprint,
            vector: &vector,
        };
        let qid = self.store.log_query(&self.name, query, Some(embedding))?;

        if options.k == 0 || self.index.is_empty() {
            return Ok(Vec::new());
        }
        self.index.ensure_space(&fingerprint)?;

        // MMR already draws on a multiplied candidate set and must pick the
        // final k itself; only plain kNN widens the pool for re-scoring
        let index_settings = &self.settings.index;
        let params = if options.mmr.unwrap_or(index_settings.mmr) {
            IndexQuery::new(options.k, &options.filters)
                .with_candidate_multiplier(index_settings.candidate_multiplier)
                .with_mmr(index_settings.mmr_lambda)
        } else {
            let pool = options
                .k
                .saturating_mul(self.ranking.config().candidate_pool.max(1));
            IndexQuery::new(pool, &options.filters).without_mmr()
        };
        let candidates = self.index.search(&vector, &params)?;

        let cluster = if options.use_learned {
            Some(self.query_cluster(&qid, embedding)?)
        } else {
            None
        };
        let query_concepts = if options.use_concepts && !self.concepts.is_empty() {
            self.concepts.resolve_ids(query)
        } else {
            Vec::new()
        };

        let now = Utc::now();
        let mut scored = Vec::with_capacity(candidates.len());
        for hit in candidates {
            let learned = match (&cluster, &hit.metadata.item_id) {
                (Some(cluster), Some(item_id)) => {
                    let interactions =
                        self.store
                            .get_item_interactions(item_id, Some(cluster.as_slice()), None)?;
                    self.ranking.learned(&interactions, now)
                }
                _ => 0.0,
            };

            let concept = if query_concepts.is_empty() {
                0.0
            } else {
                let tag_ids: Vec<String> = hit
                    .metadata
                    .tags
                    .iter()
                    .filter_map(|tag| self.concepts.node_for(tag))
                    .filter(|id| id != ROOT_ID)
                    .collect();
                concept_overlap(&query_concepts, &tag_ids)
            };

            let recency = if options.use_recency {
                self.ranking.recency(&hit.metadata.chunk, now)
            } else {
                0.0
            };

            let breakdown = self.ranking.combine(ScoreInputs {
                semantic: hit.score,
                learned,
                concept,
                recency,
            });
            scored.push((hit, breakdown));
        }

        let hits = self.ranking.rank(scored, options.k, options.explain);
        tracing::debug!("Query {} returned {} hits", qid, hits.len());
        Ok(hits)
    }

    /// Current query plus similar past queries in this workspace
    fn query_cluster(&self, qid: &str, embedding: QueryEmbedding<'_>) -> Result<Vec<String>> {
        let config = self.ranking.config();
        let similar = self.store.get_similar_queries(
            &self.name,
            embedding,
            config.cluster_threshold,
            config.cluster_limit + 1,
        )?;

        let mut cluster = vec![qid.to_string()];
        cluster.extend(
            similar
                .into_iter()
                .filter(|id| id != qid)
                .take(config.cluster_limit),
        );
        Ok(cluster)
    }

    /// Record one interaction of `query` with an item (id or source path)
    pub fn feedback(
        &self,
        query: &str,
        item_ref: &str,
        usefulness: Usefulness,
        dwell_ms: u64,
        click_rank: u32,
    ) -> Result<()> {
        let item = self
            .store
            .find_item(&self.name, item_ref)?
            .ok_or_else(|| AmemError::not_found("item", item_ref))?;

        let vector = self.provider.embed_checked(query)?;
        let fingerprint = self.provider.fingerprint();
        let qid = self.store.log_query(
            &self.name,
            query,
            Some(QueryEmbedding {
                model: &fingerprint,
                vector: &vector,
            }),
        )?;

        self.store.log_interaction(
            &NewInteraction::new(qid, item.item_id.clone(), usefulness)
                .with_dwell(dwell_ms)
                .with_rank(click_rank),
        )?;

        tracing::info!(
            "Feedback on {} in '{}': {}",
            item.item_id,
            self.name,
            usefulness
        );
        Ok(())
    }

    /// Concept path closest to a label or free-text query, e.g. `root > Auth > JWT`
    pub fn concept_path(&self, label_or_query: &str) -> String {
        self.concepts.resolve_path(label_or_query)
    }

    pub fn concept_tree(&self) -> ConceptTree {
        self.concepts.tree()
    }

    pub fn stats(&self) -> Result<WorkspaceStats> {
        let tagged: BTreeSet<&String> = self.tagged_sources.values().flatten().collect();

        Ok(WorkspaceStats {
            workspace: self.name.clone(),
            fingerprint: self.index.fingerprint().to_string(),
            chunks: self.index.len(),
            concepts: self.concepts.len(),
            concept_depth: self.concepts.depth(),
            tagged_sources: tagged.len(),
            feedback: self.store.get_workspace_stats(&self.name)?,
        })
    }

    /// Drop every indexed vector; concepts and feedback history are kept
    pub fn reset(&mut self) {
        let dropped = self.index.len();
        self.index.reset();
        tracing::info!("Reset workspace '{}' ({} chunks dropped)", self.name, dropped);
    }

    /// Write the index metadata as JSON lines; returns the number of records
    pub fn snapshot(&self, path: &Path) -> Result<usize> {
        Ok(self.index.snapshot(path)?)
    }

    /// Re-ingest every stored item; returns the number of items loaded
    pub fn rehydrate(&mut self) -> Result<usize> {
        let items = self.store.list_items(&self.name)?;

        let mut chunks = 0;
        for item in &items {
            let content = self.store.item_content(&item.item_id)?;
            chunks += self
                .ingest(
                    &item.item_id,
                    &item.path,
                    &content,
                    &item.concepts,
                    item.freshness,
                )?
                .len();
        }

        if !items.is_empty() {
            tracing::info!(
                "Rehydrated '{}': {} items, {} chunks",
                self.name,
                items.len(),
                chunks
            );
        }
        Ok(items.len())
    }
}

/// Trimmed, non-empty, first-occurrence-ordered tags
fn clean_tags(tags: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    tags.iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .filter(|t| seen.insert(t.to_lowercase()))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;
    use crate::retrieval::{FilterField, Predicate};
    use crate::storage::StorageManager;
    use tempfile::TempDir;

    fn workspace(name: &str) -> (TempDir, Workspace) {
        let temp_dir = TempDir::new().unwrap();
        let store = StorageManager::new(temp_dir.path().to_path_buf(), 1024).unwrap();
        let provider = HashingEmbedder::with_defaults().unwrap();
        let ws = Workspace::new(
            name,
            EngineConfig::default(),
            Arc::new(provider),
            Arc::new(store),
        )
        .unwrap();
        (temp_dir, ws)
    }

    fn tags(labels: &[&str]) -> Vec<String> {
        labels.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("w1").is_ok());
        assert!(validate_name("team.docs-v2_x").is_ok());
        assert!(validate_name("").unwrap_err().is_validation());
        assert!(validate_name("a b").unwrap_err().is_validation());
        assert!(validate_name("a:b").unwrap_err().is_validation());
    }

    #[test]
    fn test_add_is_idempotent() {
        let (_tmp, mut ws) = workspace("w1");
        let text = "JWT token validation middleware";

        let first = ws.add("auth.rs", text, &[], None).unwrap();
        let second = ws.add("auth.rs", text, &[], None).unwrap();

        assert_eq!(first, second);
        assert_eq!(ws.index().len(), 1);
    }

    #[test]
    fn test_edited_source_replaces_its_chunks() {
        let (_tmp, mut ws) = workspace("w1");
        ws.add("a.md", "JWT token validation middleware", &[], None)
            .unwrap();
        ws.add("a.md", "database schema migration notes", &[], None)
            .unwrap();
        assert_eq!(ws.index().len(), 1);

        let hits = ws.search("JWT validation", &SearchOptions::new(5)).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text(), "database schema migration notes");

        let current = ws.store.find_item("w1", "a.md").unwrap().unwrap();
        assert_eq!(hits[0].metadata.item_id.as_deref(), Some(current.item_id.as_str()));
    }

    #[test]
    fn test_search_keeps_mmr_diversity() {
        let (_tmp, mut ws) = workspace("w1");
        ws.add("dup1.md", "alpha beta gamma", &[], None).unwrap();
        ws.add("dup2.md", "alpha beta gamma alpha beta gamma", &[], None)
            .unwrap();
        ws.add("other.md", "delta", &[], None).unwrap();
        let query = "alpha beta gamma delta";

        let urls = |hits: Vec<Hit>| -> Vec<String> {
            hits.iter().map(|h| h.metadata.source().url.clone()).collect()
        };

        let plain = urls(
            ws.search(query, &SearchOptions::new(2).baseline().with_mmr(false))
                .unwrap(),
        );
        assert!(plain.contains(&"dup1.md".to_string()));
        assert!(plain.contains(&"dup2.md".to_string()));

        let diverse = urls(
            ws.search(query, &SearchOptions::new(2).baseline().with_mmr(true))
                .unwrap(),
        );
        assert_eq!(diverse.len(), 2);
        assert!(diverse.contains(&"other.md".to_string()));
        assert_eq!(diverse.iter().filter(|u| u.starts_with("dup")).count(), 1);
    }

    #[test]
    fn test_empty_text_adds_nothing() {
        let (_tmp, mut ws) = workspace("w1");
        assert!(ws.add("empty.md", "   \n ", &tags(&["Auth"]), None).unwrap().is_empty());
        assert!(ws.index().is_empty());
        assert!(ws.concepts().is_empty());
        assert!(ws.add("", "text", &[], None).unwrap_err().is_validation());
    }

    #[test]
    fn test_search_empty_workspace_logs_query() {
        let (_tmp, ws) = workspace("w1");
        let hits = ws.search("anything", &SearchOptions::default()).unwrap();
        assert!(hits.is_empty());
        assert_eq!(ws.stats().unwrap().feedback.total_queries, 1);

        assert!(ws.search("something else", &SearchOptions::new(0)).unwrap().is_empty());
        assert_eq!(ws.stats().unwrap().feedback.total_queries, 2);
    }

    #[test]
    fn test_concept_support_counted_once_per_source() {
        let (_tmp, mut ws) = workspace("w1");
        let auth = tags(&["Auth", "auth "]);

        ws.add("a.md", "login flow with sessions", &auth, None).unwrap();
        ws.add("a.md", "login flow with sessions", &auth, None).unwrap();
        ws.add("b.md", "password reset tokens", &auth, None).unwrap();

        let node = ws.concepts().get("node_auth").unwrap();
        assert_eq!(node.support_docs, 2);
        assert_eq!(ws.stats().unwrap().tagged_sources, 2);
    }

    #[test]
    fn test_concept_overlap_in_explanation() {
        let (_tmp, mut ws) = workspace("w1");
        ws.add(
            "a.rs",
            "JWT token validation middleware",
            &tags(&["JWT validation"]),
            None,
        )
        .unwrap();
        ws.add("b.rs", "user model password hashing", &[], None)
            .unwrap();

        let hits = ws
            .search("JWT validation", &SearchOptions::new(2).explain())
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].metadata.source().url, "a.rs");

        let top = hits[0].explanation.unwrap();
        assert!((top.concept - 0.5).abs() < 1e-6);
        assert_eq!(hits[1].explanation.unwrap().concept, 0.0);
        assert_eq!(ws.concept_path("JWT validation"), "root > JWT validation");
    }

    #[test]
    fn test_search_respects_filters() {
        let (_tmp, mut ws) = workspace("w1");
        ws.add("docs/auth.md", "JWT token validation", &[], None)
            .unwrap();
        ws.add("src/auth.rs", "JWT token validation code", &[], None)
            .unwrap();

        let options = SearchOptions::new(5).with_filter(Predicate::equals(FilterField::Source, "src/auth.rs"));
        let hits = ws.search("JWT validation", &options).unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].metadata.source().url, "src/auth.rs");
    }

    #[test]
    fn test_feedback_requires_known_item() {
        let (_tmp, mut ws) = workspace("w1");
        ws.add("a.rs", "JWT token validation middleware", &[], None)
            .unwrap();

        let err = ws
            .feedback("JWT validation", "missing.rs", Usefulness::Useful, 0, 0)
            .unwrap_err();
        assert!(matches!(err, AmemError::NotFound { kind: "item", .. }));

        ws.feedback("JWT validation", "a.rs", Usefulness::Useful, 1200, 1)
            .unwrap();
        let stats = ws.stats().unwrap();
        assert_eq!(stats.feedback.total_interactions, 1);
        assert_eq!(stats.feedback.total_queries, 1);
    }

    #[test]
    fn test_reset_keeps_concepts_and_rehydrate_restores() {
        let (_tmp, mut ws) = workspace("w1");
        ws.add("a.md", "login flow with sessions", &tags(&["Auth"]), None)
            .unwrap();
        ws.add("b.md", "password reset tokens", &[], None).unwrap();

        ws.reset();
        assert!(ws.index().is_empty());
        assert_eq!(ws.concepts().len(), 1);

        assert_eq!(ws.rehydrate().unwrap(), 2);
        assert_eq!(ws.index().len(), 2);
        assert_eq!(ws.concepts().get("node_auth").unwrap().support_docs, 1);
    }

    #[test]
    fn test_snapshot_writes_every_chunk() {
        let (tmp, mut ws) = workspace("w1");
        ws.add("a.md", "login flow with sessions", &[], None).unwrap();
        ws.add("b.md", "password reset tokens", &[], None).unwrap();

        let path = tmp.path().join("snap").join("w1.jsonl");
        assert_eq!(ws.snapshot(&path).unwrap(), 2);
        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written.lines().count(), 2);
    }
}
