//! Sliding-window chunking with content-addressed ids
//!
//! Tokens are whitespace-delimited so chunk boundaries are reproducible
//! without a model tokenizer. Each chunk records its token offsets in the
//! source so snippets can be reconstructed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default window size in tokens
pub const DEFAULT_WINDOW: usize = 800;
/// Default overlap between consecutive windows in tokens
pub const DEFAULT_OVERLAP: usize = 160;

/// Where a chunk came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    /// URL or file path of the source document
    pub url: String,
    /// Selector inside the source (CSS selector, anchor, "#" for the whole document)
    pub selector: String,
}

impl SourceRef {
    /// Reference to a whole document
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            selector: "#".to_string(),
        }
    }

    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = selector.into();
        self
    }
}

/// A content-addressed window of source text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Deterministic id: hash of (namespace, text)
    pub id: String,
    /// Owning workspace
    pub workspace: String,
    /// Source reference
    pub source: SourceRef,
    /// Window text (tokens joined by single spaces)
    pub text: String,
    /// Number of tokens in the window
    pub tokens: usize,
    /// Split algorithm tag, e.g. `sliding_800_160`
    pub split_algo: String,
    /// When the chunk was produced
    pub created_at: DateTime<Utc>,
    /// Optional freshness date of the source content
    pub freshness: Option<DateTime<Utc>>,
    /// Content hash of `text`, used for index deduplication
    pub hash: String,
    /// Token start offset in the source (inclusive)
    pub start: usize,
    /// Token end offset in the source (exclusive)
    pub end: usize,
}

/// BLAKE3 content hash, 32 hex characters
pub fn content_hash(text: &str) -> String {
    let hash = blake3::hash(text.as_bytes());
    format!("{:.32}", hash.to_hex())
}

/// Deterministic chunk id for `text` within an id namespace
pub fn chunk_id(namespace: &str, text: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(namespace.as_bytes());
    hasher.update(b"::");
    hasher.update(text.as_bytes());
    format!("{:.32}", hasher.finalize().to_hex())
}

/// Sliding-window chunker
#[derive(Debug, Clone)]
pub struct Chunker {
    window: usize,
    overlap: usize,
    namespace: String,
}

impl Chunker {
    /// Create a chunker. A zero window is treated as one token.
    pub fn new(window: usize, overlap: usize, namespace: impl Into<String>) -> Self {
        Self {
            window: window.max(1),
            overlap,
            namespace: namespace.into(),
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Distance between consecutive window starts, never below one token
    pub fn step(&self) -> usize {
        self.window.saturating_sub(self.overlap).max(1)
    }

    pub fn split_algo(&self) -> String {
        format!("sliding_{}_{}", self.window, self.overlap)
    }

    /// Split `text` into overlapping windows covering every token
    ///
    /// All windows but the last hold exactly `window` tokens; the loop ends
    /// as soon as a window reaches the end of the input.
    pub fn chunk(
        &self,
        workspace: &str,
        source: &SourceRef,
        text: &str,
        freshness: Option<DateTime<Utc>>,
    ) -> Vec<Chunk> {
        let tokens: Vec<&str> = text.split_whitespace().collect();
        let total = tokens.len();
        if total == 0 {
            return Vec::new();
        }

        let split_algo = self.split_algo();
        let created_at = Utc::now();
        let mut chunks = Vec::with_capacity(total / self.step() + 1);

        for start in (0..total).step_by(self.step()) {
            let end = total.min(start + self.window);
            let window_text = tokens[start..end].join(" ");

            chunks.push(Chunk {
                id: chunk_id(&self.namespace, &window_text),
                workspace: workspace.to_string(),
                source: source.clone(),
                hash: content_hash(&window_text),
                text: window_text,
                tokens: end - start,
                split_algo: split_algo.clone(),
                created_at,
                freshness,
                start,
                end,
            });

            if end == total {
                break;
            }
        }

        tracing::debug!(
            "Chunked {} tokens from {} into {} windows ({})",
            total,
            source.url,
            chunks.len(),
            split_algo
        );

        chunks
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW, DEFAULT_OVERLAP, "amem_v1")
    }
}

/// Chunking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Window size in tokens
    pub window: usize,
    /// Tokens shared by consecutive windows; must be smaller than `window`
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            overlap: DEFAULT_OVERLAP,
        }
    }
}

impl ChunkingConfig {
    /// Chunker for this configuration; chunk ids are scoped by `namespace`
    pub fn build(&self, namespace: impl Into<String>) -> Chunker {
        Chunker::new(self.window, self.overlap, namespace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(n: usize) -> String {
        (0..n).map(|i| format!("w{}", i)).collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn test_chunk_coverage() {
        let chunker = Chunker::new(800, 160, "test");
        let chunks = chunker.chunk("ws", &SourceRef::new("doc"), &words(2000), None);

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].start, 0);
        assert_eq!(chunks.last().unwrap().end, 2000);

        // No gaps and exact overlap between consecutive windows
        for pair in chunks.windows(2) {
            assert!(pair[1].start <= pair[0].end);
            assert_eq!(pair[0].end - pair[1].start, 160);
        }

        // All but the last window are full
        for chunk in &chunks[..chunks.len() - 1] {
            assert_eq!(chunk.tokens, 800);
        }
        assert_eq!(chunks[2].tokens, 720);
    }

    #[test]
    fn test_chunk_determinism() {
        let chunker = Chunker::default();
        let text = words(1234);
        let a = chunker.chunk("ws", &SourceRef::new("doc"), &text, None);
        let b = chunker.chunk("ws", &SourceRef::new("doc"), &text, None);

        let ids_a: Vec<_> = a.iter().map(|c| (c.id.clone(), c.start, c.end)).collect();
        let ids_b: Vec<_> = b.iter().map(|c| (c.id.clone(), c.start, c.end)).collect();
        assert_eq!(ids_a, ids_b);
    }

    #[test]
    fn test_short_text_single_chunk() {
        let chunker = Chunker::default();
        let chunks = chunker.chunk(
            "ws",
            &SourceRef::new("doc"),
            "  JWT   token\nvalidation  ",
            None,
        );

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "JWT token validation");
        assert_eq!(chunks[0].tokens, 3);
        assert_eq!(chunks[0].split_algo, "sliding_800_160");
    }

    #[test]
    fn test_empty_text() {
        let chunker = Chunker::default();
        assert!(chunker
            .chunk("ws", &SourceRef::new("doc"), " \n\t ", None)
            .is_empty());
    }

    #[test]
    fn test_overlap_not_smaller_than_window_terminates() {
        let chunker = Chunker::new(4, 10, "test");
        assert_eq!(chunker.step(), 1);

        let chunks = chunker.chunk("ws", &SourceRef::new("doc"), &words(6), None);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks.last().unwrap().end, 6);
    }

    #[test]
    fn test_chunk_id_depends_on_namespace() {
        assert_eq!(chunk_id("a", "text"), chunk_id("a", "text"));
        assert_ne!(chunk_id("a", "text"), chunk_id("b", "text"));
        assert_eq!(content_hash("text").len(), 32);
    }
}
