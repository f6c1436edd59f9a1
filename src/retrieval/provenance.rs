//! Chunk metadata stored in the index and scored hit structures

use crate::chunking::{Chunk, SourceRef};
use serde::{Deserialize, Serialize};

/// Metadata stored alongside every indexed vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// The chunk itself (id, source, text, offsets, hashes)
    #[serde(flatten)]
    pub chunk: Chunk,

    /// Concept labels the source was tagged with
    #[serde(default)]
    pub tags: Vec<String>,

    /// Feedback-store item this chunk belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
}

impl ChunkMetadata {
    pub fn new(chunk: Chunk, tags: Vec<String>, item_id: Option<String>) -> Self {
        Self {
            chunk,
            tags,
            item_id,
        }
    }

    pub fn id(&self) -> &str {
        &self.chunk.id
    }

    pub fn hash(&self) -> &str {
        &self.chunk.hash
    }

    pub fn source(&self) -> &SourceRef {
        &self.chunk.source
    }
}

/// Per-hit score breakdown returned in explain mode
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    #[serde(rename = "S_sem")]
    pub semantic: f32,
    #[serde(rename = "W_learned")]
    pub learned: f32,
    #[serde(rename = "C_concept")]
    pub concept: f32,
    #[serde(rename = "R_recency")]
    pub recency: f32,
    pub total: f32,
}

/// A ranked search result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hit {
    /// Final score (raw cosine for index hits, fused total after ranking)
    pub score: f32,

    /// Chunk metadata, including the full text
    pub metadata: ChunkMetadata,

    /// Score components, present when explain mode was requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<ScoreBreakdown>,
}

impl Hit {
    pub fn new(score: f32, metadata: ChunkMetadata) -> Self {
        Self {
            score,
            metadata,
            explanation: None,
        }
    }

    pub fn text(&self) -> &str {
        &self.metadata.chunk.text
    }

    /// Get a short preview of the text (first N characters)
    pub fn snippet(&self, max_chars: usize) -> String {
        let text = self.text();
        match text.char_indices().nth(max_chars) {
            Some((cut, _)) => format!("{}…", &text[..cut]),
            None => text.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::Chunker;

    fn metadata(text: &str) -> ChunkMetadata {
        let chunk = Chunker::default()
            .chunk("ws", &SourceRef::new("doc.md"), text, None)
            .remove(0);
        ChunkMetadata::new(chunk, vec!["Auth".to_string()], Some("abc:doc.md".to_string()))
    }

    #[test]
    fn test_snippet_truncates_on_char_boundary() {
        let hit = Hit::new(0.5, metadata("héllo wörld again"));
        assert_eq!(hit.snippet(5), "héllo…");
        assert_eq!(hit.snippet(100), "héllo wörld again");
    }

    #[test]
    fn test_metadata_serializes_flat() {
        let json = serde_json::to_value(metadata("some text")).unwrap();
        assert_eq!(json["text"], "some text");
        assert_eq!(json["tags"][0], "Auth");
        assert_eq!(json["item_id"], "abc:doc.md");
    }
}
