//! Embedding provider trait and the feature-hashing implementation
use super::math;
use regex::Regex;
use thiserror::Error;

/// Default embedding dimension
pub const DEFAULT_DIMENSION: usize = 384;
/// Default hashing namespace; changing it makes old vectors incomparable
pub const DEFAULT_NAMESPACE: &str = "amem_v1";

/// Version of the hashing scheme, part of every fingerprint
const HASHING_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("Embedding provider initialization failed: {0}")]
    InitializationError(String),

    #[error("Embedding generation failed: {0}")]
    GenerationError(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Trait for embedding providers
///
/// Every vector a provider returns must be L2-normalized (or all zeros) and
/// deterministic for a given input. The fingerprint names the embedding
/// space; vectors from different fingerprints must never be compared.
pub trait EmbeddingProvider: Send + Sync {
    /// Generate the embedding for a single text
    fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Generate embeddings for multiple texts
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        texts.iter().map(|text| self.embed_one(text)).collect()
    }

    /// Get the embedding dimension
    fn dimension(&self) -> usize;

    /// Identifier of the embedding space (algorithm, version, namespace, dimension)
    fn fingerprint(&self) -> String;

    /// Similarity between two vectors of this space
    fn cosine(&self, u: &[f32], v: &[f32]) -> f32 {
        math::cosine(u, v)
    }

    /// [`embed_one`](Self::embed_one) with the output dimension verified
    fn embed_checked(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let vector = self.embed_one(text)?;
        check_dimension(self.dimension(), &vector)?;
        Ok(vector)
    }

    /// [`embed_batch`](Self::embed_batch) with one vector per text of the declared dimension
    fn embed_batch_checked(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let vectors = self.embed_batch(texts)?;
        if vectors.len() != texts.len() {
            return Err(EmbeddingError::GenerationError(format!(
                "expected {} embeddings, provider returned {}",
                texts.len(),
                vectors.len()
            )));
        }
        for vector in &vectors {
            check_dimension(self.dimension(), vector)?;
        }
        Ok(vectors)
    }
}

fn check_dimension(expected: usize, vector: &[f32]) -> Result<(), EmbeddingError> {
    if vector.len() != expected {
        return Err(EmbeddingError::DimensionMismatch {
            expected,
            actual: vector.len(),
        });
    }
    Ok(())
}

/// Deterministic feature-hashing embedder
///
/// Stand-in for a trained model: each lowercase word token is hashed with
/// BLAKE3 over `namespace::token` into a slot and a sign, the signs are
/// accumulated and the result is L2-normalized.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    namespace: String,
    dimension: usize,
    word: Regex,
}

impl HashingEmbedder {
    /// Create a hashing embedder for the given namespace and dimension
    pub fn new(namespace: impl Into<String>, dimension: usize) -> Result<Self, EmbeddingError> {
        if dimension == 0 {
            return Err(EmbeddingError::InitializationError(
                "dimension must be greater than 0".to_string(),
            ));
        }

        let word = Regex::new(r"\w+")
            .map_err(|e| EmbeddingError::InitializationError(e.to_string()))?;

        Ok(Self {
            namespace: namespace.into(),
            dimension,
            word,
        })
    }

    /// Embedder with the default namespace and dimension
    pub fn with_defaults() -> Result<Self, EmbeddingError> {
        Self::new(DEFAULT_NAMESPACE, DEFAULT_DIMENSION)
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Lowercase word tokens of `text`
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        let lowered = text.to_lowercase();
        self.word
            .find_iter(&lowered)
            .map(|m| m.as_str().to_string())
            .collect()
    }

    /// Infallible embedding; the zero vector for text without tokens
    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in self.tokenize(text) {
            let (slot, sign) = self.slot(&token);
            vector[slot] += sign;
        }
        math::l2_normalize(&mut vector);
        vector
    }

    /// Map a token to (index, sign)
    fn slot(&self, token: &str) -> (usize, f32) {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.namespace.as_bytes());
        hasher.update(b"::");
        hasher.update(token.as_bytes());
        let digest = hasher.finalize();
        let bytes = digest.as_bytes();

        let index = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize
            % self.dimension;
        let sign = if bytes[4] & 1 == 0 { 1.0 } else { -1.0 };
        (index, sign)
    }
}

impl EmbeddingProvider for HashingEmbedder {
    fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.embed(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn fingerprint(&self) -> String {
        format!(
            "hash-v{}:{}:{}",
            HASHING_VERSION, self.namespace, self.dimension
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn norm(v: &[f32]) -> f32 {
        v.iter().map(|x| x * x).sum::<f32>().sqrt()
    }

    #[test]
    fn test_embedding_deterministic() {
        let embedder = HashingEmbedder::with_defaults().unwrap();
        let a = embedder.embed_one("JWT token validation middleware").unwrap();
        let b = embedder.embed_one("JWT token validation middleware").unwrap();

        assert_eq!(a, b);
        assert_eq!(a.len(), DEFAULT_DIMENSION);
        assert!((embedder.cosine(&a, &b) - 1.0).abs() < 1e-5);
        assert!((norm(&a) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_embedding_case_insensitive() {
        let embedder = HashingEmbedder::with_defaults().unwrap();
        assert_eq!(embedder.embed("JWT Validation"), embedder.embed("jwt validation"));
    }

    #[test]
    fn test_empty_text_is_zero_vector() {
        let embedder = HashingEmbedder::with_defaults().unwrap();
        let v = embedder.embed("  ...  ");
        assert_eq!(v.len(), DEFAULT_DIMENSION);
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn test_namespace_changes_space() {
        let a = HashingEmbedder::new("ns_a", 64).unwrap();
        let b = HashingEmbedder::new("ns_b", 64).unwrap();

        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint(), "hash-v1:ns_a:64");
    }

    #[test]
    fn test_shared_tokens_are_similar() {
        let embedder = HashingEmbedder::with_defaults().unwrap();
        let query = embedder.embed("JWT validation");
        let related = embedder.embed("JWT token validation middleware");
        let repeated = embedder.embed("validation JWT");

        assert!(embedder.cosine(&query, &related) > 0.4);
        assert!((embedder.cosine(&query, &repeated) - 1.0).abs() < 1e-5);
    }

    /// Declares one dimension and emits another
    struct Misreporting {
        declared: usize,
        drop_last: bool,
    }

    impl EmbeddingProvider for Misreporting {
        fn embed_one(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            Ok(vec![1.0, 0.0, 0.0])
        }

        fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            let n = if self.drop_last { texts.len() - 1 } else { texts.len() };
            Ok(vec![vec![1.0, 0.0, 0.0]; n])
        }

        fn dimension(&self) -> usize {
            self.declared
        }

        fn fingerprint(&self) -> String {
            "misreporting".to_string()
        }
    }

    #[test]
    fn test_checked_embedding_catches_bad_output() {
        let texts = vec!["a".to_string(), "b".to_string()];

        let wrong_dim = Misreporting { declared: 4, drop_last: false };
        assert!(matches!(
            wrong_dim.embed_checked("a"),
            Err(EmbeddingError::DimensionMismatch { expected: 4, actual: 3 })
        ));
        assert!(matches!(
            wrong_dim.embed_batch_checked(&texts),
            Err(EmbeddingError::DimensionMismatch { .. })
        ));

        let short = Misreporting { declared: 3, drop_last: true };
        assert!(matches!(
            short.embed_batch_checked(&texts),
            Err(EmbeddingError::GenerationError(_))
        ));

        let honest = Misreporting { declared: 3, drop_last: false };
        assert_eq!(honest.embed_batch_checked(&texts).unwrap().len(), 2);
    }

    #[test]
    fn test_zero_dimension_rejected() {
        assert!(HashingEmbedder::new("ns", 0).is_err());
    }
}
