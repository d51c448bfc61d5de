//! Embedder trait: text in, fixed-length float vector out.
//!
//! Implementations wrap an embedding provider; tests use a deterministic
//! keyword hasher so similarity is reproducible without a model.

use async_trait::async_trait;
use thiserror::Error;

/// Error from embedding or vector-index operations.
#[derive(Debug, Error)]
pub enum EmbedderError {
    #[error("embedding failed: {0}")]
    Embedding(String),
    #[error("index failed: {0}")]
    Index(String),
}

/// Produces one fixed-size vector per input text, in order.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError>;

    /// Dimension of vectors returned by [`Embedder::embed`].
    fn dimension(&self) -> usize;
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Deterministic bag-of-words hash embedder for tests: identical texts
    /// embed identically, disjoint texts are near-orthogonal.
    pub struct KeywordEmbedder {
        dim: usize,
    }

    impl KeywordEmbedder {
        pub fn new() -> Self {
            Self { dim: 64 }
        }
    }

    #[async_trait]
    impl Embedder for KeywordEmbedder {
        async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
            Ok(texts
                .iter()
                .map(|text| {
                    let mut v = vec![0.0f32; self.dim];
                    for word in text.split_whitespace() {
                        let mut h: u64 = 1469598103934665603;
                        for b in word.as_bytes() {
                            h ^= *b as u64;
                            h = h.wrapping_mul(1099511628211);
                        }
                        v[(h % self.dim as u64) as usize] += 1.0;
                    }
                    v
                })
                .collect())
        }

        fn dimension(&self) -> usize {
            self.dim
        }
    }

    /// **Scenario**: identical texts embed identically; embedding order
    /// matches input order.
    #[tokio::test]
    async fn keyword_embedder_is_deterministic() {
        let e = KeywordEmbedder::new();
        let a = e.embed(&["hello world", "other text"]).await.unwrap();
        let b = e.embed(&["hello world"]).await.unwrap();
        assert_eq!(a[0], b[0]);
        assert_ne!(a[0], a[1]);
        assert_eq!(a[0].len(), e.dimension());
    }
}
