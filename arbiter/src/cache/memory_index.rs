//! In-memory vector index with cosine distance. Not persistent.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use crate::cache::embedder::EmbedderError;
use crate::cache::{VectorHit, VectorIndex};

#[derive(Clone)]
struct Entry {
    document: String,
    vector: Vec<f32>,
    metadata: Value,
}

/// Vector index over a concurrent map; suitable for single-process caches
/// and tests.
#[derive(Default)]
pub struct InMemoryVectorIndex {
    entries: DashMap<String, Entry>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cosine similarity; zero-magnitude vectors compare as 0.
    fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
        let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
        let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm_a == 0.0 || norm_b == 0.0 {
            0.0
        } else {
            dot / (norm_a * norm_b)
        }
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn query(&self, embedding: &[f32], k: usize) -> Result<Vec<VectorHit>, EmbedderError> {
        let mut hits: Vec<VectorHit> = self
            .entries
            .iter()
            .map(|entry| {
                let similarity = Self::cosine_similarity(embedding, &entry.vector);
                VectorHit {
                    id: entry.key().clone(),
                    document: entry.document.clone(),
                    metadata: entry.metadata.clone(),
                    distance: 1.0 - similarity,
                }
            })
            .collect();
        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(k);
        Ok(hits)
    }

    async fn add(
        &self,
        id: &str,
        document: &str,
        embedding: &[f32],
        metadata: Value,
    ) -> Result<(), EmbedderError> {
        self.entries.insert(
            id.to_string(),
            Entry {
                document: document.to_string(),
                vector: embedding.to_vec(),
                metadata,
            },
        );
        Ok(())
    }

    async fn count(&self) -> usize {
        self.entries.len()
    }

    async fn clear(&self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// **Scenario**: the nearest neighbor comes back first with the smallest
    /// distance; k truncates.
    #[tokio::test]
    async fn query_orders_by_distance() {
        let index = InMemoryVectorIndex::new();
        index
            .add("a", "doc a", &[1.0, 0.0], json!({}))
            .await
            .unwrap();
        index
            .add("b", "doc b", &[0.0, 1.0], json!({}))
            .await
            .unwrap();

        let hits = index.query(&[1.0, 0.1], 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a");
        assert!(hits[0].distance < 0.1);
    }

    /// **Scenario**: add with an existing id replaces (idempotent put).
    #[tokio::test]
    async fn add_same_id_replaces() {
        let index = InMemoryVectorIndex::new();
        index.add("x", "v1", &[1.0], json!({})).await.unwrap();
        index.add("x", "v2", &[1.0], json!({})).await.unwrap();
        assert_eq!(index.count().await, 1);
        let hits = index.query(&[1.0], 1).await.unwrap();
        assert_eq!(hits[0].document, "v2");
    }
}
