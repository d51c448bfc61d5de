//! Semantic response cache: embedding similarity short-circuit for
//! cacheable requests.
//!
//! "Don't think twice about the same question." A lookup embeds the query,
//! asks the vector index for the single nearest neighbor, and returns the
//! stored response iff cosine similarity clears the threshold (default
//! 0.95). Dynamic requests — code, debugging, file paths, CLI commands —
//! bypass the cache entirely; [`SemanticCache::is_cacheable`] is the single
//! source of truth consulted by both `get` and `put`.
//!
//! Cache failures are warnings, never errors: a broken cache degrades to a
//! miss and the request proceeds.

mod embedder;
mod memory_index;
mod openai_embedder;

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;
use tracing::{debug, info, warn};

pub use embedder::{Embedder, EmbedderError};
pub use memory_index::InMemoryVectorIndex;
pub use openai_embedder::OpenAIEmbedder;

/// Default cosine similarity required for a hit.
pub const DEFAULT_THRESHOLD: f32 = 0.95;

/// Requests matching any of these never touch the cache (read or write):
/// code and debugging work, file mentions, escalation transcripts, CLI
/// commands.
static NON_CACHEABLE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)(코드|code|구현|implement|작성|write|debug|디버깅|fix|수정)",
        r"(?i)(파일|file|프로젝트|project).*\.(py|rs|ts|js|yaml|json|md)",
        r"\[ESCALATE\]",
        r"(?i)(리팩토링|refactor)",
        r"^/",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("cache gate pattern"))
    .collect()
});

/// One nearest-neighbor hit from the vector index.
#[derive(Clone, Debug)]
pub struct VectorHit {
    pub id: String,
    pub document: String,
    pub metadata: serde_json::Value,
    /// Cosine distance: 0 identical, 2 opposite.
    pub distance: f32,
}

/// Opaque similarity store in cosine space.
#[async_trait::async_trait]
pub trait VectorIndex: Send + Sync {
    async fn query(&self, embedding: &[f32], k: usize) -> Result<Vec<VectorHit>, EmbedderError>;

    async fn add(
        &self,
        id: &str,
        document: &str,
        embedding: &[f32],
        metadata: serde_json::Value,
    ) -> Result<(), EmbedderError>;

    async fn count(&self) -> usize;

    async fn clear(&self);
}

/// Embedding-backed response cache.
pub struct SemanticCache {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    threshold: f32,
    enabled: bool,
}

impl SemanticCache {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>) -> Self {
        Self {
            embedder,
            index,
            threshold: DEFAULT_THRESHOLD,
            enabled: true,
        }
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    /// A disabled cache misses every read and drops every write.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Deterministic gate: false for dynamic requests that must never be
    /// served from or written to the cache.
    pub fn is_cacheable(&self, query: &str) -> bool {
        !NON_CACHEABLE_PATTERNS.iter().any(|re| re.is_match(query))
    }

    /// Looks up a similar past query. `None` on miss, gate bypass, disabled
    /// cache, or any embedding/index failure.
    pub async fn get(&self, query: &str) -> Option<String> {
        if !self.enabled {
            return None;
        }
        if !self.is_cacheable(query) {
            debug!("cache bypass: dynamic request");
            return None;
        }

        let embedding = match self.embedder.embed(&[query]).await {
            Ok(mut vectors) if !vectors.is_empty() => vectors.remove(0),
            Ok(_) => return None,
            Err(e) => {
                warn!(error = %e, "cache lookup embed failed");
                return None;
            }
        };

        let hits = match self.index.query(&embedding, 1).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!(error = %e, "cache index query failed");
                return None;
            }
        };
        let hit = hits.into_iter().next()?;
        let similarity = 1.0 - hit.distance;
        if similarity >= self.threshold {
            info!(similarity, threshold = self.threshold, "cache hit");
            Some(hit.document)
        } else {
            debug!(similarity, threshold = self.threshold, "cache miss");
            None
        }
    }

    /// Stores a query/response pair. Best-effort: failures are logged and
    /// swallowed.
    pub async fn put(&self, query: &str, response: &str) {
        if !self.enabled || !self.is_cacheable(query) {
            return;
        }
        let embedding = match self.embedder.embed(&[query]).await {
            Ok(mut vectors) if !vectors.is_empty() => vectors.remove(0),
            Ok(_) => return,
            Err(e) => {
                warn!(error = %e, "cache store embed failed");
                return;
            }
        };
        let id = uuid::Uuid::new_v4().to_string();
        let query_excerpt: String = query.chars().take(500).collect();
        if let Err(e) = self
            .index
            .add(&id, response, &embedding, json!({ "query": query_excerpt }))
            .await
        {
            warn!(error = %e, "cache store failed");
        }
    }

    /// Number of cached entries.
    pub async fn len(&self) -> usize {
        self.index.count().await
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drops every cached entry.
    pub async fn clear(&self) {
        self.index.clear().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::embedder::tests::KeywordEmbedder;

    fn cache() -> SemanticCache {
        let embedder = Arc::new(KeywordEmbedder::new());
        let index = Arc::new(InMemoryVectorIndex::new());
        SemanticCache::new(embedder, index)
    }

    /// **Scenario**: the gate is deterministic and rejects dynamic requests,
    /// including the Korean forms, CLI commands, and file mentions.
    #[test]
    fn gate_rejects_dynamic_requests() {
        let cache = cache();
        for query in [
            "implement a parser for me",
            "코드 좀 고쳐줘",
            "debug this stack trace",
            "check the file main.py please",
            "/stats",
            "prior run said [ESCALATE] and stopped",
        ] {
            assert!(!cache.is_cacheable(query), "should bypass: {}", query);
            assert_eq!(cache.is_cacheable(query), cache.is_cacheable(query));
        }
        assert!(cache.is_cacheable("영업 시간이 언제야?"));
        assert!(cache.is_cacheable("what are your opening hours?"));
    }

    /// **Scenario**: put then get of the same query hits; an unrelated query
    /// misses.
    #[tokio::test]
    async fn put_get_roundtrip() {
        let cache = cache();
        cache.put("what are the opening hours", "9am to 6pm").await;
        assert_eq!(cache.len().await, 1);

        let hit = cache.get("what are the opening hours").await;
        assert_eq!(hit.as_deref(), Some("9am to 6pm"));

        assert!(cache.get("weather forecast tomorrow maybe").await.is_none());
    }

    /// **Scenario**: dynamic queries are neither stored nor served.
    #[tokio::test]
    async fn gate_applies_to_both_get_and_put() {
        let cache = cache();
        cache.put("implement quicksort", "code...").await;
        assert_eq!(cache.len().await, 0);
        assert!(cache.get("implement quicksort").await.is_none());
    }

    /// **Scenario**: a disabled cache misses every read and drops writes.
    #[tokio::test]
    async fn disabled_cache_always_misses() {
        let cache = cache().disabled();
        cache.put("greeting text", "hello").await;
        assert!(cache.get("greeting text").await.is_none());
        assert_eq!(cache.len().await, 0);
    }

    /// **Scenario**: clear empties the index.
    #[tokio::test]
    async fn clear_empties() {
        let cache = cache();
        cache.put("question one here", "a").await;
        cache.clear().await;
        assert!(cache.is_empty().await);
    }
}
