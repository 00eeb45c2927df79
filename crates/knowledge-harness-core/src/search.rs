//! Semantic search over one or more collections.
//!
//! [`SemanticSearch`] embeds a query once through an
//! [`EmbeddingProvider`] and asks a [`VectorStore`] for nearest neighbours.
//! It holds no state of its own beyond the two collaborators.
//!
//! # Operations
//!
//! - [`search_single`](SemanticSearch::search_single): top `limit` hits in
//!   one collection.
//! - [`search_multi`](SemanticSearch::search_multi): top
//!   `limit_per_collection` hits in each requested collection, computed
//!   independently, so a sparse collection never borrows slots from
//!   another.
//! - [`find_similar`](SemanticSearch::find_similar): neighbours of a stored
//!   record, excluding the record itself.
//!
//! Results are ordered by ascending cosine distance.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde_json::Value;

use crate::embedding::{embed_one, EmbeddingProvider};
use crate::error::{Error, Result};
use crate::models::SearchHit;
use crate::store::{chunk_index, Record, VectorStore};

/// Upper bound on `limit` when none is configured.
pub const DEFAULT_MAX_LIMIT: usize = 100;

/// Query-time search aggregator.
#[derive(Clone)]
pub struct SemanticSearch {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    max_limit: usize,
}

impl SemanticSearch {
    pub fn new(store: Arc<dyn VectorStore>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            store,
            embedder,
            max_limit: DEFAULT_MAX_LIMIT,
        }
    }

    pub fn with_max_limit(mut self, max_limit: usize) -> Self {
        self.max_limit = max_limit.max(1);
        self
    }

    pub fn max_limit(&self) -> usize {
        self.max_limit
    }

    fn check_limit(&self, limit: usize) -> Result<()> {
        if limit == 0 || limit > self.max_limit {
            return Err(Error::validation(format!(
                "limit must be between 1 and {}, got {}",
                self.max_limit, limit
            )));
        }
        Ok(())
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        if query.trim().is_empty() {
            return Err(Error::validation("query must not be empty"));
        }
        embed_one(self.embedder.as_ref(), query).await
    }

    /// Top `limit` hits for `query` in `collection`.
    pub async fn search_single(
        &self,
        query: &str,
        collection: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        self.check_limit(limit)?;
        let vector = self.embed_query(query).await?;
        self.store.query(collection, &vector, limit).await
    }

    /// Top `limit_per_collection` hits in each of `collections`.
    ///
    /// The query is embedded once. The result has one entry per distinct
    /// requested collection, even when that collection yields nothing.
    pub async fn search_multi(
        &self,
        query: &str,
        collections: &[String],
        limit_per_collection: usize,
    ) -> Result<BTreeMap<String, Vec<SearchHit>>> {
        self.check_limit(limit_per_collection)?;
        if collections.is_empty() {
            return Err(Error::validation("at least one collection is required"));
        }
        if collections.iter().any(|c| c.trim().is_empty()) {
            return Err(Error::validation("collection names must not be empty"));
        }

        let vector = self.embed_query(query).await?;
        let mut out = BTreeMap::new();
        for name in collections {
            if out.contains_key(name) {
                continue;
            }
            let hits = self
                .store
                .query(name, &vector, limit_per_collection)
                .await?;
            out.insert(name.clone(), hits);
        }
        Ok(out)
    }

    /// Records most similar to the record `id` in `collection`.
    ///
    /// `id` is a record id. A content id is also accepted, in which case
    /// its first chunk is the anchor and every chunk of that content is
    /// excluded. The anchor is never part of the result.
    ///
    /// The anchor's stored text is re-embedded with the current provider,
    /// so vectors written by an earlier model do not skew the neighbours.
    pub async fn find_similar(
        &self,
        id: &str,
        collection: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        self.check_limit(limit)?;

        let (anchor, exclude) = self.resolve_anchor(id, collection).await?;
        let vector = embed_one(self.embedder.as_ref(), &anchor.document).await?;
        let hits = self
            .store
            .query(collection, &vector, limit + exclude.len())
            .await?;

        Ok(hits
            .into_iter()
            .filter(|h| !exclude.contains(&h.id))
            .take(limit)
            .collect())
    }

    async fn resolve_anchor(&self, id: &str, collection: &str) -> Result<(Record, HashSet<String>)> {
        if let Some(record) = self.store.get_by_id(collection, id).await? {
            let exclude = HashSet::from([record.id.clone()]);
            return Ok((record, exclude));
        }

        let mut siblings = self
            .store
            .find_by_metadata(collection, "content_id", &Value::from(id))
            .await?;
        siblings.sort_by_key(chunk_index);
        let exclude: HashSet<String> = siblings.iter().map(|r| r.id.clone()).collect();
        match siblings.into_iter().next() {
            Some(anchor) => Ok((anchor, exclude)),
            None => Err(Error::not_found("record", id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Metadata;
    use crate::store::memory::InMemoryVectorStore;
    use async_trait::async_trait;

    /// Embeds by counting a few marker letters, so similarity is
    /// predictable.
    struct LetterEmbedder;

    #[async_trait]
    impl EmbeddingProvider for LetterEmbedder {
        fn model_name(&self) -> &str {
            "letters"
        }
        fn dims(&self) -> usize {
            3
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    let count = |c: char| t.chars().filter(|&x| x == c).count() as f32 + 0.01;
                    vec![count('a'), count('b'), count('c')]
                })
                .collect())
        }
    }

    async fn put(store: &InMemoryVectorStore, collection: &str, id: &str, text: &str, cid: &str) {
        let embedding = LetterEmbedder
            .embed(&[text.to_string()])
            .await
            .unwrap()
            .remove(0);
        let mut metadata = Metadata::new();
        metadata.insert("content_id".into(), cid.into());
        store
            .add(
                collection,
                vec![Record {
                    id: id.into(),
                    document: text.into(),
                    embedding,
                    metadata,
                }],
            )
            .await
            .unwrap();
    }

    async fn fixture() -> SemanticSearch {
        let store = Arc::new(InMemoryVectorStore::new());
        put(&store, "a", "a1_0", "aaaa", "a1").await;
        put(&store, "a", "a2_0", "aaab", "a2").await;
        put(&store, "a", "a3_0", "bbbb", "a3").await;
        put(&store, "a", "a4_0", "cccc", "a4").await;
        put(&store, "b", "b1_0", "aaaa", "b1").await;
        SemanticSearch::new(store, Arc::new(LetterEmbedder)).with_max_limit(10)
    }

    #[tokio::test]
    async fn test_search_single_orders_by_distance() {
        let search = fixture().await;
        let hits = search.search_single("aaaa", "a", 3).await.unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].id, "a1_0");
        assert_eq!(hits[1].id, "a2_0");
        assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
    }

    #[tokio::test]
    async fn test_search_single_validation() {
        let search = fixture().await;
        assert!(matches!(
            search.search_single("  ", "a", 3).await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            search.search_single("a", "a", 0).await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            search.search_single("a", "a", 11).await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_search_unknown_collection_is_empty() {
        let search = fixture().await;
        assert!(search.search_single("a", "zzz", 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_multi_lists_are_independent() {
        let search = fixture().await;
        let collections = vec!["a".to_string(), "b".to_string(), "a".to_string()];
        let out = search.search_multi("aaaa", &collections, 3).await.unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out["a"].len(), 3);
        assert_eq!(out["b"].len(), 1);
    }

    #[tokio::test]
    async fn test_find_similar_excludes_anchor() {
        let search = fixture().await;
        let hits = search.find_similar("a1_0", "a", 5).await.unwrap();
        assert_eq!(hits.len(), 3);
        assert!(hits.iter().all(|h| h.id != "a1_0"));
        assert_eq!(hits[0].id, "a2_0");

        let one = search.find_similar("a1_0", "a", 1).await.unwrap();
        assert_eq!(one.len(), 1);
    }

    #[tokio::test]
    async fn test_find_similar_by_content_id() {
        let search = fixture().await;
        let hits = search.find_similar("a2", "a", 5).await.unwrap();
        assert!(hits.iter().all(|h| h.id != "a2_0"));
        assert_eq!(hits[0].id, "a1_0");
    }

    #[tokio::test]
    async fn test_find_similar_embeds_anchor_text() {
        let search = fixture().await;
        let mut metadata = Metadata::new();
        metadata.insert("content_id".into(), "stale".into());
        search
            .store
            .add(
                "a",
                vec![Record {
                    id: "stale_0".into(),
                    document: "aaaa".into(),
                    embedding: vec![0.01, 0.01, 4.01],
                    metadata,
                }],
            )
            .await
            .unwrap();

        let hits = search.find_similar("stale_0", "a", 2).await.unwrap();
        assert_eq!(hits[0].id, "a1_0");
        assert_eq!(hits[1].id, "a2_0");
    }

    #[tokio::test]
    async fn test_find_similar_unknown_is_not_found() {
        let search = fixture().await;
        assert!(matches!(
            search.find_similar("nope", "a", 5).await,
            Err(Error::NotFound { .. })
        ));
    }
}
