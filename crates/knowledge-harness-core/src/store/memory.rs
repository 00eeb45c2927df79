//! In-memory [`VectorStore`] implementation for tests and the `memory`
//! storage backend.
//!
//! Collections are `Vec<Record>` in insertion order behind one
//! `parking_lot::RwLock`. Queries are brute-force cosine distance over the
//! whole collection.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use crate::error::Result;
use crate::models::SearchHit;

use super::{rank_by_distance, validate_batch, CollectionInfo, Record, VectorStore};

#[derive(Default)]
struct Collection {
    dims: Option<usize>,
    records: Vec<Record>,
}

/// In-memory vector store.
#[derive(Default)]
pub struct InMemoryVectorStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn add(&self, collection: &str, records: Vec<Record>) -> Result<()> {
        let mut guard = self.collections.write();
        let existing_dims = guard.get(collection).and_then(|c| c.dims);
        let dims = validate_batch(collection, &records, existing_dims)?;
        if records.is_empty() {
            return Ok(());
        }

        let coll = guard.entry(collection.to_string()).or_default();
        coll.dims = Some(dims);
        for record in records {
            match coll.records.iter_mut().find(|r| r.id == record.id) {
                Some(slot) => *slot = record,
                None => coll.records.push(record),
            }
        }
        Ok(())
    }

    async fn get_by_id(&self, collection: &str, id: &str) -> Result<Option<Record>> {
        let guard = self.collections.read();
        Ok(guard
            .get(collection)
            .and_then(|c| c.records.iter().find(|r| r.id == id))
            .cloned())
    }

    async fn find_by_metadata(
        &self,
        collection: &str,
        key: &str,
        value: &Value,
    ) -> Result<Vec<Record>> {
        let guard = self.collections.read();
        Ok(guard
            .get(collection)
            .map(|c| {
                c.records
                    .iter()
                    .filter(|r| r.metadata.get(key) == Some(value))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn query(
        &self,
        collection: &str,
        embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let guard = self.collections.read();
        match guard.get(collection) {
            Some(c) => rank_by_distance(embedding, &c.records, limit),
            None => Ok(Vec::new()),
        }
    }

    async fn list(&self, collection: &str) -> Result<Vec<Record>> {
        let guard = self.collections.read();
        Ok(guard
            .get(collection)
            .map(|c| c.records.clone())
            .unwrap_or_default())
    }

    async fn delete(&self, collection: &str, ids: &[String]) -> Result<usize> {
        let mut guard = self.collections.write();
        let Some(coll) = guard.get_mut(collection) else {
            return Ok(0);
        };
        let before = coll.records.len();
        coll.records.retain(|r| !ids.contains(&r.id));
        let removed = before - coll.records.len();
        if coll.records.is_empty() {
            coll.dims = None;
        }
        Ok(removed)
    }

    async fn collections(&self) -> Result<Vec<CollectionInfo>> {
        let guard = self.collections.read();
        let mut infos: Vec<CollectionInfo> = guard
            .iter()
            .map(|(name, c)| CollectionInfo {
                name: name.clone(),
                records: c.records.len(),
                dims: c.dims,
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(infos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::models::Metadata;

    fn rec(id: &str, v: Vec<f32>, content_id: &str) -> Record {
        let mut metadata = Metadata::new();
        metadata.insert("content_id".into(), content_id.into());
        Record {
            id: id.into(),
            document: format!("text of {}", id),
            embedding: v,
            metadata,
        }
    }

    #[tokio::test]
    async fn test_add_and_get() {
        let store = InMemoryVectorStore::new();
        store
            .add("article", vec![rec("c_0", vec![1.0, 0.0], "c")])
            .await
            .unwrap();
        let got = store.get_by_id("article", "c_0").await.unwrap().unwrap();
        assert_eq!(got.document, "text of c_0");
        assert!(store.get_by_id("article", "nope").await.unwrap().is_none());
        assert!(store.get_by_id("youtube", "c_0").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_add_replaces_same_id() {
        let store = InMemoryVectorStore::new();
        store.add("a", vec![rec("x", vec![1.0], "c")]).await.unwrap();
        let mut updated = rec("x", vec![2.0], "c");
        updated.document = "new".into();
        store.add("a", vec![updated]).await.unwrap();
        let all = store.list("a").await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].document, "new");
    }

    #[tokio::test]
    async fn test_dimension_mismatch_writes_nothing() {
        let store = InMemoryVectorStore::new();
        store
            .add("a", vec![rec("x_0", vec![1.0, 0.0], "x")])
            .await
            .unwrap();

        let err = store
            .add(
                "a",
                vec![
                    rec("y_0", vec![1.0, 0.0], "y"),
                    rec("y_1", vec![1.0, 0.0, 0.0], "y"),
                ],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
        assert!(store.get_by_id("a", "y_0").await.unwrap().is_none());
        assert_eq!(store.list("a").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_query_unknown_collection_is_empty() {
        let store = InMemoryVectorStore::new();
        assert!(store.query("missing", &[1.0], 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_find_by_metadata_and_delete() {
        let store = InMemoryVectorStore::new();
        store
            .add(
                "a",
                vec![
                    rec("c_0", vec![1.0, 0.0], "c"),
                    rec("c_1", vec![0.0, 1.0], "c"),
                    rec("d_0", vec![1.0, 1.0], "d"),
                ],
            )
            .await
            .unwrap();

        let found = store
            .find_by_metadata("a", "content_id", &Value::from("c"))
            .await
            .unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].id, "c_0");

        let removed = store
            .delete("a", &["c_0".to_string(), "c_1".to_string(), "zz".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 2);

        let infos = store.collections().await.unwrap();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].records, 1);
        assert_eq!(infos[0].dims, Some(2));
    }
}
