//! Vector storage abstraction for Knowledge Harness.
//!
//! The [`VectorStore`] trait defines the operations the pipelines and the
//! search aggregator need from a storage engine: atomic batch writes into a
//! named collection, point lookups, metadata lookups, and nearest-neighbour
//! queries by cosine distance.
//!
//! Two backends exist: [`memory::InMemoryVectorStore`] here, and the SQLite
//! store in the app crate. Both share the batch validation and ranking
//! helpers below so their behaviour cannot drift apart.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use std::cmp::Ordering;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::embedding::cosine_distance;
use crate::error::{Error, Result};
use crate::models::{Metadata, SearchHit};

/// A stored record: one chunk of content, or one tutorial.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub id: String,
    pub document: String,
    pub embedding: Vec<f32>,
    pub metadata: Metadata,
}

/// Summary of one collection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionInfo {
    pub name: String,
    pub records: usize,
    /// Dimensionality of the stored vectors; `None` for an empty collection.
    pub dims: Option<usize>,
}

/// Abstract vector storage backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`add`](VectorStore::add) | Atomically write a batch of records |
/// | [`get_by_id`](VectorStore::get_by_id) | Fetch one record by id |
/// | [`find_by_metadata`](VectorStore::find_by_metadata) | Records whose metadata key equals a value |
/// | [`query`](VectorStore::query) | Nearest neighbours by cosine distance |
/// | [`list`](VectorStore::list) | Every record of a collection |
/// | [`delete`](VectorStore::delete) | Remove records by id |
/// | [`collections`](VectorStore::collections) | Per-collection counts |
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Write `records` into `collection`, creating the collection on first
    /// use. Records whose id already exists are replaced.
    ///
    /// The batch is all-or-nothing: if any record is invalid (empty vector,
    /// mixed dimensions, dimension disagreeing with the collection,
    /// duplicate id) nothing is written and a `Storage` error is returned.
    async fn add(&self, collection: &str, records: Vec<Record>) -> Result<()>;

    async fn get_by_id(&self, collection: &str, id: &str) -> Result<Option<Record>>;

    /// Records whose metadata `key` equals `value`, in insertion order.
    async fn find_by_metadata(&self, collection: &str, key: &str, value: &Value)
        -> Result<Vec<Record>>;

    /// The `limit` records closest to `embedding`, ascending by distance.
    /// An unknown collection yields an empty list.
    async fn query(&self, collection: &str, embedding: &[f32], limit: usize)
        -> Result<Vec<SearchHit>>;

    async fn list(&self, collection: &str) -> Result<Vec<Record>>;

    /// Delete the given ids; returns how many existed.
    async fn delete(&self, collection: &str, ids: &[String]) -> Result<usize>;

    async fn collections(&self) -> Result<Vec<CollectionInfo>>;
}

/// `chunk_index` metadata of a record, `0` when absent.
pub fn chunk_index(record: &Record) -> u64 {
    record
        .metadata
        .get("chunk_index")
        .and_then(Value::as_u64)
        .unwrap_or(0)
}

/// Every record of one content item, in chunk order.
///
/// Looks up records whose metadata `content_id` matches first. When there
/// are none, `content_id` is tried as a record id so callers may pass the
/// id of a single chunk or tutorial. Yields an empty list when neither
/// matches.
pub async fn content_records(
    store: &dyn VectorStore,
    collection: &str,
    content_id: &str,
) -> Result<Vec<Record>> {
    let mut records = store
        .find_by_metadata(collection, "content_id", &Value::from(content_id))
        .await?;
    if records.is_empty() {
        return Ok(store
            .get_by_id(collection, content_id)
            .await?
            .into_iter()
            .collect());
    }
    records.sort_by_key(chunk_index);
    Ok(records)
}

/// Check a batch before writing it. Returns the batch's dimensionality.
///
/// `existing_dims` is the dimensionality already fixed for the collection,
/// if it holds any records.
pub fn validate_batch(
    collection: &str,
    records: &[Record],
    existing_dims: Option<usize>,
) -> Result<usize> {
    if collection.trim().is_empty() {
        return Err(Error::storage("collection name must not be empty"));
    }

    let Some(first) = records.first() else {
        return Ok(existing_dims.unwrap_or(0));
    };
    let dims = first.embedding.len();
    if dims == 0 {
        return Err(Error::storage(format!(
            "record '{}' has an empty embedding",
            first.id
        )));
    }
    if let Some(existing) = existing_dims {
        if existing != dims {
            return Err(Error::storage(format!(
                "collection '{}' holds {}-dimensional vectors, got {}",
                collection, existing, dims
            )));
        }
    }

    let mut seen = std::collections::HashSet::with_capacity(records.len());
    for r in records {
        if r.id.is_empty() {
            return Err(Error::storage("record id must not be empty"));
        }
        if r.embedding.len() != dims {
            return Err(Error::storage(format!(
                "record '{}' has {} dimensions, batch has {}",
                r.id,
                r.embedding.len(),
                dims
            )));
        }
        if !seen.insert(r.id.as_str()) {
            return Err(Error::storage(format!("duplicate record id '{}'", r.id)));
        }
    }

    Ok(dims)
}

/// Brute-force nearest-neighbour ranking over `records`.
///
/// Ties are broken by id so equal-distance results come back in a stable
/// order.
pub fn rank_by_distance<'a, I>(query: &[f32], records: I, limit: usize) -> Result<Vec<SearchHit>>
where
    I: IntoIterator<Item = &'a Record>,
{
    if limit == 0 {
        return Ok(Vec::new());
    }

    let mut hits = Vec::new();
    for r in records {
        if r.embedding.len() != query.len() {
            return Err(Error::storage(format!(
                "query has {} dimensions, record '{}' has {}",
                query.len(),
                r.id,
                r.embedding.len()
            )));
        }
        hits.push(SearchHit {
            id: r.id.clone(),
            text: r.document.clone(),
            metadata: r.metadata.clone(),
            distance: cosine_distance(query, &r.embedding),
        });
    }

    hits.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    hits.truncate(limit);
    Ok(hits)
}
