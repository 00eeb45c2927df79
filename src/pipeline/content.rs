//! Content processing pipeline.
//!
//! Turns a source URL into stored, embedded chunks:
//!
//! 1. Fetch the source through the [`Fetcher`].
//! 2. Normalize the extracted text; empty text is a parse error.
//! 3. Cut it into overlapping chunks with the configured [`ChunkingPolicy`].
//! 4. Embed the chunks in batches, preserving order.
//! 5. Write all chunks in a single atomic [`VectorStore::add`] with ids
//!    `{content_id}_{i}`.
//!
//! Any failure aborts the run before the write, so a failed run leaves no
//! records behind.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;

use knowledge_harness_core::chunk::{chunk_text, content_hash, normalize_text, ChunkingPolicy};
use knowledge_harness_core::embedding::{embed_all, EmbeddingProvider};
use knowledge_harness_core::fetch::Fetcher;
use knowledge_harness_core::models::{ContentMetadata, ContentType, ProcessedContent};
use knowledge_harness_core::store::{Record, VectorStore};
use knowledge_harness_core::{Error, Result};

/// Default author when the source names none.
pub const UNKNOWN_AUTHOR: &str = "Unknown";

#[derive(Clone)]
pub struct ContentPipeline {
    fetcher: Arc<dyn Fetcher>,
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    policy: ChunkingPolicy,
    batch_size: usize,
}

impl ContentPipeline {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        policy: ChunkingPolicy,
        batch_size: usize,
    ) -> Self {
        Self {
            fetcher,
            embedder,
            store,
            policy,
            batch_size: batch_size.max(1),
        }
    }

    /// Process `url` end to end and return what was stored.
    pub async fn run(&self, url: &str, content_type: ContentType) -> Result<ProcessedContent> {
        let content_id = Uuid::new_v4().to_string();
        let span = info_span!(
            "content_pipeline",
            content_id = %content_id,
            collection = content_type.collection()
        );
        self.run_inner(content_id, url, content_type)
            .instrument(span)
            .await
    }

    async fn run_inner(
        &self,
        content_id: String,
        url: &str,
        content_type: ContentType,
    ) -> Result<ProcessedContent> {
        debug!(url, "fetching");
        let fetched = self.fetcher.fetch(url, content_type).await?;

        let text = normalize_text(&fetched.text);
        if text.is_empty() {
            return Err(Error::parse(format!("no extractable text at {}", url)));
        }

        let chunks = chunk_text(&text, &self.policy);
        if chunks.is_empty() {
            return Err(Error::parse(format!("no extractable text at {}", url)));
        }
        debug!(chunks = chunks.len(), chars = text.chars().count(), "chunked");

        let embeddings = embed_all(self.embedder.as_ref(), &chunks, self.batch_size).await?;
        debug!(model = self.embedder.model_name(), "embedded");

        let source = fetched.metadata;
        let metadata = ContentMetadata {
            content_id: content_id.clone(),
            title: source.title.unwrap_or_default(),
            author: source
                .author
                .filter(|a| !a.trim().is_empty())
                .unwrap_or_else(|| UNKNOWN_AUTHOR.to_string()),
            source_url: url.to_string(),
            content_type,
            duration: source.duration,
            published_date: source.published_date,
            view_count: source.view_count,
            processed_date: Utc::now().to_rfc3339(),
            content_hash: content_hash(&text),
        };

        let records = build_records(&metadata, &chunks, embeddings);
        self.store
            .add(content_type.collection(), records)
            .await?;
        debug!("stored");

        Ok(ProcessedContent {
            content_id,
            metadata,
            chunks,
        })
    }
}

/// One record per chunk, each carrying the shared metadata plus its
/// position.
fn build_records(
    metadata: &ContentMetadata,
    chunks: &[String],
    embeddings: Vec<Vec<f32>>,
) -> Vec<Record> {
    let base = metadata.to_metadata();
    let count = chunks.len();
    chunks
        .iter()
        .zip(embeddings)
        .enumerate()
        .map(|(i, (chunk, embedding))| {
            let mut meta = base.clone();
            meta.insert("chunk_index".into(), i.into());
            meta.insert("chunk_count".into(), count.into());
            Record {
                id: format!("{}_{}", metadata.content_id, i),
                document: chunk.clone(),
                embedding,
                metadata: meta,
            }
        })
        .collect()
}
