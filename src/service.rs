//! Service facade.
//!
//! [`KnowledgeService`] owns the task registry, the worker pool, both
//! pipelines, the search aggregator, and the vector store. The HTTP server
//! and the CLI are thin adapters over it.
//!
//! Submissions return a [`TaskReceipt`] immediately; pipeline failures end
//! up on the task, never in the submitter's `Result`. Everything else is
//! synchronous request/response.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::info;

use knowledge_harness_core::embedding::EmbeddingProvider;
use knowledge_harness_core::fetch::Fetcher;
use knowledge_harness_core::generation::GenerativeModel;
use knowledge_harness_core::models::{
    ContentMetadata, ContentType, Metadata, ProcessedContent, SearchHit, TutorialArtifact,
    TUTORIAL_COLLECTION,
};
use knowledge_harness_core::search::SemanticSearch;
use knowledge_harness_core::store::memory::InMemoryVectorStore;
use knowledge_harness_core::store::{chunk_index, content_records, CollectionInfo, Record, VectorStore};
use knowledge_harness_core::tutorial::{
    artifact_from_record, validate_section_metadata, validate_section_types,
};
use knowledge_harness_core::{Error, Result};

use crate::config::{Config, SearchConfig, StorageBackend};
use crate::embedding::create_provider;
use crate::fetch::WebFetcher;
use crate::generation::create_generator;
use crate::pipeline::{ContentPipeline, TutorialPipeline};
use crate::sqlite_store::SqliteVectorStore;
use crate::tasks::{Task, TaskCounts, TaskKind, TaskRegistry, TaskResult, TaskStatus};
use crate::worker::WorkerPool;

/// Status reported by a submission receipt: the job was accepted.
pub const ACCEPTED_STATUS: &str = "processing";

/// Acknowledgement of an accepted submission.
#[derive(Debug, Clone, Serialize)]
pub struct TaskReceipt {
    pub task_id: String,
    pub status: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContentTaskStatus {
    pub task_id: String,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TutorialTaskStatus {
    pub task_id: String,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tutorial_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tutorial: Option<TutorialArtifact>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub valid_types: bool,
    pub valid_metadata: bool,
}

/// One stored content item (or tutorial) in a collection listing.
#[derive(Debug, Clone, Serialize)]
pub struct CollectionItem {
    pub id: String,
    pub records: usize,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Serialize)]
pub struct CollectionPage {
    pub collection: String,
    pub total: usize,
    pub offset: usize,
    pub items: Vec<CollectionItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub version: &'static str,
    pub tasks: TaskCounts,
    pub queued_jobs: usize,
    pub queue_capacity: usize,
    pub embedding_model: String,
    pub generation_model: String,
}

/// Concrete collaborators the service is assembled from.
pub struct Collaborators {
    pub fetcher: Arc<dyn Fetcher>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub generator: Arc<dyn GenerativeModel>,
    pub store: Arc<dyn VectorStore>,
}

pub struct KnowledgeService {
    registry: Arc<TaskRegistry>,
    pool: WorkerPool,
    content: ContentPipeline,
    tutorial: TutorialPipeline,
    search: SemanticSearch,
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    generator: Arc<dyn GenerativeModel>,
    search_config: SearchConfig,
}

impl KnowledgeService {
    /// Build the service and start its workers. Must be called inside a
    /// tokio runtime.
    pub fn new(config: &Config, parts: Collaborators) -> anyhow::Result<Self> {
        let Collaborators {
            fetcher,
            embedder,
            generator,
            store,
        } = parts;

        let registry = Arc::new(TaskRegistry::from_config(&config.tasks));
        let pool = WorkerPool::from_config(registry.clone(), &config.workers);

        let content = ContentPipeline::new(
            fetcher,
            embedder.clone(),
            store.clone(),
            config.chunking.policy()?,
            config.embedding.batch_size,
        );
        let tutorial = TutorialPipeline::new(
            store.clone(),
            embedder.clone(),
            generator.clone(),
            config.tutorial.fallback_chars,
            config.tutorial.max_prompt_chars,
        );
        let search = SemanticSearch::new(store.clone(), embedder.clone())
            .with_max_limit(config.search.max_limit);

        Ok(Self {
            registry,
            pool,
            content,
            tutorial,
            search,
            store,
            embedder,
            generator,
            search_config: config.search.clone(),
        })
    }

    /// Build every collaborator from `config` and start the service.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let store: Arc<dyn VectorStore> = match config.storage.backend {
            StorageBackend::Sqlite => Arc::new(SqliteVectorStore::open(&config.db.path).await?),
            StorageBackend::Memory => Arc::new(InMemoryVectorStore::new()),
        };
        let embedder = create_provider(&config.embedding)?;
        let generator = create_generator(&config.generation)?;
        info!(
            storage = ?config.storage.backend,
            embedding = embedder.model_name(),
            generation = generator.model_name(),
            "service configured"
        );

        Self::new(
            config,
            Collaborators {
                fetcher: Arc::new(WebFetcher::new(&config.fetch)?),
                embedder,
                generator,
                store,
            },
        )
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    // ---- content ----

    /// Queue processing of `url` into the collection of `content_type`.
    pub fn submit_content(&self, url: &str, content_type: ContentType) -> Result<TaskReceipt> {
        let url = validate_url(url)?;
        let pipeline = self.content.clone();
        let task = self.pool.submit(TaskKind::Content, move |_| async move {
            pipeline.run(&url, content_type).await.map(TaskResult::Content)
        })?;
        Ok(receipt(task))
    }

    pub fn get_task_status(&self, task_id: &str) -> Result<ContentTaskStatus> {
        let task = self.task_of_kind(task_id, TaskKind::Content)?;
        Ok(ContentTaskStatus {
            content_id: task.result.as_ref().map(|r| r.reference().to_string()),
            task_id: task.id,
            status: task.status,
            error: task.error,
        })
    }

    /// The processed content of a COMPLETED content task.
    pub fn get_processed_content(&self, task_id: &str) -> Result<ProcessedContent> {
        let task = self.task_of_kind(task_id, TaskKind::Content)?;
        match task.result {
            Some(TaskResult::Content(content)) if task.status == TaskStatus::Completed => Ok(content),
            _ => Err(Error::TaskNotReady {
                task_id: task.id,
                status: task.status.to_string(),
            }),
        }
    }

    // ---- tutorials ----

    /// Queue tutorial generation for a stored content item.
    pub fn generate_tutorial(
        &self,
        content_id: &str,
        content_type: ContentType,
    ) -> Result<TaskReceipt> {
        let content_id = content_id.trim();
        if content_id.is_empty() {
            return Err(Error::validation("content_id must not be empty"));
        }
        let content_id = content_id.to_string();
        let pipeline = self.tutorial.clone();
        let task = self.pool.submit(TaskKind::Tutorial, move |_| async move {
            pipeline
                .run(&content_id, content_type)
                .await
                .map(TaskResult::Tutorial)
        })?;
        Ok(receipt(task))
    }

    pub fn get_tutorial_status(&self, task_id: &str) -> Result<TutorialTaskStatus> {
        let task = self.task_of_kind(task_id, TaskKind::Tutorial)?;
        let tutorial = match task.result {
            Some(TaskResult::Tutorial(t)) => Some(t),
            _ => None,
        };
        Ok(TutorialTaskStatus {
            task_id: task.id,
            status: task.status,
            tutorial_id: tutorial.as_ref().map(|t| t.id.clone()),
            tutorial,
            error: task.error,
        })
    }

    pub async fn get_tutorial_by_id(&self, tutorial_id: &str) -> Result<TutorialArtifact> {
        match self.store.get_by_id(TUTORIAL_COLLECTION, tutorial_id).await? {
            Some(record) => artifact_from_record(&record),
            None => Err(Error::not_found("tutorial", tutorial_id)),
        }
    }

    /// Run both section validators over a serialized tutorial.
    pub fn validate_tutorial(&self, tutorial: &Value) -> ValidationReport {
        ValidationReport {
            valid_types: validate_section_types(tutorial),
            valid_metadata: validate_section_metadata(tutorial),
        }
    }

    // ---- search ----

    pub async fn search_single(
        &self,
        query: &str,
        collection: &str,
        limit: Option<usize>,
    ) -> Result<Vec<SearchHit>> {
        let limit = limit.unwrap_or(self.search_config.default_limit);
        self.search.search_single(query, collection, limit).await
    }

    pub async fn search_multi(
        &self,
        query: &str,
        collections: &[String],
        limit_per_collection: Option<usize>,
    ) -> Result<BTreeMap<String, Vec<SearchHit>>> {
        let limit = limit_per_collection.unwrap_or(self.search_config.default_limit_per_collection);
        self.search.search_multi(query, collections, limit).await
    }

    pub async fn find_similar(
        &self,
        id: &str,
        collection: &str,
        limit: Option<usize>,
    ) -> Result<Vec<SearchHit>> {
        let limit = limit.unwrap_or(self.search_config.default_limit);
        self.search.find_similar(id, collection, limit).await
    }

    // ---- collections ----

    pub async fn collections(&self) -> Result<Vec<CollectionInfo>> {
        self.store.collections().await
    }

    /// One page of the items stored in `collection`, in insertion order.
    ///
    /// Chunks are grouped into one item per content id; each tutorial is
    /// its own item.
    pub async fn list_collection(
        &self,
        collection: &str,
        offset: usize,
        limit: Option<usize>,
    ) -> Result<CollectionPage> {
        let limit = limit.unwrap_or(self.search_config.default_limit);
        if limit == 0 || limit > self.search.max_limit() {
            return Err(Error::validation(format!(
                "limit must be between 1 and {}, got {}",
                self.search.max_limit(),
                limit
            )));
        }

        let records = self.store.list(collection).await?;
        let items = group_items(collection, records);
        Ok(CollectionPage {
            collection: collection.to_string(),
            total: items.len(),
            offset,
            items: items.into_iter().skip(offset).take(limit).collect(),
        })
    }

    /// Reassemble a stored content item from its chunk records.
    pub async fn get_content(&self, collection: &str, content_id: &str) -> Result<ProcessedContent> {
        if collection == TUTORIAL_COLLECTION {
            return Err(Error::validation(
                "tutorials are not content; fetch them by tutorial id",
            ));
        }
        let records = self.item_records(collection, content_id).await?;
        let Some(first) = records.first() else {
            return Err(Error::not_found("content", content_id));
        };
        let metadata = ContentMetadata::from_metadata(&first.metadata)?;
        Ok(ProcessedContent {
            content_id: metadata.content_id.clone(),
            metadata,
            chunks: records.into_iter().map(|r| r.document).collect(),
        })
    }

    /// Remove every record of a content item (or a tutorial by its id).
    pub async fn delete_content(&self, collection: &str, content_id: &str) -> Result<usize> {
        let ids: Vec<String> = if collection == TUTORIAL_COLLECTION {
            vec![content_id.to_string()]
        } else {
            self.item_records(collection, content_id)
                .await?
                .into_iter()
                .map(|r| r.id)
                .collect()
        };

        let removed = if ids.is_empty() {
            0
        } else {
            self.store.delete(collection, &ids).await?
        };
        if removed == 0 {
            return Err(Error::not_found("content", content_id));
        }
        info!(collection, content_id, removed, "deleted content");
        Ok(removed)
    }

    /// Id of the content already stored from `source_url`, if any.
    pub async fn find_by_source_url(&self, collection: &str, source_url: &str) -> Result<Option<String>> {
        let records = self
            .store
            .find_by_metadata(collection, "source_url", &Value::from(source_url))
            .await?;
        Ok(records.first().map(|r| item_key(collection, r)))
    }

    // ---- lifecycle ----

    pub fn health(&self) -> Health {
        Health {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
            tasks: self.registry.counts(),
            queued_jobs: self.pool.queued_jobs(),
            queue_capacity: self.pool.queue_capacity(),
            embedding_model: self.embedder.model_name().to_string(),
            generation_model: self.generator.model_name().to_string(),
        }
    }

    /// Stop accepting jobs and wait for queued ones to finish.
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }

    /// Every chunk of the content item `id` names. A chunk record id
    /// resolves to the whole item it belongs to.
    async fn item_records(&self, collection: &str, id: &str) -> Result<Vec<Record>> {
        let records = content_records(self.store.as_ref(), collection, id).await?;
        let owner = match records.as_slice() {
            [record] if record.id == id => record
                .metadata
                .get("content_id")
                .and_then(Value::as_str)
                .filter(|owner| !owner.is_empty() && *owner != id)
                .map(str::to_string),
            _ => None,
        };
        match owner {
            Some(owner) => content_records(self.store.as_ref(), collection, &owner).await,
            None => Ok(records),
        }
    }

    fn task_of_kind(&self, task_id: &str, kind: TaskKind) -> Result<Task> {
        let task = self.registry.get(task_id)?;
        if task.kind != kind {
            return Err(Error::not_found("task", task_id));
        }
        Ok(task)
    }
}

fn receipt(task: Task) -> TaskReceipt {
    TaskReceipt {
        task_id: task.id,
        status: ACCEPTED_STATUS,
    }
}

fn validate_url(raw: &str) -> Result<String> {
    let parsed = url::Url::parse(raw.trim())
        .map_err(|e| Error::validation(format!("invalid url '{}': {}", raw, e)))?;
    match parsed.scheme() {
        "http" | "https" => Ok(raw.trim().to_string()),
        other => Err(Error::validation(format!(
            "unsupported url scheme '{}': use http or https",
            other
        ))),
    }
}

/// Grouping key of a record in a listing: its content id, or its own id
/// for tutorials and records without one.
fn item_key(collection: &str, record: &Record) -> String {
    if collection == TUTORIAL_COLLECTION {
        return record.id.clone();
    }
    record
        .metadata
        .get("content_id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| record.id.clone())
}

fn group_items(collection: &str, records: Vec<Record>) -> Vec<CollectionItem> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<Record>> = HashMap::new();
    for record in records {
        let key = item_key(collection, &record);
        if !groups.contains_key(&key) {
            order.push(key.clone());
        }
        groups.entry(key).or_default().push(record);
    }

    order
        .into_iter()
        .filter_map(|key| {
            let mut group = groups.remove(&key)?;
            group.sort_by_key(chunk_index);
            let records = group.len();
            let first = group.into_iter().next()?;
            Some(CollectionItem {
                id: key,
                records,
                metadata: first.metadata,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(id: &str, cid: &str, index: u64) -> Record {
        let mut metadata = Metadata::new();
        metadata.insert("content_id".into(), cid.into());
        metadata.insert("chunk_index".into(), index.into());
        Record {
            id: id.into(),
            document: id.into(),
            embedding: vec![1.0],
            metadata,
        }
    }

    #[test]
    fn test_group_items_by_content_id() {
        let records = vec![rec("b_1", "b", 1), rec("a_0", "a", 0), rec("b_0", "b", 0), rec("lone", "", 0)];
        let items = group_items("article", records);
        let ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", ""]);
        assert_eq!(items[0].records, 2);
        assert_eq!(items[0].metadata["chunk_index"], 0);
    }

    #[test]
    fn test_tutorials_are_listed_individually() {
        let records = vec![rec("t1", "c", 0), rec("t2", "c", 0)];
        let items = group_items(TUTORIAL_COLLECTION, records);
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].id, "t2");
    }

    #[test]
    fn test_validate_url() {
        assert_eq!(
            validate_url(" https://example.com/a ").unwrap(),
            "https://example.com/a"
        );
        assert_eq!(validate_url("https://x").unwrap(), "https://x");
        assert!(matches!(validate_url("not a url"), Err(Error::Validation(_))));
        assert!(matches!(validate_url("ftp://x/y"), Err(Error::Validation(_))));
    }
}
