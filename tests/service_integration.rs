//! End-to-end tests of the service facade with in-process collaborators.

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;
use tokio::sync::Semaphore;

use common::*;
use knowledge_harness::embedding::HashEmbedder;
use knowledge_harness::service::{Collaborators, KnowledgeService, ACCEPTED_STATUS};
use knowledge_harness::sqlite_store::SqliteVectorStore;
use knowledge_harness::tasks::TaskStatus;
use knowledge_harness_core::fetch::{FetchedContent, Fetcher};
use knowledge_harness_core::models::{ContentType, TUTORIAL_COLLECTION};
use knowledge_harness_core::store::memory::InMemoryVectorStore;
use knowledge_harness_core::{Error, Result};

async fn ingest(service: &KnowledgeService, url: &str) -> String {
    let receipt = service.submit_content(url, ContentType::Article).unwrap();
    assert_eq!(receipt.status, ACCEPTED_STATUS);
    let task = wait_terminal(service.registry(), &receipt.task_id).await;
    assert_eq!(task.status, TaskStatus::Completed, "error: {:?}", task.error);
    service
        .get_task_status(&receipt.task_id)
        .unwrap()
        .content_id
        .unwrap()
}

#[tokio::test]
async fn test_content_round_trip() {
    let service = memory_service(STRUCTURED_TUTORIAL);
    let receipt = service
        .submit_content("https://blog.example/ownership", ContentType::Article)
        .unwrap();
    wait_terminal(service.registry(), &receipt.task_id).await;

    let processed = service.get_processed_content(&receipt.task_id).unwrap();
    assert_eq!(processed.metadata.title, "Ownership");
    assert_eq!(processed.metadata.author, "Ferris");
    assert_eq!(processed.metadata.source_url, "https://blog.example/ownership");
    assert!(processed.chunks.len() > 1);

    let stored = service
        .get_content("article", &processed.content_id)
        .await
        .unwrap();
    assert_eq!(stored.chunks, processed.chunks);
    assert_eq!(stored.metadata, processed.metadata);

    let status = service.get_task_status(&receipt.task_id).unwrap();
    assert_eq!(status.content_id.as_deref(), Some(processed.content_id.as_str()));
    assert!(status.error.is_none());
}

#[tokio::test]
async fn test_missing_author_defaults_to_unknown() {
    let service = memory_service(STRUCTURED_TUTORIAL);
    let content_id = ingest(&service, "https://blog.example/bread").await;
    let stored = service.get_content("article", &content_id).await.unwrap();
    assert_eq!(stored.metadata.author, "Unknown");
}

#[tokio::test]
async fn test_fetch_failure_marks_task_failed() {
    let service = memory_service(STRUCTURED_TUTORIAL);
    let receipt = service
        .submit_content("https://blog.example/missing", ContentType::Article)
        .unwrap();
    let task = wait_terminal(service.registry(), &receipt.task_id).await;
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.error.unwrap().contains("404"));

    let err = service.get_processed_content(&receipt.task_id).unwrap_err();
    assert!(matches!(err, Error::TaskNotReady { .. }));
    assert!(service.collections().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_blank_page_is_a_parse_failure() {
    let service = memory_service(STRUCTURED_TUTORIAL);
    let receipt = service
        .submit_content("https://blog.example/blank", ContentType::Article)
        .unwrap();
    let task = wait_terminal(service.registry(), &receipt.task_id).await;
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.error.unwrap().contains("no extractable text"));
}

#[tokio::test]
async fn test_invalid_submissions_are_rejected() {
    let service = memory_service(STRUCTURED_TUTORIAL);
    assert!(matches!(
        service.submit_content("file:///etc/passwd", ContentType::Article),
        Err(Error::Validation(_))
    ));
    assert!(matches!(
        service.generate_tutorial("  ", ContentType::Article),
        Err(Error::Validation(_))
    ));
    assert!(service.registry().is_empty());
}

#[tokio::test]
async fn test_unknown_and_mismatched_task_ids() {
    let service = memory_service(STRUCTURED_TUTORIAL);
    assert!(matches!(
        service.get_task_status("nope"),
        Err(Error::NotFound { .. })
    ));

    let content_id = ingest(&service, "https://blog.example/ownership").await;
    let receipt = service
        .generate_tutorial(&content_id, ContentType::Article)
        .unwrap();
    wait_terminal(service.registry(), &receipt.task_id).await;
    assert!(matches!(
        service.get_task_status(&receipt.task_id),
        Err(Error::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_tutorial_flow() {
    let service = memory_service(STRUCTURED_TUTORIAL);
    let content_id = ingest(&service, "https://blog.example/ownership").await;

    let receipt = service
        .generate_tutorial(&content_id, ContentType::Article)
        .unwrap();
    assert_eq!(receipt.status, ACCEPTED_STATUS);
    wait_terminal(service.registry(), &receipt.task_id).await;

    let status = service.get_tutorial_status(&receipt.task_id).unwrap();
    assert_eq!(status.status, TaskStatus::Completed);
    let tutorial = status.tutorial.unwrap();
    assert_eq!(status.tutorial_id.as_deref(), Some(tutorial.id.as_str()));
    assert_eq!(tutorial.content_id, content_id);
    assert_eq!(tutorial.title, "Ownership");
    assert_eq!(tutorial.sections.len(), 5);

    let fetched = service.get_tutorial_by_id(&tutorial.id).await.unwrap();
    assert_eq!(fetched.sections, tutorial.sections);
    assert_eq!(fetched.source_url.as_deref(), Some("https://blog.example/ownership"));

    let report = service.validate_tutorial(&serde_json::to_value(&fetched).unwrap());
    assert!(report.valid_types);
    assert!(report.valid_metadata);

    let page = service
        .list_collection(TUTORIAL_COLLECTION, 0, None)
        .await
        .unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].id, tutorial.id);
}

#[tokio::test]
async fn test_unstructured_tutorial_falls_back() {
    let service = memory_service("I could not produce JSON, sorry.");
    let content_id = ingest(&service, "https://blog.example/ownership").await;
    let receipt = service
        .generate_tutorial(&content_id, ContentType::Article)
        .unwrap();
    wait_terminal(service.registry(), &receipt.task_id).await;

    let tutorial = service
        .get_tutorial_status(&receipt.task_id)
        .unwrap()
        .tutorial
        .unwrap();
    assert_eq!(tutorial.sections.len(), 1);
    assert_eq!(tutorial.sections[0].content, "I could not produce JSON, sorry.");
}

#[tokio::test]
async fn test_tutorial_for_unknown_content_fails() {
    let service = memory_service(STRUCTURED_TUTORIAL);
    let receipt = service
        .generate_tutorial("no-such-content", ContentType::Article)
        .unwrap();
    let task = wait_terminal(service.registry(), &receipt.task_id).await;
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.error.unwrap().contains("not found"));
    assert!(matches!(
        service.get_tutorial_by_id("no-such-tutorial").await,
        Err(Error::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_validate_tutorial_reports_bad_sections() {
    let service = memory_service(STRUCTURED_TUTORIAL);
    let report = service.validate_tutorial(&json!({
        "sections": [
            {"type": "summary", "title": "S", "content": "x"},
            {"type": "code_example", "title": "C", "content": "x", "metadata": {}}
        ]
    }));
    assert!(report.valid_types);
    assert!(!report.valid_metadata);

    let report = service.validate_tutorial(&json!({
        "sections": [{"type": "essay", "title": "E", "content": "x"}]
    }));
    assert!(!report.valid_types);
}

#[tokio::test]
async fn test_search_and_similar() {
    let service = memory_service(STRUCTURED_TUTORIAL);
    let rust_id = ingest(&service, "https://blog.example/ownership").await;
    let bread_id = ingest(&service, "https://blog.example/bread").await;

    let hits = service
        .search_single("ownership borrowing lifetimes", "article", Some(3))
        .await
        .unwrap();
    assert_eq!(hits.len(), 3);
    assert_eq!(hits[0].metadata["content_id"], rust_id.as_str());
    assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));

    let hits = service
        .search_single("sourdough bread oven", "article", Some(1))
        .await
        .unwrap();
    assert_eq!(hits[0].metadata["content_id"], bread_id.as_str());

    let multi = service
        .search_multi(
            "ownership",
            &["article".to_string(), "youtube".to_string()],
            Some(2),
        )
        .await
        .unwrap();
    assert_eq!(multi["article"].len(), 2);
    assert!(multi["youtube"].is_empty());

    let similar = service
        .find_similar(&format!("{}_0", rust_id), "article", Some(5))
        .await
        .unwrap();
    assert_eq!(similar.len(), 5);
    assert!(similar.iter().all(|h| h.id != format!("{}_0", rust_id)));

    let by_content = service
        .find_similar(&rust_id, "article", Some(3))
        .await
        .unwrap();
    assert!(by_content
        .iter()
        .all(|h| h.metadata["content_id"] != rust_id.as_str()));

    assert!(matches!(
        service.search_single("", "article", None).await,
        Err(Error::Validation(_))
    ));
    assert!(matches!(
        service.search_single("ownership", "article", Some(0)).await,
        Err(Error::Validation(_))
    ));
    assert!(matches!(
        service.find_similar("nope", "article", None).await,
        Err(Error::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_collection_management() {
    let service = memory_service(STRUCTURED_TUTORIAL);
    let first = ingest(&service, "https://blog.example/ownership").await;
    let second = ingest(&service, "https://blog.example/bread").await;

    let collections = service.collections().await.unwrap();
    assert_eq!(collections.len(), 1);
    assert_eq!(collections[0].name, "article");
    assert_eq!(collections[0].dims, Some(64));

    let page = service.list_collection("article", 0, Some(1)).await.unwrap();
    assert_eq!(page.total, 2);
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].id, first);
    let page = service.list_collection("article", 1, Some(10)).await.unwrap();
    assert_eq!(page.items[0].id, second);
    assert!(page.items[0].records > 0);

    assert_eq!(
        service
            .find_by_source_url("article", "https://blog.example/bread")
            .await
            .unwrap(),
        Some(second.clone())
    );
    assert_eq!(
        service
            .find_by_source_url("article", "https://blog.example/other")
            .await
            .unwrap(),
        None
    );

    let removed = service.delete_content("article", &second).await.unwrap();
    assert_eq!(removed, page.items[0].records);
    assert!(matches!(
        service.get_content("article", &second).await,
        Err(Error::NotFound { .. })
    ));
    assert!(matches!(
        service.delete_content("article", &second).await,
        Err(Error::NotFound { .. })
    ));
    assert!(matches!(
        service.get_content(TUTORIAL_COLLECTION, &first).await,
        Err(Error::Validation(_))
    ));
}

#[tokio::test]
async fn test_source_url_is_stored_as_submitted() {
    let service = memory_service(STRUCTURED_TUTORIAL);
    let receipt = service
        .submit_content("https://x", ContentType::Article)
        .unwrap();
    let task = wait_terminal(service.registry(), &receipt.task_id).await;
    assert_eq!(task.status, TaskStatus::Completed, "error: {:?}", task.error);

    let processed = service.get_processed_content(&receipt.task_id).unwrap();
    assert_eq!(processed.metadata.source_url, "https://x");
    assert_eq!(
        service
            .find_by_source_url("article", "https://x")
            .await
            .unwrap(),
        Some(processed.content_id)
    );
}

#[tokio::test]
async fn test_chunk_id_addresses_whole_content() {
    let service = memory_service(STRUCTURED_TUTORIAL);
    let content_id = ingest(&service, "https://blog.example/ownership").await;
    let chunk_id = format!("{}_0", content_id);

    let full = service.get_content("article", &content_id).await.unwrap();
    assert!(full.chunks.len() > 1);
    let via_chunk = service.get_content("article", &chunk_id).await.unwrap();
    assert_eq!(via_chunk.chunks, full.chunks);

    let removed = service.delete_content("article", &chunk_id).await.unwrap();
    assert_eq!(removed, full.chunks.len());
    assert!(matches!(
        service.get_content("article", &content_id).await,
        Err(Error::NotFound { .. })
    ));
    assert!(service.collections().await.unwrap().iter().all(|c| c.records == 0));
}

#[tokio::test]
async fn test_sqlite_backed_service_persists_content() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("kh.sqlite");
    let config = test_config("");

    let store = Arc::new(SqliteVectorStore::open(&path).await.unwrap());
    let service = service_with(&config, store.clone(), STRUCTURED_TUTORIAL);
    let content_id = ingest(&service, "https://blog.example/ownership").await;
    service.shutdown().await;
    store.close().await;

    let store = Arc::new(SqliteVectorStore::open(&path).await.unwrap());
    let service = service_with(&config, store, STRUCTURED_TUTORIAL);
    let stored = service.get_content("article", &content_id).await.unwrap();
    assert_eq!(stored.metadata.title, "Ownership");
    let hits = service
        .search_single("ownership", "article", Some(1))
        .await
        .unwrap();
    assert_eq!(hits[0].metadata["content_id"], content_id.as_str());
}

/// Blocks every fetch until a permit is released.
struct GatedFetcher(Arc<Semaphore>);

#[async_trait]
impl Fetcher for GatedFetcher {
    async fn fetch(&self, url: &str, _content_type: ContentType) -> Result<FetchedContent> {
        let _permit = self
            .0
            .acquire()
            .await
            .map_err(|e| Error::fetch(e.to_string()))?;
        Err(Error::fetch(format!("{} is gated", url)))
    }
}

#[tokio::test]
async fn test_full_queue_rejects_submissions() {
    let config = test_config("[workers]\nmax_workers = 1\nqueue_capacity = 1\n");
    let gate = Arc::new(Semaphore::new(0));
    let service = KnowledgeService::new(
        &config,
        Collaborators {
            fetcher: Arc::new(GatedFetcher(gate.clone())),
            embedder: Arc::new(HashEmbedder::new(64)),
            generator: Arc::new(ScriptedModel(String::new())),
            store: Arc::new(InMemoryVectorStore::new()),
        },
    )
    .unwrap();

    let mut overloaded = None;
    for i in 0..3 {
        match service.submit_content(&format!("https://blog.example/{}", i), ContentType::Article) {
            Ok(_) => {}
            Err(e) => {
                overloaded = Some(e);
                break;
            }
        }
    }
    assert!(matches!(overloaded, Some(Error::Overloaded(_))));
    assert!(service.registry().counts().failed >= 1);

    gate.add_permits(10);
    service.shutdown().await;
    let counts = service.registry().counts();
    assert_eq!(counts.queued + counts.processing, 0);
}
