#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use knowledge_harness::config::{parse_config, Config};
use knowledge_harness::embedding::HashEmbedder;
use knowledge_harness::service::{Collaborators, KnowledgeService};
use knowledge_harness::tasks::{Task, TaskRegistry};
use knowledge_harness_core::fetch::{FetchedContent, Fetcher, SourceMetadata};
use knowledge_harness_core::generation::GenerativeModel;
use knowledge_harness_core::models::ContentType;
use knowledge_harness_core::store::memory::InMemoryVectorStore;
use knowledge_harness_core::store::VectorStore;
use knowledge_harness_core::{Error, Result};

/// Serves canned pages keyed by URL; unknown URLs fail like a 404.
#[derive(Default)]
pub struct ScriptedFetcher {
    pages: Mutex<HashMap<String, FetchedContent>>,
}

impl ScriptedFetcher {
    pub fn with_page(self, url: &str, title: &str, author: Option<&str>, text: &str) -> Self {
        self.pages.lock().insert(
            url.to_string(),
            FetchedContent {
                metadata: SourceMetadata {
                    title: Some(title.to_string()),
                    author: author.map(str::to_string),
                    ..Default::default()
                },
                text: text.to_string(),
            },
        );
        self
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, url: &str, _content_type: ContentType) -> Result<FetchedContent> {
        self.pages
            .lock()
            .get(url)
            .cloned()
            .ok_or_else(|| Error::fetch(format!("GET {} returned 404 Not Found", url)))
    }
}

/// Replies with a fixed completion.
pub struct ScriptedModel(pub String);

#[async_trait]
impl GenerativeModel for ScriptedModel {
    fn model_name(&self) -> &str {
        "scripted"
    }
    async fn generate(&self, _prompt: &str) -> Result<String> {
        Ok(self.0.clone())
    }
}

pub const STRUCTURED_TUTORIAL: &str = r#"Sure! Here is the tutorial {as requested}:
{"sections": [
  {"type": "summary", "title": "Summary", "content": "Ownership moves values between bindings."},
  {"type": "key_points", "title": "Key points", "content": ["Each value has one owner", "Borrowing avoids moves"]},
  {"type": "code_example", "title": "Example", "content": "let b = a.clone();", "metadata": {"language": "rust"}},
  {"type": "practice", "title": "Try it", "content": "Write a function that borrows a String.", "metadata": {"difficulty": "beginner"}},
  {"type": "notes", "title": "Notes", "content": "Copy types are duplicated instead of moved."}
]}"#;

pub fn ownership_text() -> String {
    (0..30)
        .map(|i| format!("Paragraph {} explains ownership, borrowing and lifetimes in Rust.", i))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn cooking_text() -> String {
    (0..10)
        .map(|i| format!("Step {}: knead the sourdough bread and bake the loaf in the oven.", i))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn test_config(extra: &str) -> Config {
    parse_config(&format!(
        "[db]\npath = \"unused.sqlite\"\n\n[storage]\nbackend = \"memory\"\n\n[chunking]\nmax_chars = 300\noverlap_chars = 50\n\n{}",
        extra
    ))
    .unwrap()
}

pub fn fetcher() -> ScriptedFetcher {
    ScriptedFetcher::default()
        .with_page("https://blog.example/ownership", "Ownership", Some("Ferris"), &ownership_text())
        .with_page("https://blog.example/bread", "Bread", None, &cooking_text())
        .with_page("https://blog.example/blank", "Blank", None, "   \n\n  ")
        .with_page("https://x", "X", Some("Ferris"), &ownership_text())
}

pub fn service_with(config: &Config, store: Arc<dyn VectorStore>, tutorial: &str) -> KnowledgeService {
    KnowledgeService::new(
        config,
        Collaborators {
            fetcher: Arc::new(fetcher()),
            embedder: Arc::new(HashEmbedder::new(64)),
            generator: Arc::new(ScriptedModel(tutorial.to_string())),
            store,
        },
    )
    .unwrap()
}

pub fn memory_service(tutorial: &str) -> KnowledgeService {
    service_with(&test_config(""), Arc::new(InMemoryVectorStore::new()), tutorial)
}

pub async fn wait_terminal(registry: &TaskRegistry, task_id: &str) -> Task {
    for _ in 0..500 {
        let task = registry.get(task_id).unwrap();
        if task.status.is_terminal() {
            return task;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {} never finished", task_id);
}
