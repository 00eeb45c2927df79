//! Tutorial generation pipeline.
//!
//! 1. Retrieve the stored chunks of a content item, in chunk order.
//! 2. Build the prompt from their text (capped at `max_prompt_chars`).
//! 3. Ask the [`GenerativeModel`] for a tutorial.
//! 4. Parse the response. A response that does not match the section schema
//!    is replaced by the single-section summary fallback rather than
//!    failing the run.
//! 5. Embed the tutorial text and store one record in the `tutorial`
//!    collection.
//!
//! Retrieval, generation, embedding, and storage errors fail the run.

use std::sync::Arc;

use tracing::{debug, info_span, Instrument};

use knowledge_harness_core::embedding::{embed_one, EmbeddingProvider};
use knowledge_harness_core::generation::GenerativeModel;
use knowledge_harness_core::models::{ContentType, TutorialArtifact, TUTORIAL_COLLECTION};
use knowledge_harness_core::store::{content_records, VectorStore};
use knowledge_harness_core::tutorial::{
    artifact_record, build_prompt, embedding_text, parse_tutorial, resolve_title, truncate_chars,
};
use knowledge_harness_core::{Error, Result};

#[derive(Clone)]
pub struct TutorialPipeline {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    generator: Arc<dyn GenerativeModel>,
    fallback_chars: usize,
    max_prompt_chars: usize,
}

impl TutorialPipeline {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn GenerativeModel>,
        fallback_chars: usize,
        max_prompt_chars: usize,
    ) -> Self {
        Self {
            store,
            embedder,
            generator,
            fallback_chars,
            max_prompt_chars,
        }
    }

    /// Generate and store a tutorial for `content_id`, read from the
    /// collection of `content_type`.
    pub async fn run(&self, content_id: &str, content_type: ContentType) -> Result<TutorialArtifact> {
        let span = info_span!(
            "tutorial_pipeline",
            content_id = %content_id,
            collection = content_type.collection()
        );
        self.run_inner(content_id, content_type).instrument(span).await
    }

    async fn run_inner(&self, content_id: &str, content_type: ContentType) -> Result<TutorialArtifact> {
        let collection = content_type.collection();
        let records = content_records(self.store.as_ref(), collection, content_id).await?;
        let Some(first) = records.first() else {
            return Err(Error::not_found("content", content_id));
        };
        debug!(chunks = records.len(), "retrieved source");

        let title = resolve_title(&first.metadata);
        let source_url = first
            .metadata
            .get("source_url")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        let source_text = records
            .iter()
            .map(|r| r.document.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let prompt = build_prompt(truncate_chars(&source_text, self.max_prompt_chars));

        debug!(model = self.generator.model_name(), "generating");
        let raw = self.generator.generate(&prompt).await?;

        let outcome = parse_tutorial(&raw, self.fallback_chars);
        let structured = outcome.is_structured();
        let artifact = outcome.into_draft().into_artifact(
            content_id,
            title,
            source_url,
            Some(content_type),
        );
        debug!(
            tutorial_id = %artifact.id,
            sections = artifact.sections.len(),
            structured,
            "parsed"
        );

        let embedding = embed_one(
            self.embedder.as_ref(),
            &embedding_text(&artifact.title, &artifact.sections),
        )
        .await?;
        let record = artifact_record(&artifact, structured, embedding)?;
        self.store.add(TUTORIAL_COLLECTION, vec![record]).await?;

        Ok(artifact)
    }
}
