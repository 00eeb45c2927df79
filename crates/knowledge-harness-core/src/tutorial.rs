//! Tutorial prompt construction, response parsing, and the summary
//! fallback.
//!
//! The generative model is asked for a JSON object with a `sections` array.
//! Its output is free text, so parsing is tolerant about surrounding prose
//! but strict about the section schema:
//!
//! 1. Every `{` in the output is tried in order; the first position where a
//!    complete JSON value parses as an object is taken.
//! 2. That object must carry a non-empty `sections` array whose entries have
//!    a known `type`, a string `title`, and a string (or string array)
//!    `content`.
//! 3. Any violation yields [`TutorialOutcome::Fallback`]: one `summary`
//!    section titled "Overview" holding the head of the raw output.
//!
//! A [`SchemaError`] never escapes this module as a pipeline failure; it is
//! only logged and replaced by the fallback.
//!
//! The two validators at the bottom check serialized tutorials. They are
//! standalone checks for callers and do not gate storage.

use chrono::Utc;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{ContentType, Metadata, Section, SectionType, TutorialArtifact};
use crate::store::Record;

/// Title used for the fallback section.
pub const FALLBACK_SECTION_TITLE: &str = "Overview";

/// Artifact title when the source content has none.
pub const DEFAULT_TUTORIAL_TITLE: &str = "Tutorial";

/// Why a model response could not be read as a structured tutorial.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("no JSON object found in model output")]
    NoJsonObject,
    #[error("JSON object has no 'sections' array")]
    MissingSections,
    #[error("'sections' array is empty")]
    EmptySections,
    #[error("section {index}: {reason}")]
    InvalidSection { index: usize, reason: String },
}

/// Sections parsed from one model response, before they are bound to a
/// content item.
#[derive(Debug, Clone, PartialEq)]
pub struct TutorialDraft {
    pub sections: Vec<Section>,
}

/// Result of reading a model response.
#[derive(Debug, Clone, PartialEq)]
pub enum TutorialOutcome {
    /// The response matched the section schema.
    Structured(TutorialDraft),
    /// The response did not match; the draft is the single-section summary.
    Fallback(TutorialDraft),
}

impl TutorialOutcome {
    pub fn is_structured(&self) -> bool {
        matches!(self, TutorialOutcome::Structured(_))
    }

    pub fn into_draft(self) -> TutorialDraft {
        match self {
            TutorialOutcome::Structured(d) | TutorialOutcome::Fallback(d) => d,
        }
    }
}

/// Build the generation prompt for `source_text`.
pub fn build_prompt(source_text: &str) -> String {
    format!(
        r#"Create a comprehensive tutorial based on the content below. Respond with a single JSON object and nothing else.

Content to process:
{source_text}

Required JSON structure:
{{
  "sections": [
    {{
      "type": "summary",
      "title": "Overview",
      "content": "Clear overview of the main concepts"
    }},
    {{
      "type": "key_points",
      "title": "Key Points",
      "content": "Important takeaways and learning points"
    }},
    {{
      "type": "code_example",
      "title": "Code Examples",
      "content": "Code samples with explanations",
      "metadata": {{ "language": "programming language used" }}
    }},
    {{
      "type": "practice",
      "title": "Practice Exercises",
      "content": "Exercise description",
      "metadata": {{ "difficulty": "beginner|intermediate|advanced" }}
    }},
    {{
      "type": "notes",
      "title": "Additional Notes",
      "content": "Additional resources or notes"
    }}
  ]
}}

Guidelines:
- Every section must use one of the types shown above.
- Code examples include both the code and an explanation, and set metadata.language.
- Practice exercises are actionable and set metadata.difficulty.
- Keep the content focused on the source material."#
    )
}

/// Read a model response. Never fails: schema problems produce the
/// fallback draft, whose content is the first `fallback_chars` characters
/// of `raw`.
pub fn parse_tutorial(raw: &str, fallback_chars: usize) -> TutorialOutcome {
    match parse_sections(raw) {
        Ok(sections) => TutorialOutcome::Structured(TutorialDraft { sections }),
        Err(reason) => {
            tracing::warn!(%reason, "model output did not match tutorial schema; using summary fallback");
            TutorialOutcome::Fallback(fallback_draft(raw, fallback_chars))
        }
    }
}

/// Strict parse of a model response into sections.
pub fn parse_sections(raw: &str) -> std::result::Result<Vec<Section>, SchemaError> {
    let object = extract_first_json_object(raw).ok_or(SchemaError::NoJsonObject)?;
    let items = match object.get("sections") {
        Some(Value::Array(items)) => items,
        _ => return Err(SchemaError::MissingSections),
    };
    if items.is_empty() {
        return Err(SchemaError::EmptySections);
    }

    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            parse_section(item).map_err(|reason| SchemaError::InvalidSection { index, reason })
        })
        .collect()
}

/// The first well-formed JSON object embedded in `raw`, if any.
pub fn extract_first_json_object(raw: &str) -> Option<Map<String, Value>> {
    raw.match_indices('{').find_map(|(start, _)| {
        let mut stream = serde_json::Deserializer::from_str(&raw[start..]).into_iter::<Value>();
        match stream.next() {
            Some(Ok(Value::Object(map))) => Some(map),
            _ => None,
        }
    })
}

fn parse_section(item: &Value) -> std::result::Result<Section, String> {
    let obj = item.as_object().ok_or("not an object")?;

    let type_str = obj
        .get("type")
        .and_then(Value::as_str)
        .ok_or("missing 'type'")?;
    let section_type =
        SectionType::parse(type_str).ok_or_else(|| format!("unknown type '{}'", type_str))?;

    let title = obj
        .get("title")
        .and_then(Value::as_str)
        .ok_or("missing 'title'")?
        .to_string();

    let content = match obj.get("content") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(lines)) => lines
            .iter()
            .map(|l| l.as_str().map(str::to_string))
            .collect::<Option<Vec<_>>>()
            .ok_or("'content' array must hold only strings")?
            .join("\n"),
        _ => return Err("missing 'content'".to_string()),
    };

    let metadata = match obj.get("metadata") {
        None | Some(Value::Null) => None,
        Some(Value::Object(m)) => Some(m.clone()),
        Some(_) => return Err("'metadata' must be an object".to_string()),
    };

    Ok(Section {
        id: Uuid::new_v4().to_string(),
        section_type,
        title,
        content,
        metadata,
    })
}

/// The single-section summary used when a response cannot be parsed.
pub fn fallback_draft(raw: &str, fallback_chars: usize) -> TutorialDraft {
    TutorialDraft {
        sections: vec![Section {
            id: Uuid::new_v4().to_string(),
            section_type: SectionType::Summary,
            title: FALLBACK_SECTION_TITLE.to_string(),
            content: truncate_chars(raw, fallback_chars).to_string(),
            metadata: None,
        }],
    }
}

/// The longest prefix of `s` with at most `max_chars` characters.
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &s[..byte_idx],
        None => s,
    }
}

/// Artifact title for content described by `metadata`.
pub fn resolve_title(metadata: &Metadata) -> String {
    metadata
        .get("title")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(DEFAULT_TUTORIAL_TITLE)
        .to_string()
}

/// Text that is embedded to make a tutorial searchable.
pub fn embedding_text(title: &str, sections: &[Section]) -> String {
    let body = sections
        .iter()
        .map(|s| format!("{} {}", s.title, s.content))
        .collect::<Vec<_>>()
        .join(" ");
    format!("{} {}", title, body)
}

impl TutorialDraft {
    /// Bind the draft to its source content, stamping a fresh id and the
    /// generation time.
    pub fn into_artifact(
        self,
        content_id: &str,
        title: String,
        source_url: Option<String>,
        content_type: Option<ContentType>,
    ) -> TutorialArtifact {
        TutorialArtifact {
            id: Uuid::new_v4().to_string(),
            content_id: content_id.to_string(),
            title,
            source_url,
            content_type,
            generated_at: Utc::now(),
            sections: self.sections,
        }
    }
}

/// Build the stored record for an artifact.
pub fn artifact_record(
    artifact: &TutorialArtifact,
    structured: bool,
    embedding: Vec<f32>,
) -> Result<Record> {
    let serialized = serde_json::to_string(artifact)
        .map_err(|e| Error::storage(format!("failed to serialize tutorial: {}", e)))?;

    let mut metadata = Metadata::new();
    metadata.insert("title".into(), artifact.title.clone().into());
    metadata.insert("content_id".into(), artifact.content_id.clone().into());
    metadata.insert(
        "source_url".into(),
        artifact.source_url.clone().map(Value::from).unwrap_or(Value::Null),
    );
    metadata.insert(
        "content_type".into(),
        artifact
            .content_type
            .map(|t| Value::from(t.as_str()))
            .unwrap_or(Value::Null),
    );
    metadata.insert(
        "generated_date".into(),
        artifact.generated_at.to_rfc3339().into(),
    );
    metadata.insert("section_count".into(), artifact.sections.len().into());
    metadata.insert("structured".into(), structured.into());
    metadata.insert("tutorial".into(), serialized.into());

    Ok(Record {
        id: artifact.id.clone(),
        document: embedding_text(&artifact.title, &artifact.sections),
        embedding,
        metadata,
    })
}

/// Rebuild an artifact from its stored record.
pub fn artifact_from_record(record: &Record) -> Result<TutorialArtifact> {
    let raw = record
        .metadata
        .get("tutorial")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::storage(format!("record '{}' holds no tutorial", record.id)))?;
    serde_json::from_str(raw)
        .map_err(|e| Error::storage(format!("malformed tutorial '{}': {}", record.id, e)))
}

fn sections_of(tutorial: &Value) -> Option<&Vec<Value>> {
    match tutorial {
        Value::Array(items) => Some(items),
        Value::Object(obj) => obj.get("sections").and_then(Value::as_array),
        _ => None,
    }
}

/// True when every section's `type` is one of the five known kinds.
///
/// Accepts a serialized tutorial (an object with `sections`) or a bare
/// sections array. Anything else is invalid.
pub fn validate_section_types(tutorial: &Value) -> bool {
    let Some(sections) = sections_of(tutorial) else {
        return false;
    };
    sections.iter().all(|s| {
        s.get("type")
            .and_then(Value::as_str)
            .and_then(SectionType::parse)
            .is_some()
    })
}

/// True when every `code_example` section carries `metadata.language` and
/// every `practice` section carries `metadata.difficulty`.
pub fn validate_section_metadata(tutorial: &Value) -> bool {
    let Some(sections) = sections_of(tutorial) else {
        return false;
    };
    sections.iter().all(|s| {
        let required = s
            .get("type")
            .and_then(Value::as_str)
            .and_then(SectionType::parse)
            .and_then(|t| t.required_metadata_key());
        match required {
            Some(key) => s
                .get("metadata")
                .and_then(Value::as_object)
                .is_some_and(|m| m.contains_key(key)),
            None => true,
        }
    })
}

/// Typed form of [`validate_section_types`].
pub fn artifact_has_valid_types(artifact: &TutorialArtifact) -> bool {
    serde_json::to_value(artifact)
        .map(|v| validate_section_types(&v))
        .unwrap_or(false)
}

/// Typed form of [`validate_section_metadata`].
pub fn artifact_has_valid_metadata(artifact: &TutorialArtifact) -> bool {
    serde_json::to_value(artifact)
        .map(|v| validate_section_metadata(&v))
        .unwrap_or(false)
}
