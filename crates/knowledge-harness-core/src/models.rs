//! Core data models used throughout Knowledge Harness.
//!
//! These types represent the content items, tutorial artifacts, and search
//! hits that flow through the processing pipelines and the search
//! aggregator. Everything here is plain data: serializable, cloneable, and
//! free of I/O.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Free-form metadata attached to every stored record.
pub type Metadata = serde_json::Map<String, Value>;

/// Collection holding generated tutorial artifacts.
pub const TUTORIAL_COLLECTION: &str = "tutorial";

/// Kind of source content. Each kind is stored in its own collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContentType {
    #[serde(rename = "article")]
    Article,
    #[serde(rename = "youtube", alias = "video")]
    Video,
}

impl ContentType {
    pub const ALL: [ContentType; 2] = [ContentType::Article, ContentType::Video];

    /// Wire spelling, also the name of the collection this kind lives in.
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Article => "article",
            ContentType::Video => "youtube",
        }
    }

    pub fn collection(&self) -> &'static str {
        self.as_str()
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "article" => Ok(ContentType::Article),
            "youtube" | "video" => Ok(ContentType::Video),
            other => Err(Error::validation(format!(
                "unsupported content type '{}': use article or youtube",
                other
            ))),
        }
    }
}

/// Metadata stored alongside every chunk of a processed content item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentMetadata {
    pub content_id: String,
    pub title: String,
    pub author: String,
    pub source_url: String,
    pub content_type: ContentType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_count: Option<u64>,
    /// RFC 3339 timestamp of when the pipeline persisted the item.
    pub processed_date: String,
    /// SHA-256 of the normalized text the chunks were cut from.
    pub content_hash: String,
}

impl ContentMetadata {
    /// Flatten into a record metadata map.
    pub fn to_metadata(&self) -> Metadata {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Metadata::new(),
        }
    }

    /// Rebuild from a stored record's metadata. Extra keys (chunk index,
    /// chunk count) are ignored.
    pub fn from_metadata(metadata: &Metadata) -> Result<Self> {
        serde_json::from_value(Value::Object(metadata.clone()))
            .map_err(|e| Error::storage(format!("malformed content metadata: {}", e)))
    }
}

/// A fully processed content item: metadata plus its ordered chunk texts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedContent {
    pub content_id: String,
    pub metadata: ContentMetadata,
    pub chunks: Vec<String>,
}

/// The fixed set of tutorial section kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionType {
    Summary,
    KeyPoints,
    CodeExample,
    Practice,
    Notes,
}

impl SectionType {
    pub const ALL: [SectionType; 5] = [
        SectionType::Summary,
        SectionType::KeyPoints,
        SectionType::CodeExample,
        SectionType::Practice,
        SectionType::Notes,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SectionType::Summary => "summary",
            SectionType::KeyPoints => "key_points",
            SectionType::CodeExample => "code_example",
            SectionType::Practice => "practice",
            SectionType::Notes => "notes",
        }
    }

    /// Parse a wire spelling; `None` for anything outside the enum.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }

    /// Metadata key this section type must carry, if any.
    pub fn required_metadata_key(&self) -> Option<&'static str> {
        match self {
            SectionType::CodeExample => Some("language"),
            SectionType::Practice => Some("difficulty"),
            _ => None,
        }
    }
}

impl fmt::Display for SectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One section of a tutorial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub id: String,
    #[serde(rename = "type")]
    pub section_type: SectionType,
    pub title: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

/// A tutorial derived from a stored content item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TutorialArtifact {
    pub id: String,
    pub content_id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<ContentType>,
    pub generated_at: DateTime<Utc>,
    pub sections: Vec<Section>,
}

/// A single nearest-neighbour hit. Lower distance means more similar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub text: String,
    pub metadata: Metadata,
    pub distance: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_metadata() -> ContentMetadata {
        ContentMetadata {
            content_id: "c1".into(),
            title: "X".into(),
            author: "Y".into(),
            source_url: "https://x".into(),
            content_type: ContentType::Article,
            duration: None,
            published_date: Some("2024-01-01".into()),
            view_count: None,
            processed_date: "2024-01-02T00:00:00Z".into(),
            content_hash: "abc".into(),
        }
    }

    #[test]
    fn test_content_type_parse() {
        assert_eq!("article".parse::<ContentType>().unwrap(), ContentType::Article);
        assert_eq!("youtube".parse::<ContentType>().unwrap(), ContentType::Video);
        assert_eq!("Video".parse::<ContentType>().unwrap(), ContentType::Video);
        assert!(matches!(
            "podcast".parse::<ContentType>(),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_content_type_serde_spelling() {
        let json = serde_json::to_string(&ContentType::Video).unwrap();
        assert_eq!(json, "\"youtube\"");
        let back: ContentType = serde_json::from_str("\"video\"").unwrap();
        assert_eq!(back, ContentType::Video);
    }

    #[test]
    fn test_content_metadata_roundtrip_through_map() {
        let meta = sample_metadata();
        let mut map = meta.to_metadata();
        assert_eq!(map["title"], "X");
        assert_eq!(map["content_type"], "article");
        assert!(!map.contains_key("duration"));

        map.insert("chunk_index".into(), 3.into());
        let back = ContentMetadata::from_metadata(&map).unwrap();
        assert_eq!(back, meta);
    }

    #[test]
    fn test_section_type_parse() {
        for t in SectionType::ALL {
            assert_eq!(SectionType::parse(t.as_str()), Some(t));
        }
        assert_eq!(SectionType::parse("quiz"), None);
        assert_eq!(
            SectionType::CodeExample.required_metadata_key(),
            Some("language")
        );
        assert_eq!(SectionType::Notes.required_metadata_key(), None);
    }

    #[test]
    fn test_section_serializes_type_field() {
        let s = Section {
            id: "s1".into(),
            section_type: SectionType::KeyPoints,
            title: "Key Points".into(),
            content: "a".into(),
            metadata: None,
        };
        let v = serde_json::to_value(&s).unwrap();
        assert_eq!(v["type"], "key_points");
        assert!(v.get("metadata").is_none());
    }
}
