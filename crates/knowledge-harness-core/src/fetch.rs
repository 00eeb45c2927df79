//! Content fetcher trait.
//!
//! A fetcher turns a source URL into plain text plus the handful of source
//! attributes the content pipeline records. The HTTP-backed implementation
//! lives in the app crate; tests substitute in-memory fakes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::ContentType;

/// Source attributes extracted while fetching.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub duration: Option<String>,
    pub published_date: Option<String>,
    pub view_count: Option<u64>,
}

/// Raw result of a fetch, before normalization and chunking.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedContent {
    pub metadata: SourceMetadata,
    pub text: String,
}

/// Retrieves content from a source URL.
///
/// Implementations return [`crate::Error::Fetch`] when the source cannot be
/// reached and [`crate::Error::Parse`] when it was reached but yielded no
/// usable text.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str, content_type: ContentType) -> Result<FetchedContent>;
}
