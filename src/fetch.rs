//! HTTP content fetcher.
//!
//! [`WebFetcher`] retrieves articles and YouTube videos with `reqwest` and
//! extracts text and source attributes from the HTML with `scraper`.
//!
//! Articles: title from `og:title` then `<title>`, author from
//! `meta[name=author]` then `article:author`, published date from
//! `article:published_time`, and text from the first `<article>`, `<main>`,
//! or `<body>` with page chrome removed.
//!
//! Videos: title and author from the YouTube oEmbed endpoint (falling back
//! to the watch page), text from the watch page's description.

use std::time::Duration;

use async_trait::async_trait;
use scraper::{ElementRef, Html, Node, Selector};
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use knowledge_harness_core::fetch::{FetchedContent, Fetcher, SourceMetadata};
use knowledge_harness_core::models::ContentType;
use knowledge_harness_core::{Error, Result};

use crate::config::FetchConfig;

const OEMBED_URL: &str = "https://www.youtube.com/oembed";

/// Subtrees whose text never belongs to the content.
const SKIPPED_TAGS: &[&str] = &[
    "script", "style", "noscript", "nav", "header", "footer", "aside", "form", "svg", "iframe",
];

/// Tags after which extracted text gets a line break.
const BLOCK_TAGS: &[&str] = &[
    "p", "div", "section", "article", "main", "br", "li", "ul", "ol", "h1", "h2", "h3", "h4",
    "h5", "h6", "pre", "blockquote", "table", "tr", "figure", "figcaption",
];

pub struct WebFetcher {
    client: reqwest::Client,
}

impl WebFetcher {
    pub fn new(config: &FetchConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self { client })
    }

    async fn get_text(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::fetch(format!("GET {} failed: {}", url, e)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::fetch(format!("GET {} returned {}", url, status)));
        }
        response
            .text()
            .await
            .map_err(|e| Error::fetch(format!("reading {} failed: {}", url, e)))
    }

    async fn fetch_article(&self, url: &str) -> Result<FetchedContent> {
        let html = self.get_text(url).await?;
        let content = parse_article(&html);
        if content.text.trim().is_empty() {
            return Err(Error::parse(format!("no article text found at {}", url)));
        }
        Ok(content)
    }

    async fn fetch_video(&self, url: &str) -> Result<FetchedContent> {
        let oembed = match self.oembed(url).await {
            Ok(o) => Some(o),
            Err(e) => {
                warn!(url, error = %e, "oEmbed lookup failed, using watch page");
                None
            }
        };

        let html = self.get_text(url).await?;
        let mut content = parse_video_page(&html);
        if let Some(o) = oembed {
            content.metadata.title = o.title.or(content.metadata.title);
            content.metadata.author = o.author_name.or(content.metadata.author);
        }
        if content.text.trim().is_empty() {
            return Err(Error::parse(format!("no video description found at {}", url)));
        }
        Ok(content)
    }

    async fn oembed(&self, url: &str) -> Result<OEmbed> {
        let endpoint = Url::parse_with_params(OEMBED_URL, &[("url", url), ("format", "json")])
            .map_err(|e| Error::fetch(format!("invalid oEmbed url: {}", e)))?;
        let body = self.get_text(endpoint.as_str()).await?;
        serde_json::from_str(&body).map_err(|e| Error::parse(format!("invalid oEmbed response: {}", e)))
    }
}

#[async_trait]
impl Fetcher for WebFetcher {
    async fn fetch(&self, url: &str, content_type: ContentType) -> Result<FetchedContent> {
        debug!(url, %content_type, "fetching");
        match content_type {
            ContentType::Article => self.fetch_article(url).await,
            ContentType::Video => self.fetch_video(url).await,
        }
    }
}

#[derive(Debug, Deserialize)]
struct OEmbed {
    title: Option<String>,
    author_name: Option<String>,
}

/// Extract metadata and readable text from an article page.
pub fn parse_article(html: &str) -> FetchedContent {
    let doc = Html::parse_document(html);
    let metadata = SourceMetadata {
        title: meta_content(&doc, r#"meta[property="og:title"]"#).or_else(|| title_tag(&doc)),
        author: meta_content(&doc, r#"meta[name="author"]"#)
            .or_else(|| meta_content(&doc, r#"meta[property="article:author"]"#)),
        published_date: meta_content(&doc, r#"meta[property="article:published_time"]"#),
        ..Default::default()
    };

    let text = ["article", "main", "body"]
        .iter()
        .filter_map(|tag| Selector::parse(tag).ok())
        .find_map(|sel| doc.select(&sel).next())
        .map(readable_text)
        .unwrap_or_default();

    FetchedContent { metadata, text }
}

/// Extract metadata and the description from a YouTube watch page.
pub fn parse_video_page(html: &str) -> FetchedContent {
    let doc = Html::parse_document(html);
    let metadata = SourceMetadata {
        title: meta_content(&doc, r#"meta[property="og:title"]"#).or_else(|| title_tag(&doc)),
        author: meta_content(&doc, r#"link[itemprop="name"]"#)
            .or_else(|| meta_content(&doc, r#"meta[name="author"]"#)),
        duration: meta_content(&doc, r#"meta[itemprop="duration"]"#),
        published_date: meta_content(&doc, r#"meta[itemprop="datePublished"]"#)
            .or_else(|| meta_content(&doc, r#"meta[itemprop="uploadDate"]"#)),
        view_count: meta_content(&doc, r#"meta[itemprop="interactionCount"]"#)
            .and_then(|v| v.parse().ok()),
    };
    let text = meta_content(&doc, r#"meta[property="og:description"]"#)
        .or_else(|| meta_content(&doc, r#"meta[name="description"]"#))
        .unwrap_or_default();

    FetchedContent { metadata, text }
}

/// Non-empty `content` attribute of the first element matching `selector`.
fn meta_content(doc: &Html, selector: &str) -> Option<String> {
    let sel = Selector::parse(selector).ok()?;
    doc.select(&sel)
        .filter_map(|el| el.value().attr("content"))
        .map(str::trim)
        .find(|c| !c.is_empty())
        .map(str::to_string)
}

fn title_tag(doc: &Html) -> Option<String> {
    let sel = Selector::parse("title").ok()?;
    let title = doc.select(&sel).next()?.text().collect::<String>();
    let title = title.trim();
    (!title.is_empty()).then(|| title.to_string())
}

/// Text of `root`, skipping chrome subtrees and breaking lines after block
/// elements.
fn readable_text(root: ElementRef<'_>) -> String {
    let mut out = String::new();
    collect_text(root, &mut out);
    out
}

fn collect_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(el) => {
                let name = el.name();
                if SKIPPED_TAGS.contains(&name) {
                    continue;
                }
                if let Some(child_el) = ElementRef::wrap(child) {
                    collect_text(child_el, out);
                }
                if BLOCK_TAGS.contains(&name) {
                    out.push('\n');
                }
            }
            _ => {}
        }
    }
}
