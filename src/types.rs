//! Core data model: search queries, upstream responses, page snapshots.
//!
//! The upstream envelope mirrors the SearXNG JSON API field names. Result
//! order in [`UpstreamSearchResponse::results`] is authoritative: position
//! `i` there is the slot index carried through scraping, formatting, and
//! the final output batch.

use serde::{Deserialize, Serialize};
use url::Url;

/// A search request against the upstream meta-search engine. Immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    /// The query text.
    pub text: String,
    /// Number of results requested (1..=20).
    pub count: usize,
    /// Category filter, forwarded comma-joined.
    pub categories: Vec<String>,
    /// Engine filter, forwarded comma-joined.
    pub engines: Vec<String>,
    /// Result language, e.g. `en` or `de-DE`.
    pub language: Option<String>,
    /// Upstream page number (1-based). `None` means page 1.
    pub page_number: Option<u32>,
    /// Time range filter (`day`, `week`, `month`, `year`).
    pub time_range: Option<String>,
}

/// Maximum result count a query may request.
pub const MAX_RESULT_COUNT: usize = 20;

/// Default result count when the caller does not specify one.
pub const DEFAULT_RESULT_COUNT: usize = 5;

impl SearchQuery {
    /// Build a query for the given text with the default count.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            count: DEFAULT_RESULT_COUNT,
            categories: Vec::new(),
            engines: Vec::new(),
            language: None,
            page_number: None,
            time_range: None,
        }
    }

    /// Return a copy of this query targeting a different upstream page.
    pub fn with_page(&self, page_number: u32) -> Self {
        Self {
            page_number: Some(page_number),
            ..self.clone()
        }
    }

    /// Deterministic, key-sorted JSON serialization used for cache keying.
    ///
    /// `serde_json`'s default map is ordered by key, so round-tripping
    /// through `Value` yields the same string for equal queries regardless
    /// of construction order.
    pub fn canonical_json(&self) -> String {
        let value = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        value.to_string()
    }
}

/// The envelope returned by the SearXNG `/search` JSON API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpstreamSearchResponse {
    #[serde(default)]
    pub query: String,
    #[serde(rename = "number_of_results", default)]
    pub total_results: f64,
    #[serde(default)]
    pub results: Vec<UpstreamResult>,
    #[serde(default)]
    pub answers: Vec<serde_json::Value>,
    #[serde(default)]
    pub corrections: Vec<serde_json::Value>,
    #[serde(default)]
    pub infoboxes: Vec<serde_json::Value>,
    #[serde(default)]
    pub suggestions: Vec<serde_json::Value>,
    #[serde(default)]
    pub unresponsive_engines: Vec<serde_json::Value>,
}

/// One search hit from the upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamResult {
    /// Absolute http(s) URL of the hit.
    pub url: String,
    #[serde(default)]
    pub title: String,
    /// Search-engine snippet.
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub engine: String,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub category: String,
}

impl UpstreamResult {
    /// Parse the result URL, which must be absolute http(s).
    pub fn parsed_url(&self) -> Option<Url> {
        let parsed = Url::parse(&self.url).ok()?;
        matches!(parsed.scheme(), "http" | "https").then_some(parsed)
    }
}

/// Readability-extracted content carried inside a [`PageSnapshot`].
#[derive(Debug, Clone, Default)]
pub struct ParsedContent {
    pub title: Option<String>,
    /// Extracted main-content HTML.
    pub content: Option<String>,
    pub published_time: Option<String>,
}

/// An image reference observed while rendering a page.
#[derive(Debug, Clone)]
pub struct ImgBrief {
    pub src: String,
    pub alt: Option<String>,
}

/// A point-in-time rendering of a page, produced by a [`crate::browser::Browser`].
///
/// Snapshots for the same scrape arrive progressively better (DOM-ready
/// first, then after content settles); later snapshots supersede earlier
/// ones within a slot.
#[derive(Debug, Clone, Default)]
pub struct PageSnapshot {
    /// The URL the snapshot was taken at (after redirects).
    pub href: String,
    pub title: Option<String>,
    pub html: Option<String>,
    /// Plain-text rendering of the page.
    pub text: Option<String>,
    pub parsed: Option<ParsedContent>,
    pub imgs: Vec<ImgBrief>,
    /// Viewport screenshot bytes (PNG).
    pub screenshot: Option<Vec<u8>>,
    /// Full-page screenshot bytes (PNG).
    pub pageshot: Option<Vec<u8>>,
    /// URL against which relative links and images are resolved, when it
    /// differs from `href`.
    pub rebase: Option<Url>,
    pub max_elem_depth: Option<usize>,
    pub elem_count: Option<usize>,
    /// Whether the producer identified the document as a PDF.
    pub is_pdf: bool,
}

impl PageSnapshot {
    /// The URL relative references should resolve against.
    pub fn base_url(&self) -> Option<Url> {
        self.rebase.clone().or_else(|| Url::parse(&self.href).ok())
    }
}

/// Output format selector for formatted pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RespondMode {
    #[default]
    Markdown,
    Html,
    Text,
    Screenshot,
    Pageshot,
}

impl RespondMode {
    /// Parse a mode from the `X-Respond-With` header value.
    /// Unknown values fall back to [`RespondMode::Markdown`].
    pub fn from_header(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "html" => Self::Html,
            "text" => Self::Text,
            "screenshot" => Self::Screenshot,
            "pageshot" => Self::Pageshot,
            _ => Self::Markdown,
        }
    }
}

/// Per-request options propagated explicitly into every downstream call.
///
/// One value is built per incoming HTTP request and passed by reference;
/// nothing request-scoped lives in process-wide state.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub mode: RespondMode,
    /// Host (authority) used when minting screenshot asset URLs.
    pub host: String,
    pub user_agent: Option<String>,
    pub no_cache: bool,
    /// Early-return deadline override for the search pipeline.
    pub timeout: Option<std::time::Duration>,
    pub with_generated_alt: bool,
    pub with_images_summary: bool,
    pub with_links_summary: bool,
    pub wait_for_selector: Option<String>,
    pub target_selector: Option<String>,
    pub remove_selector: Option<String>,
    pub proxy_url: Option<String>,
    pub locale: Option<String>,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self {
            mode: RespondMode::Markdown,
            host: format!("localhost:{}", crate::config::DEFAULT_PORT),
            user_agent: None,
            no_cache: false,
            timeout: None,
            with_generated_alt: false,
            with_images_summary: false,
            with_links_summary: false,
            wait_for_selector: None,
            target_selector: None,
            remove_selector: None,
            proxy_url: None,
            locale: None,
        }
    }
}
