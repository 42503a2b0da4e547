//! The snapshot producer seam and its HTTP implementation.
//!
//! A [`Browser`] turns a URL into a stream of progressively better
//! [`PageSnapshot`]s. Headless rendering lives behind this trait; the
//! shipped [`HttpBrowser`] fetches over plain HTTP and extracts content
//! with CSS-selector heuristics, which is enough for static pages and for
//! running the gateway without a browser fleet. Tests use scripted
//! implementations.
//!
//! The [`HostBlocklist`] is an add-only set of hostnames the browser
//! refuses to fetch; the gateway registers its own hostname there so
//! search results pointing back at the gateway cannot recurse.

use crate::error::{GatewayError, Result};
use crate::searx::FALLBACK_USER_AGENT;
use crate::types::{ImgBrief, PageSnapshot, ParsedContent, RequestContext};
use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use url::Url;

/// Options forwarded to a scrape, derived from the request context.
#[derive(Debug, Clone, Default)]
pub struct ScrapeOptions {
    pub user_agent: Option<String>,
    pub wait_for_selector: Option<String>,
    pub target_selector: Option<String>,
    pub remove_selector: Option<String>,
    pub proxy_url: Option<String>,
}

impl From<&RequestContext> for ScrapeOptions {
    fn from(ctx: &RequestContext) -> Self {
        Self {
            user_agent: ctx.user_agent.clone(),
            wait_for_selector: ctx.wait_for_selector.clone(),
            target_selector: ctx.target_selector.clone(),
            remove_selector: ctx.remove_selector.clone(),
            proxy_url: ctx.proxy_url.clone(),
        }
    }
}

/// Items yielded by a scrape stream. Per-item errors do not end the
/// stream's slot; consumers log them and keep waiting for peers.
pub type SnapshotStream = mpsc::Receiver<Result<PageSnapshot>>;

/// A producer of page snapshots.
#[async_trait]
pub trait Browser: Send + Sync {
    /// Begin scraping `url`. The returned stream yields snapshots until
    /// the scrape settles; dropping it terminates the scrape.
    ///
    /// # Errors
    ///
    /// Returns an error only when the scrape cannot start at all (blocked
    /// host, invalid target). In-flight failures arrive on the stream.
    async fn scrape(&self, url: Url, opts: ScrapeOptions) -> Result<SnapshotStream>;
}

/// Add-only set of hostnames the browser must not fetch.
///
/// Conservative by design: a false positive only blocks an extra host.
#[derive(Debug, Default)]
pub struct HostBlocklist {
    hosts: RwLock<HashSet<String>>,
}

impl HostBlocklist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a hostname (stored lowercased).
    pub fn add(&self, host: &str) {
        if host.is_empty() {
            return;
        }
        if let Ok(mut hosts) = self.hosts.write() {
            hosts.insert(host.to_ascii_lowercase());
        }
    }

    pub fn contains(&self, host: &str) -> bool {
        self.hosts
            .read()
            .map(|hosts| hosts.contains(&host.to_ascii_lowercase()))
            .unwrap_or(false)
    }
}

/// Plain-HTTP [`Browser`]: one fetch, one snapshot.
pub struct HttpBrowser {
    http: reqwest::Client,
    blocklist: Arc<HostBlocklist>,
}

impl HttpBrowser {
    /// Build the browser with the shared host blocklist.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Internal`] if the HTTP client cannot be
    /// constructed.
    pub fn new(blocklist: Arc<HostBlocklist>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| GatewayError::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http, blocklist })
    }

    async fn fetch_snapshot(
        http: reqwest::Client,
        url: Url,
        opts: ScrapeOptions,
    ) -> Result<PageSnapshot> {
        let ua = opts.user_agent.as_deref().unwrap_or(FALLBACK_USER_AGENT);
        let response = http
            .get(url.clone())
            .header("Accept", "text/html,application/xhtml+xml,*/*")
            .header("User-Agent", ua)
            .send()
            .await
            .map_err(|e| GatewayError::Downstream(format!("fetch failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Downstream(format!(
                "target returned HTTP {status}"
            )));
        }

        let final_url = response.url().clone();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_owned();

        if content_type.contains("application/pdf") {
            return Ok(PageSnapshot {
                href: final_url.to_string(),
                is_pdf: true,
                ..Default::default()
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| GatewayError::Downstream(format!("failed to read body: {e}")))?;

        if content_type.contains("text/plain") {
            return Ok(PageSnapshot {
                href: final_url.to_string(),
                text: Some(body),
                ..Default::default()
            });
        }

        Ok(build_html_snapshot(&final_url, &body, opts.target_selector.as_deref()))
    }
}

#[async_trait]
impl Browser for HttpBrowser {
    async fn scrape(&self, url: Url, opts: ScrapeOptions) -> Result<SnapshotStream> {
        if let Some(host) = url.host_str() {
            if self.blocklist.contains(host) {
                return Err(GatewayError::ParamValidation(format!(
                    "refusing to scrape blocked host {host}"
                )));
            }
        }

        let (tx, rx) = mpsc::channel(4);
        let http = self.http.clone();
        tokio::spawn(async move {
            let item = Self::fetch_snapshot(http, url, opts).await;
            let _ = tx.send(item).await;
        });
        Ok(rx)
    }
}

/// Build a snapshot from fetched HTML: title, plain text, readability
/// extraction, image inventory, and DOM size measurements.
pub(crate) fn build_html_snapshot(
    url: &Url,
    html: &str,
    target_selector: Option<&str>,
) -> PageSnapshot {
    let document = Html::parse_document(html);
    let title = extract_title(&document);
    let (elem_count, max_elem_depth) = measure_dom(&document);

    let main = target_selector
        .and_then(|sel| select_first(&document, sel))
        .or_else(|| main_content_element(&document));
    let parsed_content = main.map(|el| el.html());
    let text = main
        .map(|el| collect_text(el))
        .filter(|t| !t.is_empty())
        .or_else(|| {
            select_first(&document, "body")
                .map(|el| collect_text(el))
                .filter(|t| !t.is_empty())
        });

    PageSnapshot {
        href: url.to_string(),
        title: (!title.is_empty()).then_some(title),
        html: Some(html.to_owned()),
        text,
        parsed: Some(ParsedContent {
            title: None,
            content: parsed_content,
            published_time: extract_published_time(&document),
        }),
        imgs: collect_images(&document),
        elem_count: Some(elem_count),
        max_elem_depth: Some(max_elem_depth),
        ..Default::default()
    }
}

/// Extract the `<title>` text, if any.
pub(crate) fn extract_title(document: &Html) -> String {
    let Ok(selector) = Selector::parse("title") else {
        return String::new();
    };
    document
        .select(&selector)
        .next()
        .map(|el| el.text().collect::<String>())
        .unwrap_or_default()
        .trim()
        .to_owned()
}

fn select_first<'a>(document: &'a Html, selector: &str) -> Option<ElementRef<'a>> {
    let parsed = Selector::parse(selector).ok()?;
    document.select(&parsed).next()
}

/// Find the main content element, trying content-specific selectors in
/// priority order.
fn main_content_element(document: &Html) -> Option<ElementRef<'_>> {
    for selector in ["article", "main", "[role=\"main\"]"] {
        if let Some(el) = select_first(document, selector) {
            let sample: String = el.text().take(50).collect();
            if sample.trim().len() >= 40 {
                return Some(el);
            }
        }
    }
    None
}

fn extract_published_time(document: &Html) -> Option<String> {
    let selector = Selector::parse(
        "meta[property=\"article:published_time\"], meta[name=\"article:published_time\"]",
    )
    .ok()?;
    document
        .select(&selector)
        .next()
        .and_then(|el| el.value().attr("content"))
        .map(str::to_owned)
}

fn collect_images(document: &Html) -> Vec<ImgBrief> {
    let Ok(selector) = Selector::parse("img[src]") else {
        return Vec::new();
    };
    document
        .select(&selector)
        .filter_map(|el| {
            let src = el.value().attr("src")?.trim();
            (!src.is_empty()).then(|| ImgBrief {
                src: src.to_owned(),
                alt: el.value().attr("alt").map(str::to_owned),
            })
        })
        .collect()
}

/// Recursively collect text, skipping non-content subtrees and separating
/// blocks with newlines.
fn collect_text(el: ElementRef<'_>) -> String {
    const SKIP: &[&str] = &["script", "style", "noscript", "svg", "iframe", "template"];
    const BLOCK: &[&str] = &[
        "p", "div", "br", "h1", "h2", "h3", "h4", "h5", "h6", "li", "tr", "section", "article",
        "blockquote", "pre",
    ];

    fn walk(el: ElementRef<'_>, buf: &mut String) {
        for child in el.children() {
            match child.value() {
                scraper::Node::Text(text) => buf.push_str(text),
                scraper::Node::Element(elem) => {
                    if SKIP.contains(&elem.name()) {
                        continue;
                    }
                    if BLOCK.contains(&elem.name()) {
                        buf.push('\n');
                    }
                    if let Some(child_el) = ElementRef::wrap(child) {
                        walk(child_el, buf);
                    }
                }
                _ => {}
            }
        }
    }

    let mut buf = String::new();
    walk(el, &mut buf);
    normalize_text(&buf)
}

/// Collapse space runs and 3+ newline runs.
fn normalize_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut prev_space = false;
    let mut newlines = 0u32;
    for ch in text.chars() {
        if ch == '\n' {
            newlines += 1;
            prev_space = false;
            if newlines <= 2 {
                out.push('\n');
            }
        } else if ch.is_whitespace() {
            newlines = 0;
            if !prev_space {
                out.push(' ');
                prev_space = true;
            }
        } else {
            newlines = 0;
            prev_space = false;
            out.push(ch);
        }
    }
    out.lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_owned()
}

/// Count elements and measure the deepest nesting in one pass.
fn measure_dom(document: &Html) -> (usize, usize) {
    fn walk(el: ElementRef<'_>, depth: usize, count: &mut usize, max_depth: &mut usize) {
        *count += 1;
        if depth > *max_depth {
            *max_depth = depth;
        }
        for child in el.children() {
            if let Some(child_el) = ElementRef::wrap(child) {
                walk(child_el, depth + 1, count, max_depth);
            }
        }
    }

    let mut count = 0;
    let mut max_depth = 0;
    walk(document.root_element(), 0, &mut count, &mut max_depth);
    (count, max_depth)
}
