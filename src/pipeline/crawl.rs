//! The crawl pipeline: fetch one URL, wait for a usable snapshot, format.
//!
//! Targets are validated before any scrape starts: only http, https, and
//! file URLs are accepted, and domain hosts must end in a plausible TLD
//! (last label at least two characters; IP hosts are exempt). Snapshots
//! are consumed until one is content-bearing; if the stream ends first,
//! the last snapshot is formatted as-is. DNS failures and TLD rejections
//! raised mid-scrape are turned into an error page and formatted through
//! the normal path so callers always get a readable body.

use crate::browser::{Browser, HostBlocklist, ScrapeOptions};
use crate::error::{GatewayError, Result};
use crate::format::{FormattedPage, Formatter};
use crate::types::{PageSnapshot, RequestContext};
use scraper::Html;
use std::sync::Arc;
use url::Url;

/// Orchestrates a single-URL scrape and its formatting.
pub struct CrawlPipeline {
    browser: Arc<dyn Browser>,
    formatter: Arc<Formatter>,
    blocklist: Arc<HostBlocklist>,
}

impl CrawlPipeline {
    pub fn new(
        browser: Arc<dyn Browser>,
        formatter: Arc<Formatter>,
        blocklist: Arc<HostBlocklist>,
    ) -> Self {
        Self {
            browser,
            formatter,
            blocklist,
        }
    }

    /// Crawl `raw_url` and return the formatted page.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::ParamValidation`] for malformed URLs, bad
    ///   protocols, or bad TLDs (no scrape is started).
    /// - [`GatewayError::NoContent`] when the scrape produced nothing.
    /// - [`GatewayError::Downstream`] for unrecoverable scrape failures.
    pub async fn run(&self, raw_url: &str, ctx: &RequestContext) -> Result<FormattedPage> {
        let url = validate_target(raw_url)?;

        // Whatever name this request reached us by must never be crawled,
        // or a result pointing back at the gateway would recurse.
        self.blocklist.add(host_without_port(&ctx.host));

        let mut stream = match self
            .browser
            .scrape(url.clone(), ScrapeOptions::from(ctx))
            .await
        {
            Ok(stream) => stream,
            Err(err) if is_resolution_failure(&err) => {
                return self.format_error_page(ctx, &url, &err).await;
            }
            Err(err) => return Err(err),
        };

        let mut last: Option<PageSnapshot> = None;
        while let Some(item) = stream.recv().await {
            let snapshot = match item {
                Ok(snapshot) => snapshot,
                Err(err) if is_resolution_failure(&err) => {
                    return self.format_error_page(ctx, &url, &err).await;
                }
                Err(err) => {
                    tracing::warn!(url = %url, error = %err, "scrape error, waiting for a later snapshot");
                    continue;
                }
            };

            if !is_content_bearing(&snapshot, ctx) {
                last = Some(snapshot);
                continue;
            }
            return self.formatter.format(ctx, &snapshot, Some(url.as_str())).await;
        }

        match last {
            Some(snapshot) => self.formatter.format(ctx, &snapshot, Some(url.as_str())).await,
            None => Err(GatewayError::NoContent(format!(
                "no snapshot produced for {url}"
            ))),
        }
    }

    /// Format HTML supplied by the caller directly, without scraping.
    pub async fn run_with_html(
        &self,
        raw_url: &str,
        html: String,
        ctx: &RequestContext,
    ) -> Result<FormattedPage> {
        let url = validate_target(raw_url)?;
        let title = {
            let document = Html::parse_document(&html);
            crate::browser::extract_title(&document)
        };
        let snapshot = PageSnapshot {
            href: url.to_string(),
            title: (!title.is_empty()).then_some(title),
            html: Some(html),
            ..Default::default()
        };
        self.formatter.format(ctx, &snapshot, Some(url.as_str())).await
    }

    async fn format_error_page(
        &self,
        ctx: &RequestContext,
        url: &Url,
        err: &GatewayError,
    ) -> Result<FormattedPage> {
        tracing::warn!(url = %url, error = %err, "synthesizing error page");
        let snapshot = PageSnapshot {
            href: url.to_string(),
            title: Some("Error".into()),
            text: Some(err.to_string()),
            ..Default::default()
        };
        self.formatter.format(ctx, &snapshot, Some(url.as_str())).await
    }
}

/// Whether a snapshot carries enough to respond with. Snapshots are
/// skipped while a wait-for-selector is pending, and while neither the
/// readability extraction nor the title have materialized (PDFs are
/// exempt: their content arrives pre-extracted).
fn is_content_bearing(snapshot: &PageSnapshot, ctx: &RequestContext) -> bool {
    if ctx.wait_for_selector.is_some() {
        return false;
    }
    if snapshot.is_pdf {
        return true;
    }
    let has_parsed_content = snapshot
        .parsed
        .as_ref()
        .and_then(|p| p.content.as_deref())
        .is_some_and(|c| !c.is_empty());
    let has_title = snapshot.title.as_deref().is_some_and(|t| !t.is_empty());
    has_parsed_content || has_title
}

/// The hostname part of a `Host` header value: port stripped, IPv6
/// brackets kept (matching what `Url::host_str` reports for targets).
fn host_without_port(host: &str) -> &str {
    if let Some(end) = host.rfind(']') {
        return &host[..=end];
    }
    host.split(':').next().unwrap_or(host)
}

/// Parse and validate a crawl target.
pub fn validate_target(raw_url: &str) -> Result<Url> {
    let trimmed = raw_url.trim();
    if trimmed.is_empty() {
        return Err(GatewayError::ParamValidation("Invalid URL or TLD".into()));
    }
    let url = Url::parse(trimmed)
        .map_err(|_| GatewayError::ParamValidation("Invalid URL or TLD".into()))?;

    match url.scheme() {
        "http" | "https" | "file" => {}
        _ => return Err(GatewayError::ParamValidation("Invalid URL or TLD".into())),
    }

    if let Some(url::Host::Domain(domain)) = url.host() {
        let last_label = domain.rsplit('.').next().unwrap_or("");
        if last_label.len() < 2 {
            return Err(GatewayError::ParamValidation("Invalid URL or TLD".into()));
        }
    }
    Ok(url)
}

/// DNS failures and TLD assertions are surfaced as formatted error pages
/// rather than bare 5xx responses.
fn is_resolution_failure(err: &GatewayError) -> bool {
    let message = err.to_string().to_ascii_lowercase();
    message.contains("invalid tld")
        || message.contains("dns")
        || message.contains("name or service not known")
        || message.contains("failed to lookup")
}
