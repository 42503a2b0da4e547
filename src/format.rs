//! Snapshot formatting: mode dispatch from a raw [`PageSnapshot`] to a
//! [`FormattedPage`].
//!
//! The markdown path runs the rewriter twice — once over the full document
//! and once over the readability-extracted content — and keeps the
//! extraction only when it carries enough of the page. Screenshot modes
//! persist image bytes into the asset store and expose them by URL.
//! Formatting degrades instead of failing: bad markup falls back to the
//! page text, then to an empty page.

use crate::assets::AssetStore;
use crate::error::Result;
use crate::markdown::{self, MarkdownOptions, MarkdownOutput};
use crate::types::{PageSnapshot, RequestContext, RespondMode};
use std::collections::BTreeMap;
use std::sync::Arc;

/// DOM nesting beyond which the markdown path degrades to page text.
const MAX_ELEM_DEPTH: usize = 256;

/// Element count beyond which the markdown path degrades to page text.
const MAX_ELEM_COUNT: usize = 70_000;

/// Readability extraction is kept when it yields at least this share of
/// the full-document conversion (numerator / denominator).
const EXTRACTION_MIN_RATIO: (usize, usize) = (3, 10);

/// A page rendered into its final, client-facing shape.
#[derive(Debug, Clone, Default)]
pub struct FormattedPage {
    pub title: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub content: Option<String>,
    pub published_time: Option<String>,
    pub html: Option<String>,
    pub text: Option<String>,
    pub screenshot_url: Option<String>,
    pub pageshot_url: Option<String>,
    /// `"Image i,j: alt" → src` summary, present only when requested.
    pub images: Option<BTreeMap<String, String>>,
    /// `anchor text → href` summary, present only when requested.
    pub links: Option<BTreeMap<String, String>>,
    /// Canonical string form; assembled by [`FormattedPage::render`].
    pub text_representation: Option<String>,
    /// The mode this page was formatted for; decides the string form.
    pub mode: RespondMode,
}

impl FormattedPage {
    /// A stub entry synthesized from upstream metadata when no snapshot
    /// is available for a slot.
    pub fn stub(
        url: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            url: Some(url.into()),
            title: Some(title.into()),
            description: Some(description.into()),
            ..Default::default()
        }
    }

    /// Whether this page counts as qualified for the search pipeline's
    /// quality gate: `(title AND content) OR screenshot OR pageshot OR
    /// text OR html` non-empty.
    pub fn is_qualified(&self) -> bool {
        let has = |field: &Option<String>| field.as_deref().is_some_and(|s| !s.is_empty());
        (has(&self.title) && has(&self.content))
            || has(&self.screenshot_url)
            || has(&self.pageshot_url)
            || has(&self.text)
            || has(&self.html)
    }

    /// The canonical string form. Markdown mode renders the bare content;
    /// every other mode renders the full header template.
    pub fn render(&self) -> String {
        if self.mode == RespondMode::Markdown {
            return self.content.clone().unwrap_or_default();
        }
        let mut out = String::new();
        out.push_str(&format!(
            "Title: {}\n\nURL Source: {}\n",
            self.title.as_deref().unwrap_or(""),
            self.url.as_deref().unwrap_or("")
        ));
        if let Some(ref published) = self.published_time {
            out.push_str(&format!("\nPublished Time: {published}\n"));
        }
        let body = self
            .text_representation
            .as_deref()
            .or(self.content.as_deref())
            .unwrap_or("");
        out.push_str(&format!("\nMarkdown Content:\n{body}\n"));
        self.push_summary_blocks(&mut out);
        out
    }

    /// The per-slot string form used in search batches, with a 1-based
    /// slot prefix on every header line.
    pub fn render_indexed(&self, index: usize) -> String {
        let title = self.title.as_deref().unwrap_or("");
        let url = self.url.as_deref().unwrap_or("");

        if let Some(content) = self.content.as_deref().filter(|c| !c.is_empty()) {
            let mut out = format!("[{index}] Title: {title}\n[{index}] URL Source: {url}\n");
            if let Some(ref published) = self.published_time {
                out.push_str(&format!("[{index}] Published Time: {published}\n"));
            }
            out.push_str(&format!("[{index}] Markdown Content:\n{content}"));
            return out;
        }

        if let Some(description) = self.description.as_deref().filter(|d| !d.is_empty()) {
            let mut out = format!(
                "[{index}] Title: {title}\n[{index}] URL Source: {url}\n[{index}] Description: {description}"
            );
            if let Some(tr) = self.text_representation.as_deref().filter(|t| !t.is_empty()) {
                out.push_str(&format!("\n[{index}] Content:\n{tr}"));
            }
            return out;
        }

        if let Some(tr) = self.text_representation.as_deref().filter(|t| !t.is_empty()) {
            return format!("[{index}] URL Source: {url}\n[{index}] Content:\n{tr}");
        }

        format!("[{index}] No content available for {url}")
    }

    fn push_summary_blocks(&self, out: &mut String) {
        if let Some(ref images) = self.images {
            if !images.is_empty() {
                out.push_str("\nImages:\n");
                for (label, src) in images {
                    out.push_str(&format!("- {label}: {src}\n"));
                }
            }
        }
        if let Some(ref links) = self.links {
            if !links.is_empty() {
                out.push_str("\nLinks/Buttons:\n");
                for (text, href) in links {
                    out.push_str(&format!("- [{text}]({href})\n"));
                }
            }
        }
    }
}

/// Mode-dispatched snapshot formatter.
pub struct Formatter {
    assets: Arc<AssetStore>,
}

impl Formatter {
    pub fn new(assets: Arc<AssetStore>) -> Self {
        Self { assets }
    }

    /// Render a snapshot into a [`FormattedPage`] according to
    /// `ctx.mode`, persisting screenshot bytes when needed.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::GatewayError::Internal`] only when a
    /// screenshot asset cannot be persisted; the markdown path never
    /// fails.
    pub async fn format(
        &self,
        ctx: &RequestContext,
        snapshot: &PageSnapshot,
        nominal_url: Option<&str>,
    ) -> Result<FormattedPage> {
        let url = nominal_url.unwrap_or(&snapshot.href).to_owned();
        match ctx.mode {
            RespondMode::Screenshot => {
                let mut page = FormattedPage {
                    url: Some(url),
                    title: snapshot.title.clone(),
                    mode: ctx.mode,
                    ..Default::default()
                };
                if let Some(ref bytes) = snapshot.screenshot {
                    let file = self.assets.save_png("screenshot", bytes).await?;
                    let asset_url = self.assets.public_url(&ctx.host, &file);
                    page.text_representation = Some(format!("{asset_url}\n"));
                    page.screenshot_url = Some(asset_url);
                }
                Ok(page)
            }
            RespondMode::Pageshot => {
                let mut page = FormattedPage {
                    url: Some(url),
                    title: snapshot.title.clone(),
                    html: snapshot.html.clone(),
                    mode: ctx.mode,
                    ..Default::default()
                };
                if let Some(ref bytes) = snapshot.pageshot {
                    let file = self.assets.save_png("pageshot", bytes).await?;
                    let asset_url = self.assets.public_url(&ctx.host, &file);
                    page.text_representation = Some(format!("{asset_url}\n"));
                    page.pageshot_url = Some(asset_url);
                }
                Ok(page)
            }
            RespondMode::Html => Ok(FormattedPage {
                url: Some(url),
                title: snapshot.title.clone(),
                text_representation: snapshot.html.clone(),
                html: snapshot.html.clone(),
                mode: ctx.mode,
                ..Default::default()
            }),
            RespondMode::Text => Ok(FormattedPage {
                url: Some(url),
                title: snapshot.title.clone(),
                text_representation: snapshot.text.clone(),
                text: snapshot.text.clone(),
                mode: ctx.mode,
                ..Default::default()
            }),
            RespondMode::Markdown => Ok(self.format_markdown(ctx, snapshot, url)),
        }
    }

    fn format_markdown(
        &self,
        ctx: &RequestContext,
        snapshot: &PageSnapshot,
        url: String,
    ) -> FormattedPage {
        let parsed = snapshot.parsed.as_ref();
        let title = parsed
            .and_then(|p| p.title.clone())
            .or_else(|| snapshot.title.clone())
            .unwrap_or_default();

        let opts = MarkdownOptions {
            no_rules: false,
            base_url: snapshot.base_url(),
            img_data_url_to_object_url: ctx.with_generated_alt,
        };

        let oversized = snapshot.max_elem_depth.is_some_and(|d| d > MAX_ELEM_DEPTH)
            || snapshot.elem_count.is_some_and(|c| c > MAX_ELEM_COUNT);

        let conversion: MarkdownOutput = if snapshot.is_pdf {
            MarkdownOutput {
                markdown: parsed
                    .and_then(|p| p.content.clone())
                    .or_else(|| snapshot.text.clone())
                    .unwrap_or_default(),
                ..Default::default()
            }
        } else if oversized {
            tracing::debug!(
                href = %snapshot.href,
                depth = ?snapshot.max_elem_depth,
                elems = ?snapshot.elem_count,
                "DOM too large, degrading to page text"
            );
            MarkdownOutput {
                markdown: snapshot.text.clone().unwrap_or_default(),
                ..Default::default()
            }
        } else if let Some(ref html) = snapshot.html {
            self.convert_html(html, parsed.and_then(|p| p.content.as_deref()), &opts, snapshot)
        } else {
            MarkdownOutput {
                markdown: snapshot.text.clone().unwrap_or_default(),
                ..Default::default()
            }
        };

        let mut page = FormattedPage {
            title: (!title.is_empty()).then_some(title),
            url: Some(url),
            content: Some(conversion.markdown.clone()),
            published_time: parsed.and_then(|p| p.published_time.clone()),
            mode: ctx.mode,
            ..Default::default()
        };
        if ctx.with_images_summary {
            page.images = Some(image_summary(&conversion));
        }
        if ctx.with_links_summary {
            page.links = Some(link_summary(&conversion));
        }
        page.text_representation = Some(page.render_markdown_template());
        page
    }

    /// The two-pass conversion: full document vs readability extraction,
    /// then the raw-HTML and page-text fallbacks.
    fn convert_html(
        &self,
        html: &str,
        parsed_content: Option<&str>,
        opts: &MarkdownOptions,
        snapshot: &PageSnapshot,
    ) -> MarkdownOutput {
        let par1 = markdown::to_markdown(html, opts);

        let chosen = match parsed_content {
            Some(extract) => {
                let par2 = markdown::to_markdown(extract, opts);
                let (num, den) = EXTRACTION_MIN_RATIO;
                if par2.markdown.len() * den >= par1.markdown.len() * num {
                    // Extraction carried enough of the page: convert the
                    // clean subtree without the cleanup rules.
                    let clean_opts = MarkdownOptions {
                        no_rules: true,
                        ..opts.clone()
                    };
                    markdown::to_markdown(extract, &clean_opts)
                } else {
                    par1
                }
            }
            None => par1,
        };

        if chosen.markdown.is_empty() || looks_like_html(&chosen.markdown) {
            let retry = markdown::to_markdown(html, opts);
            if retry.markdown.is_empty() || looks_like_html(&retry.markdown) {
                return MarkdownOutput {
                    markdown: snapshot.text.clone().unwrap_or_default(),
                    ..Default::default()
                };
            }
            return retry;
        }
        chosen
    }
}

impl FormattedPage {
    /// The header template used as the markdown-path string form when the
    /// page is rendered standalone.
    fn render_markdown_template(&self) -> String {
        let mut out = format!(
            "Title: {}\n\nURL Source: {}\n",
            self.title.as_deref().unwrap_or(""),
            self.url.as_deref().unwrap_or("")
        );
        if let Some(ref published) = self.published_time {
            out.push_str(&format!("\nPublished Time: {published}\n"));
        }
        out.push_str(&format!(
            "\nMarkdown Content:\n{}\n",
            self.content.as_deref().unwrap_or("")
        ));
        self.push_summary_blocks(&mut out);
        out
    }
}

/// A conversion result that still looks like raw markup rather than text.
fn looks_like_html(content: &str) -> bool {
    let trimmed = content.trim();
    trimmed.starts_with('<') && trimmed.ends_with('>')
}

/// Build the `"Image i,j: alt" → src` map from conversion occurrences.
fn image_summary(output: &MarkdownOutput) -> BTreeMap<String, String> {
    let mut by_src: Vec<(String, Vec<usize>, String)> = Vec::new();
    for img in &output.images {
        match by_src.iter_mut().find(|(src, _, _)| *src == img.src) {
            Some((_, positions, _)) => positions.push(img.index),
            None => by_src.push((img.src.clone(), vec![img.index], img.alt.clone())),
        }
    }
    by_src
        .into_iter()
        .map(|(src, positions, alt)| {
            let joined = positions
                .iter()
                .map(usize::to_string)
                .collect::<Vec<_>>()
                .join(",");
            let label = if alt.is_empty() {
                format!("Image {joined}")
            } else {
                format!("Image {joined}: {alt}")
            };
            (label, src)
        })
        .collect()
}

/// Build the `anchor text → href` map; later duplicates overwrite.
fn link_summary(output: &MarkdownOutput) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    for link in &output.links {
        if !link.text.is_empty() {
            map.insert(link.text.clone(), link.href.clone());
        }
    }
    map
}
