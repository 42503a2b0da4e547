//! HTML→Markdown rewriting with ordered, configurable rules.
//!
//! The rewriter walks a parsed DOM and converts it to Markdown. A fixed,
//! ordered rule list decides how special elements render (first matching
//! rule wins per element); everything else falls through to a standard
//! block/inline conversion. Cleanup rules (dropping non-content elements,
//! svg subtrees, `<title>` promotion) can be disabled with
//! [`MarkdownOptions::no_rules`] — the content rules (paragraphs, inline
//! links, code, images) always apply.
//!
//! If the primary run fails (pathologically deep markup), the conversion
//! is retried without the table plugin; if that also fails the result is
//! empty rather than an error.

mod rules;
mod tables;

pub use rules::Rule;

use scraper::Html;
use url::Url;

/// Options controlling a single conversion run.
#[derive(Debug, Clone, Default)]
pub struct MarkdownOptions {
    /// Disable the cleanup rules (remove-irrelevant, truncate-svg,
    /// title-as-h1). Content rules still apply.
    pub no_rules: bool,
    /// Base URL against which relative links and image sources resolve.
    pub base_url: Option<Url>,
    /// Rewrite `data:` image sources to deterministic pseudo object URLs
    /// (`blob:{origin}/{md5-hex}`).
    pub img_data_url_to_object_url: bool,
}

/// One image emitted during conversion, in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageOccurrence {
    /// 1-based position of the image in the document.
    pub index: usize,
    pub alt: String,
    /// Resolved source URL.
    pub src: String,
}

/// One inline link emitted during conversion, in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkOccurrence {
    /// Collapsed anchor text.
    pub text: String,
    /// Resolved target URL.
    pub href: String,
}

/// The result of a conversion run: the Markdown text plus the images and
/// links observed along the way (for the formatter's summary mixins).
#[derive(Debug, Clone, Default)]
pub struct MarkdownOutput {
    pub markdown: String,
    pub images: Vec<ImageOccurrence>,
    pub links: Vec<LinkOccurrence>,
}

/// Convert an HTML document or fragment to Markdown.
///
/// Never fails: the fallback ladder runs the full rule chain first, then a
/// plain conversion without the table plugin, and finally returns an empty
/// output.
pub fn to_markdown(html: &str, opts: &MarkdownOptions) -> MarkdownOutput {
    let document = Html::parse_document(html);

    match rules::convert(&document, opts, true) {
        Ok(output) => finalize(output),
        Err(err) => {
            tracing::debug!(error = %err, "markdown conversion failed, retrying without plugins");
            match rules::convert(&document, opts, false) {
                Ok(output) => finalize(output),
                Err(err) => {
                    tracing::warn!(error = %err, "markdown fallback conversion failed");
                    MarkdownOutput::default()
                }
            }
        }
    }
}

/// Collapse runs of 3+ newlines to exactly two and trim the edges.
fn finalize(mut output: MarkdownOutput) -> MarkdownOutput {
    output.markdown = collapse_blank_runs(output.markdown.trim());
    output
}

pub(crate) fn collapse_blank_runs(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut newlines = 0u32;
    for ch in text.chars() {
        if ch == '\n' {
            newlines += 1;
            if newlines <= 2 {
                result.push('\n');
            }
        } else {
            newlines = 0;
            result.push(ch);
        }
    }
    result
}
