//! The ordered rewrite rules and the DOM walker that applies them.
//!
//! Rule order is significant: the first rule whose predicate matches an
//! element renders it; elements matching no rule fall through to the
//! standard block/inline conversion. Cleanup rules (the first three) are
//! skipped when [`MarkdownOptions::no_rules`] is set; content rules apply
//! regardless.

use super::tables;
use super::{ImageOccurrence, LinkOccurrence, MarkdownOptions, MarkdownOutput};
use md5::{Digest, Md5};
use scraper::node::Node;
use scraper::{ElementRef, Html};
use std::fmt;

/// Hard ceiling on DOM nesting before the walker gives up.
const MAX_DEPTH: usize = 512;

/// Elements dropped entirely by [`Rule::RemoveIrrelevant`].
const IRRELEVANT_TAGS: &[&str] = &[
    "meta", "style", "script", "noscript", "link", "textarea", "select",
];

/// Block-level elements rendered as paragraph-like groups by the default
/// conversion.
const BLOCK_TAGS: &[&str] = &[
    "div", "section", "article", "main", "aside", "header", "footer", "nav", "figure",
    "figcaption", "details", "summary", "form", "fieldset", "address",
];

/// Conversion failed; the caller retries without plugins or gives up.
#[derive(Debug)]
pub struct RewriteError {
    depth: usize,
}

impl fmt::Display for RewriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "markup nesting exceeds {} levels", self.depth)
    }
}

impl std::error::Error for RewriteError {}

/// The ordered rewrite rules. First match wins per element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    /// Drop `<meta>`, `<style>`, `<script>`, `<noscript>`, `<link>`,
    /// `<textarea>`, `<select>` subtrees.
    RemoveIrrelevant,
    /// Drop `<svg>` subtrees.
    TruncateSvg,
    /// Render `<title>` as a setext H1.
    TitleAsH1,
    /// Rewrite `data:` image sources to `blob:{origin}/{md5-hex}`.
    DataUrlToObjectUrl,
    /// `<p>` renders as trimmed converted content with blank runs collapsed.
    ImprovedParagraph,
    /// `<a href>` renders as an inlined Markdown link.
    ImprovedInlineLink,
    /// Inline `<code>` renders backtick-fenced with run escaping.
    ImprovedCode,
    /// `<img>` renders as `![Image N: alt](src)` with a per-document counter.
    ImgGeneratedAlt,
    /// `<table>` renders as a GFM pipe table.
    GfmTable,
}

impl Rule {
    /// All rules in application order.
    pub const ORDERED: &'static [Rule] = &[
        Rule::RemoveIrrelevant,
        Rule::TruncateSvg,
        Rule::TitleAsH1,
        Rule::DataUrlToObjectUrl,
        Rule::ImprovedParagraph,
        Rule::ImprovedInlineLink,
        Rule::ImprovedCode,
        Rule::ImgGeneratedAlt,
        Rule::GfmTable,
    ];

    /// Whether this rule still applies when `no_rules` is set.
    pub fn survives_no_rules(self) -> bool {
        !matches!(
            self,
            Rule::RemoveIrrelevant | Rule::TruncateSvg | Rule::TitleAsH1
        )
    }

    /// Predicate: does this rule render the given element?
    pub fn matches(self, el: ElementRef<'_>, opts: &MarkdownOptions, tables: bool) -> bool {
        let tag = el.value().name();
        match self {
            Rule::RemoveIrrelevant => IRRELEVANT_TAGS.contains(&tag),
            Rule::TruncateSvg => tag == "svg",
            Rule::TitleAsH1 => tag == "title",
            Rule::DataUrlToObjectUrl => {
                tag == "img"
                    && opts.img_data_url_to_object_url
                    && el
                        .value()
                        .attr("src")
                        .is_some_and(|src| src.starts_with("data:"))
            }
            Rule::ImprovedParagraph => tag == "p",
            Rule::ImprovedInlineLink => tag == "a" && el.value().attr("href").is_some(),
            Rule::ImprovedCode => tag == "code" && !is_sole_child_of_pre(el),
            Rule::ImgGeneratedAlt => tag == "img",
            Rule::GfmTable => tag == "table" && tables,
        }
    }
}

/// Children that carry content: elements and non-whitespace text nodes.
fn significant_children(el: ElementRef<'_>) -> usize {
    el.children()
        .filter(|child| match child.value() {
            Node::Element(_) => true,
            Node::Text(text) => !text.trim().is_empty(),
            _ => false,
        })
        .count()
}

/// Whether `el` is the only content-bearing child of a `<pre>` parent —
/// the one arrangement that renders as a fenced block instead of inline
/// code.
fn is_sole_child_of_pre(el: ElementRef<'_>) -> bool {
    let Some(parent) = el.parent().and_then(ElementRef::wrap) else {
        return false;
    };
    parent.value().name() == "pre" && significant_children(parent) == 1
}

/// Run the walker over a parsed document.
pub(super) fn convert(
    document: &Html,
    opts: &MarkdownOptions,
    tables: bool,
) -> Result<MarkdownOutput, RewriteError> {
    let mut walker = Walker {
        opts,
        tables,
        image_counter: 0,
        images: Vec::new(),
        links: Vec::new(),
    };
    let mut buf = String::new();
    walker.walk_children(document.root_element(), &mut buf, &Flow::default(), 0)?;
    Ok(MarkdownOutput {
        markdown: buf,
        images: walker.images,
        links: walker.links,
    })
}

/// Inline flow state threaded through the walk.
#[derive(Debug, Clone, Copy, Default)]
struct Flow {
    list_depth: usize,
}

struct Walker<'o> {
    opts: &'o MarkdownOptions,
    tables: bool,
    image_counter: usize,
    images: Vec<ImageOccurrence>,
    links: Vec<LinkOccurrence>,
}

impl Walker<'_> {
    fn walk_children(
        &mut self,
        el: ElementRef<'_>,
        buf: &mut String,
        flow: &Flow,
        depth: usize,
    ) -> Result<(), RewriteError> {
        if depth > MAX_DEPTH {
            return Err(RewriteError { depth: MAX_DEPTH });
        }
        for child in el.children() {
            match child.value() {
                Node::Text(text) => push_text(buf, text),
                Node::Element(_) => {
                    let Some(child_el) = ElementRef::wrap(child) else {
                        continue;
                    };
                    self.element(child_el, buf, flow, depth + 1)?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn element(
        &mut self,
        el: ElementRef<'_>,
        buf: &mut String,
        flow: &Flow,
        depth: usize,
    ) -> Result<(), RewriteError> {
        for &rule in Rule::ORDERED {
            if self.opts.no_rules && !rule.survives_no_rules() {
                continue;
            }
            if rule.matches(el, self.opts, self.tables) {
                return self.apply(rule, el, buf, flow, depth);
            }
        }
        self.default_element(el, buf, flow, depth)
    }

    fn apply(
        &mut self,
        rule: Rule,
        el: ElementRef<'_>,
        buf: &mut String,
        flow: &Flow,
        depth: usize,
    ) -> Result<(), RewriteError> {
        match rule {
            Rule::RemoveIrrelevant | Rule::TruncateSvg => Ok(()),
            Rule::TitleAsH1 => {
                let text = collapse_inline(&el.text().collect::<String>());
                if !text.is_empty() {
                    ensure_blank_line(buf);
                    buf.push_str(&text);
                    buf.push_str("\n===============\n");
                }
                Ok(())
            }
            Rule::DataUrlToObjectUrl => {
                self.emit_image(el, buf, true);
                Ok(())
            }
            Rule::ImprovedParagraph => {
                let inner = self.capture(el, flow, depth)?;
                let body = super::collapse_blank_runs(inner.trim());
                if !body.is_empty() {
                    ensure_blank_line(buf);
                    buf.push_str(&body);
                    buf.push_str("\n\n");
                }
                Ok(())
            }
            Rule::ImprovedInlineLink => {
                let inner = self.capture(el, flow, depth)?;
                let text = collapse_inline(&inner);
                let href = self.resolve(el.value().attr("href").unwrap_or(""));
                let escaped_href = href.replace('(', "\\(").replace(')', "\\)");
                self.links.push(LinkOccurrence {
                    text: text.clone(),
                    href,
                });
                buf.push('[');
                buf.push_str(&text);
                buf.push_str("](");
                buf.push_str(&escaped_href);
                if let Some(title) = el.value().attr("title") {
                    buf.push_str(" \"");
                    buf.push_str(&title.replace('"', "\\\""));
                    buf.push('"');
                }
                buf.push(')');
                Ok(())
            }
            Rule::ImprovedCode => {
                let content: String = el.text().collect();
                buf.push_str(&render_inline_code(&content));
                Ok(())
            }
            Rule::ImgGeneratedAlt => {
                self.emit_image(el, buf, false);
                Ok(())
            }
            Rule::GfmTable => {
                ensure_blank_line(buf);
                tables::render(el, buf);
                buf.push('\n');
                Ok(())
            }
        }
    }

    fn default_element(
        &mut self,
        el: ElementRef<'_>,
        buf: &mut String,
        flow: &Flow,
        depth: usize,
    ) -> Result<(), RewriteError> {
        let tag = el.value().name();
        match tag {
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                let level = tag[1..].parse::<usize>().unwrap_or(1);
                let inner = self.capture(el, flow, depth)?;
                let text = collapse_inline(&inner);
                if !text.is_empty() {
                    ensure_blank_line(buf);
                    buf.push_str(&"#".repeat(level));
                    buf.push(' ');
                    buf.push_str(&text);
                    buf.push_str("\n\n");
                }
                Ok(())
            }
            "strong" | "b" => self.wrap_inline(el, buf, flow, depth, "**"),
            "em" | "i" => self.wrap_inline(el, buf, flow, depth, "*"),
            "br" => {
                buf.push('\n');
                Ok(())
            }
            "hr" => {
                ensure_blank_line(buf);
                buf.push_str("---\n\n");
                Ok(())
            }
            "pre" => {
                // A pre holding a single code child (or bare text) is a
                // fenced block; mixed content converts child by child so
                // each code element gets its inline rendering.
                if significant_children(el) > 1 {
                    return self.walk_children(el, buf, flow, depth);
                }
                let content: String = el.text().collect();
                let lang = code_language(el).unwrap_or_default();
                ensure_blank_line(buf);
                buf.push_str("```");
                buf.push_str(&lang);
                buf.push('\n');
                buf.push_str(content.trim_end_matches('\n'));
                buf.push_str("\n```\n\n");
                Ok(())
            }
            "ul" | "ol" => self.render_list(el, buf, flow, depth, tag == "ol"),
            "blockquote" => {
                let inner = self.capture(el, flow, depth)?;
                let body = super::collapse_blank_runs(inner.trim());
                if !body.is_empty() {
                    ensure_blank_line(buf);
                    for line in body.lines() {
                        buf.push_str("> ");
                        buf.push_str(line);
                        buf.push('\n');
                    }
                    buf.push('\n');
                }
                Ok(())
            }
            t if BLOCK_TAGS.contains(&t) => {
                ensure_blank_line(buf);
                self.walk_children(el, buf, flow, depth)?;
                if !buf.is_empty() && !buf.ends_with("\n\n") {
                    if !buf.ends_with('\n') {
                        buf.push('\n');
                    }
                    buf.push('\n');
                }
                Ok(())
            }
            // html/head/body and unknown inline elements are transparent.
            _ => self.walk_children(el, buf, flow, depth),
        }
    }

    fn wrap_inline(
        &mut self,
        el: ElementRef<'_>,
        buf: &mut String,
        flow: &Flow,
        depth: usize,
        marker: &str,
    ) -> Result<(), RewriteError> {
        let inner = self.capture(el, flow, depth)?;
        let text = collapse_inline(&inner);
        if !text.is_empty() {
            buf.push_str(marker);
            buf.push_str(&text);
            buf.push_str(marker);
        }
        Ok(())
    }

    fn render_list(
        &mut self,
        el: ElementRef<'_>,
        buf: &mut String,
        flow: &Flow,
        depth: usize,
        ordered: bool,
    ) -> Result<(), RewriteError> {
        ensure_blank_line(buf);
        let item_flow = Flow {
            list_depth: flow.list_depth + 1,
            ..*flow
        };
        let indent = "  ".repeat(flow.list_depth);
        let mut n = 0usize;
        for child in el.children() {
            let Some(item) = ElementRef::wrap(child) else {
                continue;
            };
            if item.value().name() != "li" {
                continue;
            }
            n += 1;
            let inner = self.capture(item, &item_flow, depth)?;
            let body = super::collapse_blank_runs(inner.trim());
            if ordered {
                buf.push_str(&format!("{indent}{n}. "));
            } else {
                buf.push_str(&format!("{indent}- "));
            }
            buf.push_str(&body);
            buf.push('\n');
        }
        buf.push('\n');
        Ok(())
    }

    /// Convert an element's children into a fresh buffer, sharing the
    /// walker's counters and summaries.
    fn capture(
        &mut self,
        el: ElementRef<'_>,
        flow: &Flow,
        depth: usize,
    ) -> Result<String, RewriteError> {
        let mut tmp = String::new();
        self.walk_children(el, &mut tmp, flow, depth)?;
        Ok(tmp)
    }

    fn emit_image(&mut self, el: ElementRef<'_>, buf: &mut String, data_rewrite: bool) {
        let mut src = el.value().attr("src").unwrap_or("").trim().to_owned();
        if src.is_empty() {
            if let Some(data_src) = el.value().attr("data-src") {
                if !data_src.starts_with("data:") {
                    src = data_src.trim().to_owned();
                }
            }
        }
        if src.is_empty() {
            return;
        }

        if data_rewrite {
            let origin = self
                .opts
                .base_url
                .as_ref()
                .map(|u| u.origin().ascii_serialization())
                .unwrap_or_default();
            src = format!("blob:{origin}/{:x}", Md5::digest(src.as_bytes()));
        } else if !src.starts_with("data:") {
            src = self.resolve(&src);
        }

        self.image_counter += 1;
        let alt = collapse_inline(el.value().attr("alt").unwrap_or(""));
        self.images.push(ImageOccurrence {
            index: self.image_counter,
            alt: alt.clone(),
            src: src.clone(),
        });
        buf.push_str(&format!("![Image {}: {alt}]({src})", self.image_counter));
    }

    /// Resolve a reference against the configured base URL. Without a
    /// base, the raw value is kept as written.
    fn resolve(&self, href: &str) -> String {
        match self.opts.base_url {
            Some(ref base) => base
                .join(href)
                .map(|u| u.to_string())
                .unwrap_or_else(|_| href.to_owned()),
            None => href.to_owned(),
        }
    }
}

/// Inline `<code>` rendering: enough backticks to escape any inner run,
/// triple-backtick fencing when the content spans lines, and padding
/// spaces when the content starts or ends with a backtick.
fn render_inline_code(content: &str) -> String {
    if content.contains('\n') {
        return format!("```\n{}\n```", content.trim_end_matches('\n'));
    }
    let longest_run = content
        .split(|c| c != '`')
        .map(str::len)
        .max()
        .unwrap_or(0);
    let fence = "`".repeat(longest_run + 1);
    if content.starts_with('`') || content.ends_with('`') {
        format!("{fence} {content} {fence}")
    } else {
        format!("{fence}{content}{fence}")
    }
}

/// Language hint from a `<pre>`'s nested `<code class="language-…">`.
fn code_language(pre: ElementRef<'_>) -> Option<String> {
    for child in pre.children() {
        let Some(code) = ElementRef::wrap(child) else {
            continue;
        };
        if code.value().name() != "code" {
            continue;
        }
        let class = code.value().attr("class")?;
        return class
            .split_whitespace()
            .find(|c| c.starts_with("language-") || c.starts_with("lang-"))
            .map(|c| {
                c.trim_start_matches("language-")
                    .trim_start_matches("lang-")
                    .to_owned()
            });
    }
    None
}

/// Append a text node, collapsing whitespace runs while preserving word
/// boundaries against the existing buffer. `<pre>` content never reaches
/// this path; its raw text is taken wholesale by the block handler.
fn push_text(buf: &mut String, text: &str) {
    let mut collapsed = String::with_capacity(text.len());
    let mut prev_space = false;
    for ch in text.chars() {
        if ch.is_whitespace() {
            if !prev_space {
                collapsed.push(' ');
                prev_space = true;
            }
        } else {
            collapsed.push(ch);
            prev_space = false;
        }
    }
    if collapsed.is_empty() {
        return;
    }
    // Drop a leading space at the start of a block.
    if collapsed.starts_with(' ')
        && (buf.is_empty() || buf.ends_with('\n') || buf.ends_with(' '))
    {
        collapsed.remove(0);
    }
    buf.push_str(&collapsed);
}

/// Collapse all whitespace runs to single spaces and trim.
fn collapse_inline(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Ensure the buffer ends with a blank line before a new block starts.
fn ensure_blank_line(buf: &mut String) {
    if buf.is_empty() {
        return;
    }
    if !buf.ends_with('\n') {
        buf.push('\n');
    }
    if !buf.ends_with("\n\n") {
        buf.push('\n');
    }
}
