//! # webgist
//!
//! A search-answering gateway for language-model consumers. Given a query
//! it asks an upstream SearXNG instance for candidate URLs, scrapes the
//! candidates concurrently, converts each page to Markdown, and returns
//! the best batch available by a deadline — returning immediately once
//! every slot is content-bearing. A direct "fetch one URL and render it"
//! mode is exposed alongside.
//!
//! ## Design
//!
//! - Upstream search responses are cached by query digest with a
//!   fresh/stale/expired lifecycle; a stale entry still answers when the
//!   upstream is down.
//! - Scrapes stream progressively better page snapshots; an aggregator
//!   fans N streams into slot-array emissions so partial batches can be
//!   rendered at any instant.
//! - HTML→Markdown conversion is an ordered rule list over the DOM, with
//!   graceful degradation to page text when markup defeats it.
//! - Everything request-scoped travels in an explicit [`types::RequestContext`];
//!   no per-request state lives in process globals.

pub mod aggregate;
pub mod assets;
pub mod browser;
pub mod cache;
pub mod config;
pub mod error;
pub mod format;
pub mod markdown;
pub mod pipeline;
pub mod searx;
pub mod server;
pub mod types;

pub use config::GatewayConfig;
pub use error::{GatewayError, Result};
pub use format::FormattedPage;
pub use pipeline::{CrawlPipeline, SearchBatch, SearchPipeline};
pub use types::{PageSnapshot, RequestContext, RespondMode, SearchQuery};
