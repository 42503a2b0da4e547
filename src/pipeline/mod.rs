//! The two request pipelines: search-fetch-render and single-URL crawl.

pub mod crawl;
pub mod search;

pub use crawl::CrawlPipeline;
pub use search::{SearchBatch, SearchPipeline};
