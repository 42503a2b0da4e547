//! The search pipeline: upstream lookup, fan-out scraping, incremental
//! formatting, and the race between the qualification gate and the
//! early-return timer.
//!
//! Per aggregator emission every slot is mapped to a [`FormattedPage`] —
//! empty slots become stubs from the upstream metadata — and the batch is
//! reorganized (qualified pages first-served, slot order preserved). A
//! batch where every page is qualified and the requested count is met
//! returns immediately. Otherwise, once at least one page qualifies, a
//! deadline is armed; when it fires the best batch so far is returned.
//! The gate wins a same-emission race with the timer.

use crate::aggregate::{scrape_many, SlotArray};
use crate::browser::{Browser, ScrapeOptions};
use crate::cache::SearchCache;
use crate::error::{GatewayError, Result};
use crate::format::{FormattedPage, Formatter};
use crate::types::{RequestContext, SearchQuery, UpstreamResult, DEFAULT_RESULT_COUNT};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// The final, ordered result batch.
#[derive(Debug, Clone)]
pub struct SearchBatch {
    pub pages: Vec<FormattedPage>,
}

impl SearchBatch {
    /// The `text/plain` body: indexed entries joined by blank lines.
    pub fn render(&self) -> String {
        let mut body = self
            .pages
            .iter()
            .enumerate()
            .map(|(i, page)| page.render_indexed(i + 1))
            .collect::<Vec<_>>()
            .join("\n\n");
        body.truncate(body.trim_end().len());
        body.push('\n');
        body
    }
}

/// Orchestrates C1/C2 lookup, C5 scraping, and C4 formatting.
pub struct SearchPipeline {
    cache: Arc<SearchCache>,
    browser: Arc<dyn Browser>,
    formatter: Arc<Formatter>,
    default_deadline: Duration,
}

impl SearchPipeline {
    pub fn new(
        cache: Arc<SearchCache>,
        browser: Arc<dyn Browser>,
        formatter: Arc<Formatter>,
        default_deadline: Duration,
    ) -> Self {
        Self {
            cache,
            browser,
            formatter,
            default_deadline,
        }
    }

    /// Answer a search request.
    ///
    /// # Errors
    ///
    /// Propagates [`GatewayError::Downstream`] from the upstream lookup
    /// and returns [`GatewayError::NoContent`] when the upstream had no
    /// results or no batch could be produced at all.
    pub async fn run(&self, query: SearchQuery, ctx: &RequestContext) -> Result<SearchBatch> {
        let mut response = self
            .cache
            .cached_search(&query, ctx.no_cache, ctx.user_agent.as_deref())
            .await?;

        // A zero count means "search only": no scraping, stub entries
        // straight from the upstream metadata.
        if query.count == 0 {
            response.results.truncate(DEFAULT_RESULT_COUNT);
            if response.results.is_empty() {
                return Err(GatewayError::NoContent("upstream returned no results".into()));
            }
            let pages = response.results.iter().map(stub_page).collect();
            return Ok(SearchBatch { pages });
        }

        response.results.truncate(query.count);
        if response.results.is_empty() {
            return Err(GatewayError::NoContent("upstream returned no results".into()));
        }

        let results = response.results;
        let urls: Vec<_> = results.iter().map(UpstreamResult::parsed_url).collect();
        let mut emissions = scrape_many(Arc::clone(&self.browser), urls, ScrapeOptions::from(ctx));

        let deadline = ctx.timeout.unwrap_or(self.default_deadline);
        let timer = tokio::time::sleep(deadline);
        tokio::pin!(timer);
        let mut timer_armed = false;

        let mut format_cache: HashMap<(usize, u64), FormattedPage> = HashMap::new();
        let mut last_batch: Option<Vec<FormattedPage>> = None;

        loop {
            tokio::select! {
                biased;
                emission = emissions.recv() => {
                    let Some(slots) = emission else {
                        break;
                    };
                    let pages = self
                        .format_slots(ctx, &results, &slots, &mut format_cache)
                        .await;
                    let batch = reorganize(pages, query.count);
                    if batch.len() >= query.count && batch.iter().all(FormattedPage::is_qualified) {
                        tracing::debug!(count = batch.len(), "qualification gate met");
                        return Ok(SearchBatch { pages: batch });
                    }
                    if !timer_armed && batch.iter().any(FormattedPage::is_qualified) {
                        timer.as_mut().reset(Instant::now() + deadline);
                        timer_armed = true;
                        tracing::debug!(deadline_ms = deadline.as_millis() as u64, "early-return timer armed");
                    }
                    last_batch = Some(batch);
                }
                _ = timer.as_mut(), if timer_armed => {
                    if let Some(batch) = last_batch.take() {
                        tracing::debug!("early-return timer fired, returning best batch");
                        return Ok(SearchBatch { pages: batch });
                    }
                    timer_armed = false;
                }
            }
        }

        last_batch
            .map(|pages| SearchBatch { pages })
            .ok_or_else(|| GatewayError::NoContent("no batch was produced".into()))
    }

    /// Map every slot of an emission to a formatted page, formatting
    /// changed snapshots in parallel and caching by `(slot, version)`.
    async fn format_slots(
        &self,
        ctx: &RequestContext,
        results: &[UpstreamResult],
        slots: &SlotArray,
        cache: &mut HashMap<(usize, u64), FormattedPage>,
    ) -> Vec<FormattedPage> {
        let pending: Vec<_> = slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| {
                let slot = slot.as_ref()?;
                (!cache.contains_key(&(i, slot.version))).then(|| (i, slot.clone()))
            })
            .collect();

        let formatted = join_all(pending.into_iter().map(|(i, slot)| async move {
            let outcome = self
                .formatter
                .format(ctx, &slot.snapshot, Some(&results[i].url))
                .await;
            (i, slot, outcome)
        }))
        .await;

        for (i, slot, outcome) in formatted {
            let page = match outcome {
                Ok(page) => page,
                Err(err) => {
                    tracing::warn!(slot = i, url = %results[i].url, error = %err, "formatter failed, using stub");
                    let mut stub = stub_page(&results[i]);
                    stub.content = slot.snapshot.text.clone();
                    stub
                }
            };
            cache.insert((i, slot.version), page);
        }

        slots
            .iter()
            .enumerate()
            .map(|(i, slot)| match slot {
                Some(slot) => cache
                    .get(&(i, slot.version))
                    .cloned()
                    .unwrap_or_else(|| stub_page(&results[i])),
                None => stub_page(&results[i]),
            })
            .collect()
    }
}

/// A stub entry carrying only the upstream metadata for a slot.
fn stub_page(result: &UpstreamResult) -> FormattedPage {
    FormattedPage::stub(&result.url, &result.title, &result.content)
}

/// Partition into qualified/unqualified, keep all qualified pages, fill
/// from unqualified in slot order up to `count`, restore slot order, and
/// truncate to `count`.
fn reorganize(pages: Vec<FormattedPage>, count: usize) -> Vec<FormattedPage> {
    let mut selected: Vec<(usize, FormattedPage)> = Vec::new();
    let mut fill: Vec<(usize, FormattedPage)> = Vec::new();
    for (slot, page) in pages.into_iter().enumerate() {
        if page.is_qualified() {
            selected.push((slot, page));
        } else {
            fill.push((slot, page));
        }
    }
    let mut fill = fill.into_iter();
    while selected.len() < count {
        let Some(entry) = fill.next() else {
            break;
        };
        selected.push(entry);
    }
    selected.sort_by_key(|(slot, _)| *slot);
    selected.truncate(count);
    selected.into_iter().map(|(_, page)| page).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn qualified(tag: &str) -> FormattedPage {
        FormattedPage {
            title: Some(tag.to_owned()),
            content: Some(format!("content of {tag}")),
            url: Some(format!("https://{tag}.com")),
            ..Default::default()
        }
    }

    fn unqualified(tag: &str) -> FormattedPage {
        FormattedPage::stub(format!("https://{tag}.com"), tag, "just a snippet")
    }

    #[test]
    fn reorganize_keeps_slot_order_when_all_qualified() {
        let pages = vec![qualified("a"), qualified("b"), qualified("c")];
        let out = reorganize(pages, 3);
        let titles: Vec<_> = out.iter().map(|p| p.title.clone().unwrap()).collect();
        assert_eq!(titles, vec!["a", "b", "c"]);
    }

    #[test]
    fn reorganize_prefers_qualified_when_over_count() {
        let pages = vec![
            unqualified("u1"),
            qualified("q1"),
            unqualified("u2"),
            qualified("q2"),
        ];
        let out = reorganize(pages, 2);
        let titles: Vec<_> = out.iter().map(|p| p.title.clone().unwrap()).collect();
        assert_eq!(titles, vec!["q1", "q2"]);
    }

    #[test]
    fn reorganize_fills_from_unqualified_in_slot_order() {
        let pages = vec![
            unqualified("u1"),
            qualified("q1"),
            unqualified("u2"),
        ];
        let out = reorganize(pages, 3);
        let titles: Vec<_> = out.iter().map(|p| p.title.clone().unwrap()).collect();
        // All three survive, restored to slot order.
        assert_eq!(titles, vec!["u1", "q1", "u2"]);
    }

    #[test]
    fn reorganize_truncates_qualified_beyond_count() {
        let pages = vec![qualified("q1"), qualified("q2"), qualified("q3")];
        let out = reorganize(pages, 2);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].title.as_deref(), Some("q1"));
        assert_eq!(out[1].title.as_deref(), Some("q2"));
    }

    #[test]
    fn reorganize_with_fewer_pages_than_count() {
        let pages = vec![unqualified("u1")];
        let out = reorganize(pages, 5);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn batch_render_joins_indexed_entries() {
        let batch = SearchBatch {
            pages: vec![qualified("a"), unqualified("b")],
        };
        let body = batch.render();
        assert!(body.starts_with("[1] Title: a\n"));
        assert!(body.contains("\n\n[2] Title: b\n"));
        assert!(body.ends_with('\n'));
        assert!(!body.ends_with("\n\n"));
    }
}
