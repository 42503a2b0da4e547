//! Digest-keyed cache of upstream search responses.
//!
//! Responses are keyed by an MD5-base64 digest of the canonical query
//! serialization and move through three age classes: **fresh** responses
//! are returned directly, **stale** ones are held as a fallback while the
//! upstream is re-queried, **expired** ones are never returned. The store
//! itself is a pluggable key-value seam; the shipped implementation is a
//! [`moka`] cache whose time-to-live doubles as the retention sweeper.

use crate::error::Result;
use crate::searx::SearxClient;
use crate::types::{SearchQuery, UpstreamSearchResponse};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use md5::{Digest, Md5};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Compute the cache digest for a query: MD5 of the canonical key-sorted
/// JSON serialization, base64-encoded.
pub fn query_digest(query: &SearchQuery) -> String {
    let hash = Md5::digest(query.canonical_json().as_bytes());
    BASE64.encode(hash)
}

/// A cached upstream response. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub query_digest: String,
    pub query: SearchQuery,
    pub response: UpstreamSearchResponse,
    /// Milliseconds since the Unix epoch.
    pub created_at: u64,
    /// Always `created_at + retention`.
    pub expire_at: u64,
}

/// Age class of a cache entry relative to `now`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Stale,
    Expired,
}

/// Classify an entry created at `created_at` (epoch millis) as seen from
/// `now` (epoch millis).
pub fn classify(created_at: u64, now: u64, valid_for: Duration, retained_for: Duration) -> Freshness {
    let age = now.saturating_sub(created_at);
    if age < valid_for.as_millis() as u64 {
        Freshness::Fresh
    } else if age < retained_for.as_millis() as u64 {
        Freshness::Stale
    } else {
        Freshness::Expired
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Generic key-value seam for cache persistence.
///
/// The gateway only ever appends entries and reads the most recent entry
/// for a digest; eviction of expired records is the store's concern.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// The most recently created entry for `digest`, if any is retained.
    async fn latest(&self, digest: &str) -> Option<CacheEntry>;

    /// Persist a new entry.
    ///
    /// # Errors
    ///
    /// Implementations may fail on storage errors; callers treat a failed
    /// write as non-fatal.
    async fn insert(&self, entry: CacheEntry) -> Result<()>;
}

/// In-process [`CacheStore`] backed by a [`moka`] cache.
///
/// Entries for the same digest are appended to a per-digest list; the
/// cache TTL is set to the retention window, so expired digests are
/// evicted wholesale without a separate sweeper.
pub struct MokaStore {
    inner: moka::future::Cache<String, Vec<CacheEntry>>,
}

impl MokaStore {
    /// Build a store retaining entries for `retained_for`.
    pub fn new(retained_for: Duration) -> Self {
        Self {
            inner: moka::future::Cache::builder()
                .max_capacity(10_000)
                .time_to_live(retained_for)
                .build(),
        }
    }
}

#[async_trait]
impl CacheStore for MokaStore {
    async fn latest(&self, digest: &str) -> Option<CacheEntry> {
        let entries = self.inner.get(digest).await?;
        entries.into_iter().max_by_key(|e| e.created_at)
    }

    async fn insert(&self, entry: CacheEntry) -> Result<()> {
        let mut entries = self.inner.get(&entry.query_digest).await.unwrap_or_default();
        let digest = entry.query_digest.clone();
        entries.push(entry);
        self.inner.insert(digest, entries).await;
        Ok(())
    }
}

/// The search cache: digest lookup, freshness check, upstream pagination,
/// and stale fallback.
pub struct SearchCache {
    store: Arc<dyn CacheStore>,
    client: SearxClient,
    valid_for: Duration,
    retained_for: Duration,
}

impl SearchCache {
    pub fn new(
        store: Arc<dyn CacheStore>,
        client: SearxClient,
        valid_for: Duration,
        retained_for: Duration,
    ) -> Self {
        Self {
            store,
            client,
            valid_for,
            retained_for,
        }
    }

    /// Resolve a query to an upstream response, consulting the cache.
    ///
    /// Fresh hits short-circuit the upstream entirely. Stale hits are held
    /// as a fallback: if the upstream then fails, the stale response is
    /// returned (logged at warn level) instead of the error. A successful
    /// upstream response is persisted fire-and-forget.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Downstream`] when the upstream fails and no
    /// stale fallback is held.
    pub async fn cached_search(
        &self,
        query: &SearchQuery,
        no_cache: bool,
        user_agent: Option<&str>,
    ) -> Result<UpstreamSearchResponse> {
        let digest = query_digest(query);
        let mut stale_fallback = None;

        if !no_cache {
            if let Some(entry) = self.store.latest(&digest).await {
                match classify(entry.created_at, now_millis(), self.valid_for, self.retained_for) {
                    Freshness::Fresh => {
                        tracing::debug!(%digest, "cache hit (fresh)");
                        return Ok(entry.response);
                    }
                    Freshness::Stale => {
                        tracing::debug!(%digest, "cache hit (stale), revalidating upstream");
                        stale_fallback = Some(entry.response);
                    }
                    Freshness::Expired => {}
                }
            }
        }

        match self.fetch_paginated(query, user_agent).await {
            Ok(response) => {
                self.persist(digest, query.clone(), response.clone());
                Ok(response)
            }
            Err(err) => {
                if let Some(fallback) = stale_fallback {
                    tracing::warn!(%digest, error = %err, "upstream failed, serving stale cache entry");
                    Ok(fallback)
                } else {
                    Err(err)
                }
            }
        }
    }

    /// Fetch page 1 and, when it comes back short of `count`, page 2 after
    /// a jittered pause. Results are concatenated and truncated to `count`
    /// (a zero count disables truncation; the pipeline caps stub batches
    /// itself).
    async fn fetch_paginated(
        &self,
        query: &SearchQuery,
        user_agent: Option<&str>,
    ) -> Result<UpstreamSearchResponse> {
        let mut response = self.client.search(query, user_agent).await?;

        if query.count > 0 && response.results.len() < query.count {
            let pause = 1000 + rand::thread_rng().gen_range(0..1000);
            tracing::debug!(
                got = response.results.len(),
                want = query.count,
                pause_ms = pause,
                "first page short, fetching page 2"
            );
            tokio::time::sleep(Duration::from_millis(pause)).await;
            let page2 = self.client.search(&query.with_page(2), user_agent).await?;
            response.results.extend(page2.results);
        }

        if query.count > 0 {
            response.results.truncate(query.count);
        }
        Ok(response)
    }

    /// Persist an entry without blocking the response path. Failures are
    /// logged and dropped.
    fn persist(&self, digest: String, query: SearchQuery, response: UpstreamSearchResponse) {
        let created_at = now_millis();
        let entry = CacheEntry {
            query_digest: digest.clone(),
            query,
            response,
            created_at,
            expire_at: created_at + self.retained_for.as_millis() as u64,
        };
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            if let Err(err) = store.insert(entry).await {
                tracing::warn!(%digest, error = %err, "failed to persist cache entry");
            }
        });
    }
}
