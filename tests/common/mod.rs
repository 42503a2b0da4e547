//! Shared fixtures: a scripted browser and a canned SearXNG upstream.
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use url::Url;
use webgist::browser::{Browser, ScrapeOptions, SnapshotStream};
use webgist::types::{PageSnapshot, ParsedContent};
use webgist::Result;

/// A browser whose behaviour per URL is scripted up front. URLs with no
/// script yield nothing (the stream stays open for `hold` then ends).
pub struct ScriptedBrowser {
    scripts: HashMap<String, Vec<(Duration, PageSnapshot)>>,
    /// How long unscripted scrapes stay open before ending empty.
    pub hold: Duration,
    pub scrape_count: AtomicUsize,
}

impl ScriptedBrowser {
    pub fn new() -> Self {
        Self {
            scripts: HashMap::new(),
            hold: Duration::from_secs(30),
            scrape_count: AtomicUsize::new(0),
        }
    }

    pub fn on(mut self, url: &str, yields: Vec<(Duration, PageSnapshot)>) -> Self {
        self.scripts.insert(url.to_owned(), yields);
        self
    }

    pub fn scrapes(&self) -> usize {
        self.scrape_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Browser for ScriptedBrowser {
    async fn scrape(&self, url: Url, _opts: ScrapeOptions) -> Result<SnapshotStream> {
        self.scrape_count.fetch_add(1, Ordering::SeqCst);
        let script = self.scripts.get(url.as_str()).cloned();
        let hold = self.hold;
        let (tx, rx) = tokio::sync::mpsc::channel(8);
        tokio::spawn(async move {
            match script {
                Some(yields) => {
                    for (delay, snapshot) in yields {
                        tokio::time::sleep(delay).await;
                        if tx.send(Ok(snapshot)).await.is_err() {
                            return;
                        }
                    }
                }
                None => tokio::time::sleep(hold).await,
            }
        });
        Ok(rx)
    }
}

/// A snapshot that formats into a qualified markdown page.
pub fn content_snapshot(href: &str, title: &str, body: &str) -> PageSnapshot {
    PageSnapshot {
        href: href.into(),
        title: Some(title.into()),
        html: Some(format!(
            "<html><head><title>{title}</title></head><body><article><p>{body}</p></article></body></html>"
        )),
        text: Some(body.into()),
        parsed: Some(ParsedContent {
            title: Some(title.into()),
            content: Some(format!("<p>{body}</p>")),
            published_time: None,
        }),
        ..Default::default()
    }
}

/// The SearXNG JSON body for `n` deterministic results.
pub fn searx_results(n: usize) -> serde_json::Value {
    let results: Vec<_> = (0..n)
        .map(|i| {
            serde_json::json!({
                "url": format!("https://site{i}.example/"),
                "title": format!("Site {i}"),
                "content": format!("Snippet for site {i}"),
                "engine": "duckduckgo",
                "score": 1.0,
                "category": "general"
            })
        })
        .collect();
    serde_json::json!({
        "query": "rust",
        "number_of_results": n,
        "results": results,
        "answers": [],
        "corrections": [],
        "infoboxes": [],
        "suggestions": [],
        "unresponsive_engines": []
    })
}

/// A scripted browser with instant content for the first `n` canned
/// result URLs.
pub fn browser_with_content(n: usize) -> ScriptedBrowser {
    let mut browser = ScriptedBrowser::new();
    for i in 0..n {
        let url = format!("https://site{i}.example/");
        browser = browser.on(
            &url,
            vec![(
                Duration::from_millis(20),
                content_snapshot(&url, &format!("Site {i}"), &format!("Body of site {i}")),
            )],
        );
    }
    browser
}

/// Temp-dir asset store + formatter helpers for pipeline construction.
pub fn temp_assets() -> Arc<webgist::assets::AssetStore> {
    let dir = std::env::temp_dir().join(format!("webgist-it-{}", uuid::Uuid::new_v4()));
    Arc::new(webgist::assets::AssetStore::new(dir))
}
