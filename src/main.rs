//! Gateway binary: wire the pipelines together and serve.

use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use webgist::assets::AssetStore;
use webgist::browser::{HostBlocklist, HttpBrowser};
use webgist::cache::{MokaStore, SearchCache};
use webgist::config::GatewayConfig;
use webgist::format::Formatter;
use webgist::pipeline::{CrawlPipeline, SearchPipeline};
use webgist::searx::SearxClient;
use webgist::server::{self, AppState};

/// webgist: search the web and render pages as Markdown for LLMs.
#[derive(Parser)]
#[command(name = "webgist", version, about)]
struct Cli {
    /// Upstream SearXNG instance URL (overrides SEARXNG_INSTANCE_URL).
    #[arg(long)]
    searxng_url: Option<String>,

    /// Listen port (overrides PORT).
    #[arg(short, long)]
    port: Option<u16>,
}

/// Interval at which the screenshot sweeper wakes up.
const SWEEP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(3600);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("webgist=info,tower_http=warn")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = GatewayConfig::from_env();
    if let Some(url) = cli.searxng_url {
        config.searxng_url = url;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    config.validate()?;

    let assets = Arc::new(AssetStore::new(config.screenshot_dir.clone()));
    assets.ensure_dir().await?;
    let _sweeper = assets.spawn_sweeper(config.screenshot_retained_for, SWEEP_INTERVAL);

    let blocklist = Arc::new(HostBlocklist::new());
    blocklist.add("localhost");
    blocklist.add("127.0.0.1");
    if let Ok(hostname) = std::env::var("HOSTNAME") {
        blocklist.add(&hostname);
    }

    let client = SearxClient::new(config.searxng_url.clone())?;
    let store = Arc::new(MokaStore::new(config.cache_retained_for));
    let cache = Arc::new(SearchCache::new(
        store,
        client,
        config.cache_valid_for,
        config.cache_retained_for,
    ));

    let browser = Arc::new(HttpBrowser::new(Arc::clone(&blocklist))?);
    let formatter = Arc::new(Formatter::new(Arc::clone(&assets)));
    let search = Arc::new(SearchPipeline::new(
        cache,
        browser.clone(),
        Arc::clone(&formatter),
        config.search_deadline,
    ));
    let crawl = Arc::new(CrawlPipeline::new(browser, formatter, blocklist));

    let state = AppState {
        search,
        crawl,
        assets,
        config: Arc::new(config),
    };
    server::run(state).await?;
    Ok(())
}
