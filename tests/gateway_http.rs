//! Server-level tests: real axum listener on a loopback port, real HTTP
//! client, scripted browser and mock SearXNG behind the pipelines.

mod common;

use common::{browser_with_content, searx_results, temp_assets, ScriptedBrowser};
use std::sync::Arc;
use std::time::Duration;
use webgist::assets::AssetStore;
use webgist::browser::{Browser, HostBlocklist};
use webgist::cache::{CacheStore, MokaStore, SearchCache};
use webgist::config::GatewayConfig;
use webgist::format::Formatter;
use webgist::pipeline::{CrawlPipeline, SearchPipeline};
use webgist::searx::SearxClient;
use webgist::server::{router, AppState};
use webgist::types::PageSnapshot;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Served {
    base: String,
    _assets: Arc<AssetStore>,
    _upstream: MockServer,
}

async fn serve(browser: ScriptedBrowser, upstream_body: serde_json::Value) -> Served {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(upstream_body))
        .mount(&upstream)
        .await;

    let assets = temp_assets();
    assets.ensure_dir().await.unwrap();
    let formatter = Arc::new(Formatter::new(Arc::clone(&assets)));
    let browser: Arc<dyn Browser> = Arc::new(browser);
    let cache = Arc::new(SearchCache::new(
        Arc::new(MokaStore::new(Duration::from_secs(604_800))) as Arc<dyn CacheStore>,
        SearxClient::new(upstream.uri()).unwrap(),
        Duration::from_secs(3600),
        Duration::from_secs(604_800),
    ));
    let state = AppState {
        search: Arc::new(SearchPipeline::new(
            cache,
            Arc::clone(&browser),
            Arc::clone(&formatter),
            Duration::from_secs(15),
        )),
        crawl: Arc::new(CrawlPipeline::new(
            browser,
            formatter,
            Arc::new(HostBlocklist::new()),
        )),
        assets: Arc::clone(&assets),
        config: Arc::new(GatewayConfig::default()),
    };

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.unwrap();
    });
    Served {
        base,
        _assets: assets,
        _upstream: upstream,
    }
}

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}

#[tokio::test]
async fn health_endpoint_reports_ok() {
    let served = serve(ScriptedBrowser::new(), searx_results(0)).await;
    let response = client()
        .get(format!("{}/health", served.base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn crawl_rejects_invalid_tld_with_400() {
    let served = serve(ScriptedBrowser::new(), searx_results(0)).await;
    let response = client()
        .get(format!("{}/r/http://foo.x/", served.base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body = response.text().await.unwrap();
    assert!(body.contains("Invalid URL or TLD"));
}

#[tokio::test]
async fn crawl_returns_markdown_body() {
    let url = "https://site0.example/";
    let browser = ScriptedBrowser::new().on(
        url,
        vec![(
            Duration::from_millis(10),
            common::content_snapshot(url, "Site 0", "Crawled body"),
        )],
    );
    let served = serve(browser, searx_results(0)).await;
    let response = client()
        .get(format!("{}/r/{url}", served.base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert!(response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/plain"));
    let body = response.text().await.unwrap();
    assert_eq!(body, "Crawled body");
}

#[tokio::test]
async fn crawl_target_query_string_is_preserved() {
    let url = "https://site0.example/search?q=rust&page=2";
    let browser = ScriptedBrowser::new().on(
        url,
        vec![(
            Duration::from_millis(10),
            common::content_snapshot(url, "Q", "query preserved"),
        )],
    );
    let served = serve(browser, searx_results(0)).await;
    let response = client()
        .get(format!("{}/r/{url}", served.base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "query preserved");
}

#[tokio::test]
async fn screenshot_mode_redirects_to_stored_asset() {
    let url = "https://site0.example/";
    let browser = ScriptedBrowser::new().on(
        url,
        vec![(
            Duration::from_millis(10),
            PageSnapshot {
                href: url.into(),
                title: Some("Shot".into()),
                screenshot: Some(vec![137, 80, 78, 71]),
                ..Default::default()
            },
        )],
    );
    let served = serve(browser, searx_results(0)).await;

    let response = client()
        .get(format!("{}/r/{url}", served.base))
        .header("X-Respond-With", "screenshot")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 302);
    let location = response
        .headers()
        .get("location")
        .unwrap()
        .to_str()
        .unwrap()
        .to_owned();
    assert!(location.contains("/instant-screenshots/screenshot-"));

    // The stored asset is fetchable from this server.
    let file = location.rsplit('/').next().unwrap();
    let asset = client()
        .get(format!("{}/instant-screenshots/{file}", served.base))
        .send()
        .await
        .unwrap();
    assert_eq!(asset.status(), 200);
    assert_eq!(asset.headers().get("content-type").unwrap(), "image/png");
    assert_eq!(asset.bytes().await.unwrap().as_ref(), [137, 80, 78, 71]);
}

#[tokio::test]
async fn missing_asset_is_404() {
    let served = serve(ScriptedBrowser::new(), searx_results(0)).await;
    let response = client()
        .get(format!("{}/instant-screenshots/screenshot-nope.png", served.base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn search_endpoint_renders_batch() {
    let served = serve(browser_with_content(2), searx_results(2)).await;
    let response = client()
        .get(format!("{}/s/rust%20async?count=2", served.base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body = response.text().await.unwrap();
    assert!(body.starts_with("[1] Title: Site 0\n"));
    assert!(body.contains("[2] Title: Site 1\n"));
    assert!(body.contains("Body of site 0"));
}

#[tokio::test]
async fn search_with_count_zero_returns_descriptions() {
    let served = serve(ScriptedBrowser::new(), searx_results(3)).await;
    let response = client()
        .get(format!("{}/s/rust?count=0", served.base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body = response.text().await.unwrap();
    assert!(body.contains("[1] Description: Snippet for site 0"));
    assert!(!body.contains("Markdown Content"));
}

#[tokio::test]
async fn post_crawl_with_inline_html() {
    let served = serve(ScriptedBrowser::new(), searx_results(0)).await;
    let response = client()
        .post(format!("{}/r", served.base))
        .json(&serde_json::json!({
            "url": "https://example.com/inline",
            "html": "<html><head><title>Inline</title></head><body><p>Inline content</p></body></html>"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body = response.text().await.unwrap();
    assert!(body.contains("Inline content"));
}
