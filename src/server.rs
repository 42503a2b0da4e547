//! The HTTP surface: a thin axum layer above the two pipelines.
//!
//! `GET /s/{query}` answers searches, `GET /r/{url}` and `POST /r` crawl a
//! single target, `/instant-screenshots/{file}` serves stored screenshot
//! assets, and `/health` reports liveness. Responses are `text/plain`
//! renderings of the formatted pages; screenshot modes redirect to the
//! stored asset instead.

use crate::assets::AssetStore;
use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::pipeline::{CrawlPipeline, SearchPipeline};
use crate::types::{
    RequestContext, RespondMode, SearchQuery, DEFAULT_RESULT_COUNT, MAX_RESULT_COUNT,
};
use axum::extract::{OriginalUri, Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Longest crawl deadline a client may request, in seconds.
const MAX_TIMEOUT_SECS: u64 = 180;

/// Shared state behind every handler.
#[derive(Clone)]
pub struct AppState {
    pub search: Arc<SearchPipeline>,
    pub crawl: Arc<CrawlPipeline>,
    pub assets: Arc<AssetStore>,
    pub config: Arc<GatewayConfig>,
}

/// Build the gateway router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/s/{*query}", get(search_handler))
        .route("/r/{*url}", get(crawl_handler))
        .route("/r", post(crawl_post_handler))
        .route("/instant-screenshots/{file}", get(asset_handler))
        .with_state(state)
}

/// Bind and serve until the process is stopped.
///
/// # Errors
///
/// Returns [`GatewayError::Internal`] when the listener cannot be bound.
pub async fn run(state: AppState) -> Result<()> {
    let addr = format!("0.0.0.0:{}", state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| GatewayError::Internal(format!("cannot bind {addr}: {e}")))?;
    let local_addr = listener
        .local_addr()
        .map_err(|e| GatewayError::Internal(format!("no local addr: {e}")))?;
    tracing::info!("webgist listening on http://{local_addr}");

    let app = router(state);
    axum::serve(listener, app)
        .await
        .map_err(|e| GatewayError::Internal(format!("server error: {e}")))
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn search_handler(
    State(state): State<AppState>,
    Path(query_text): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let ctx = context_from_headers(&headers, &state.config);
    let query = build_query(&query_text, &params, &headers, &ctx);

    match state.search.run(query, &ctx).await {
        Ok(batch) => plain_text(StatusCode::OK, batch.render()),
        Err(err) => error_response(&err),
    }
}

async fn crawl_handler(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    Path(target): Path<String>,
    headers: HeaderMap,
) -> Response {
    let ctx = context_from_headers(&headers, &state.config);
    // The target's own query string arrives as the request query; glue it
    // back so `/r/https://a.com/x?y=1` crawls the full URL.
    let target = match uri.query() {
        Some(query) => format!("{target}?{query}"),
        None => target,
    };
    respond_crawl(&state, &target, None, ctx).await
}

/// `POST /r` body.
#[derive(Debug, Deserialize)]
struct CrawlBody {
    url: String,
    #[serde(default)]
    html: Option<String>,
    #[serde(default, rename = "respondWith")]
    respond_with: Option<String>,
    #[serde(default)]
    timeout: Option<u64>,
}

async fn crawl_post_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CrawlBody>,
) -> Response {
    let mut ctx = context_from_headers(&headers, &state.config);
    if let Some(ref mode) = body.respond_with {
        ctx.mode = RespondMode::from_header(mode);
    }
    if let Some(secs) = body.timeout {
        ctx.timeout = Some(Duration::from_secs(secs.min(MAX_TIMEOUT_SECS)));
    }
    respond_crawl(&state, &body.url, body.html, ctx).await
}

async fn respond_crawl(
    state: &AppState,
    target: &str,
    html: Option<String>,
    ctx: RequestContext,
) -> Response {
    let outcome = match html {
        Some(html) => state.crawl.run_with_html(target, html, &ctx).await,
        None => state.crawl.run(target, &ctx).await,
    };
    let page = match outcome {
        Ok(page) => page,
        Err(err) => return error_response(&err),
    };

    // Screenshot modes redirect to the stored asset.
    let asset_url = match ctx.mode {
        RespondMode::Screenshot => page.screenshot_url.clone(),
        RespondMode::Pageshot => page.pageshot_url.clone(),
        _ => None,
    };
    if let Some(url) = asset_url {
        return (StatusCode::FOUND, [(header::LOCATION, url)]).into_response();
    }

    plain_text(StatusCode::OK, page.render())
}

async fn asset_handler(
    State(state): State<AppState>,
    Path(file): Path<String>,
) -> Response {
    let Some(path) = state.assets.path_of(&file) else {
        return plain_text(StatusCode::NOT_FOUND, "not found\n".into());
    };
    match tokio::fs::read(&path).await {
        Ok(bytes) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "image/png")],
            bytes,
        )
            .into_response(),
        Err(_) => plain_text(StatusCode::NOT_FOUND, "not found\n".into()),
    }
}

/// Build the per-request context from the shared header conventions.
fn context_from_headers(headers: &HeaderMap, config: &GatewayConfig) -> RequestContext {
    let header_str = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_owned())
            .filter(|v| !v.is_empty())
    };
    let header_flag = |name: &str| {
        header_str(name).is_some_and(|v| !v.eq_ignore_ascii_case("false") && v != "0")
    };

    let mode = header_str("x-respond-with")
        .map(|v| RespondMode::from_header(&v))
        .unwrap_or_default();
    let timeout = header_str("x-timeout")
        .and_then(|v| v.parse::<u64>().ok())
        .map(|secs| Duration::from_secs(secs.min(MAX_TIMEOUT_SECS)));
    let host = header_str("host").unwrap_or_else(|| format!("localhost:{}", config.port));

    RequestContext {
        mode,
        host,
        user_agent: header_str("user-agent").or_else(|| config.user_agent.clone()),
        no_cache: header_flag("x-no-cache"),
        timeout,
        with_generated_alt: header_flag("x-with-generated-alt"),
        with_images_summary: header_flag("x-with-images-summary"),
        with_links_summary: header_flag("x-with-links-summary"),
        wait_for_selector: header_str("x-wait-for-selector"),
        target_selector: header_str("x-target-selector"),
        remove_selector: header_str("x-remove-selector"),
        proxy_url: header_str("x-proxy-url"),
        locale: header_str("x-locale"),
    }
}

/// Assemble the upstream query from path, query params, and operator
/// headers (`x-categories` and friends, comma-space separated).
fn build_query(
    text: &str,
    params: &HashMap<String, String>,
    headers: &HeaderMap,
    ctx: &RequestContext,
) -> SearchQuery {
    let header_list = |name: &str| -> Vec<String> {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|v| {
                v.split(", ")
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default()
    };
    let param_list = |name: &str| -> Vec<String> {
        params
            .get(name)
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default()
    };

    let count = params
        .get("count")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(DEFAULT_RESULT_COUNT)
        .min(MAX_RESULT_COUNT);

    let mut categories = param_list("categories");
    categories.extend(header_list("x-categories"));
    let mut engines = param_list("engines");
    engines.extend(header_list("x-engines"));

    let header_str = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_owned())
            .filter(|v| !v.is_empty())
    };

    SearchQuery {
        text: text.to_owned(),
        count,
        categories,
        engines,
        language: header_str("x-language").or_else(|| ctx.locale.clone()),
        page_number: None,
        time_range: header_str("x-time_range"),
    }
}

fn plain_text(status: StatusCode, body: String) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    )
        .into_response()
}

fn error_response(err: &GatewayError) -> Response {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    tracing::debug!(status = %status, error = %err, "request failed");
    plain_text(status, format!("{err}\n"))
}
