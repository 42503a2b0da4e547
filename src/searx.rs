//! Upstream meta-search client for the SearXNG JSON API.
//!
//! One-shot `GET {base_url}/search` with `format=json`. The only error the
//! client retries internally is HTTP 429 (rate limiting), with jittered
//! backoff; every other failure is surfaced immediately as
//! [`GatewayError::Downstream`].

use crate::error::{GatewayError, Result};
use crate::types::{SearchQuery, UpstreamSearchResponse};
use rand::Rng;
use std::time::Duration;

/// Fixed desktop Chrome User-Agent used when the caller supplies none.
pub const FALLBACK_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Maximum attempts for a single logical search call.
const MAX_ATTEMPTS: u32 = 5;

/// Client for the upstream SearXNG instance.
#[derive(Debug, Clone)]
pub struct SearxClient {
    http: reqwest::Client,
    base_url: String,
}

impl SearxClient {
    /// Build a client for the given instance base URL.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Internal`] if the HTTP client cannot be
    /// constructed.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| GatewayError::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }

    /// Execute one logical search against the upstream.
    ///
    /// Retries up to 5 times on HTTP 429 with `500 + uniform(0,1000)` ms
    /// sleeps between attempts. Non-2xx statuses (including redirects),
    /// network errors, and non-object bodies all fail fast.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Downstream`] on any upstream failure.
    pub async fn search(
        &self,
        query: &SearchQuery,
        user_agent: Option<&str>,
    ) -> Result<UpstreamSearchResponse> {
        let endpoint = format!("{}/search", self.base_url.trim_end_matches('/'));
        let params = self.build_params(query);
        let ua = user_agent.unwrap_or(FALLBACK_USER_AGENT);

        for attempt in 1..=MAX_ATTEMPTS {
            let response = self
                .http
                .get(&endpoint)
                .query(&params)
                .header("Accept", "application/json")
                .header("User-Agent", ua)
                .send()
                .await
                .map_err(|e| GatewayError::Downstream(format!("search request failed: {e}")))?;

            let status = response.status();
            if status.as_u16() == 429 {
                let backoff = 500 + rand::thread_rng().gen_range(0..1000);
                tracing::warn!(attempt, backoff_ms = backoff, "upstream rate limited, backing off");
                tokio::time::sleep(Duration::from_millis(backoff)).await;
                continue;
            }
            if !status.is_success() {
                return Err(GatewayError::Downstream(format!(
                    "upstream search returned HTTP {status}"
                )));
            }

            let body: serde_json::Value = response
                .json()
                .await
                .map_err(|e| GatewayError::Downstream(format!("invalid search response: {e}")))?;
            if !body.is_object() {
                return Err(GatewayError::Downstream(
                    "upstream search returned a non-object body".into(),
                ));
            }
            return serde_json::from_value(body)
                .map_err(|e| GatewayError::Downstream(format!("malformed search response: {e}")));
        }

        Err(GatewayError::Downstream(format!(
            "upstream search rate limited after {MAX_ATTEMPTS} attempts"
        )))
    }

    fn build_params(&self, query: &SearchQuery) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("q", query.text.clone()),
            ("format", "json".to_owned()),
        ];
        if let Some(ref language) = query.language {
            params.push(("language", language.clone()));
        }
        if let Some(page) = query.page_number {
            params.push(("pageno", page.to_string()));
        }
        if let Some(ref range) = query.time_range {
            params.push(("time_range", range.clone()));
        }
        if !query.categories.is_empty() {
            params.push(("categories", query.categories.join(",")));
        }
        if !query.engines.is_empty() {
            params.push(("engines", query.engines.join(",")));
        }
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn body_with_results(n: usize) -> serde_json::Value {
        let results: Vec<_> = (0..n)
            .map(|i| {
                serde_json::json!({
                    "url": format!("https://example.com/{i}"),
                    "title": format!("Result {i}"),
                    "content": format!("Snippet {i}"),
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

    #[tokio::test]
    async fn successful_search_parses_results() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("q", "rust"))
            .and(query_param("format", "json"))
            .and(header("Accept", "application/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body_with_results(3)))
            .mount(&server)
            .await;

        let client = SearxClient::new(server.uri()).unwrap();
        let response = client.search(&SearchQuery::new("rust"), None).await.unwrap();
        assert_eq!(response.results.len(), 3);
        assert_eq!(response.results[0].url, "https://example.com/0");
    }

    #[tokio::test]
    async fn forwards_optional_params() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("language", "de"))
            .and(query_param("pageno", "2"))
            .and(query_param("time_range", "week"))
            .and(query_param("categories", "general,news"))
            .and(query_param("engines", "google,brave"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body_with_results(1)))
            .mount(&server)
            .await;

        let mut query = SearchQuery::new("rust");
        query.language = Some("de".into());
        query.page_number = Some(2);
        query.time_range = Some("week".into());
        query.categories = vec!["general".into(), "news".into()];
        query.engines = vec!["google".into(), "brave".into()];

        let client = SearxClient::new(server.uri()).unwrap();
        let response = client.search(&query, None).await.unwrap();
        assert_eq!(response.results.len(), 1);
    }

    #[tokio::test]
    async fn non_success_status_fails_fast() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let client = SearxClient::new(server.uri()).unwrap();
        let err = client
            .search(&SearchQuery::new("rust"), None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("HTTP 500"));
    }

    #[tokio::test]
    async fn rate_limit_is_retried_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body_with_results(2)))
            .mount(&server)
            .await;

        let client = SearxClient::new(server.uri()).unwrap();
        let response = client.search(&SearchQuery::new("rust"), None).await.unwrap();
        assert_eq!(response.results.len(), 2);
    }

    #[tokio::test]
    async fn rate_limit_exhausts_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(429))
            .expect(5)
            .mount(&server)
            .await;

        let client = SearxClient::new(server.uri()).unwrap();
        let err = client
            .search(&SearchQuery::new("rust"), None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("rate limited"));
    }

    #[tokio::test]
    async fn non_object_body_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([1, 2])))
            .mount(&server)
            .await;

        let client = SearxClient::new(server.uri()).unwrap();
        let err = client
            .search(&SearchQuery::new("rust"), None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("non-object"));
    }

    #[tokio::test]
    async fn custom_user_agent_is_sent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(header("User-Agent", "webgist-test/1.0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body_with_results(1)))
            .mount(&server)
            .await;

        let client = SearxClient::new(server.uri()).unwrap();
        let response = client
            .search(&SearchQuery::new("rust"), Some("webgist-test/1.0"))
            .await
            .unwrap();
        assert_eq!(response.results.len(), 1);
    }
}
