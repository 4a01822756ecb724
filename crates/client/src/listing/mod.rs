//! Listing search API client.
//!
//! Wraps the property search endpoint behind the shared [`AdaptiveLimiter`].
//!
//! - **Authentication**: `x-rapidapi-key` / `x-rapidapi-host` headers.
//! - **Paging**: the `page` query parameter, 1-based. A 404 means the page
//!   has no results and is returned as `{"results": []}`.
//! - **Failures**: 429 and network errors are retried by the limiter; any
//!   other non-2xx status is terminal and surfaces as [`ListingError`] with a
//!   short message pulled from the body.

pub mod error;
pub mod paginator;
pub mod request;
pub mod response;

pub use error::ListingError;
pub use paginator::Paginator;
pub use request::{page_params, query_pairs, split_locations};
pub use response::{extract_error_message, extract_results, total_pages};

use std::sync::Arc;
use std::time::Duration;

use rentscout_core::AppConfig;
use serde_json::{Map, Value, json};

use crate::limiter::AdaptiveLimiter;
use crate::transport::{HttpRequest, Transport};

/// Listing API client configuration.
#[derive(Debug, Clone)]
pub struct ListingConfig {
    pub api_key: String,
    /// Search endpoint URL.
    pub base_url: String,
    /// Value sent as `x-rapidapi-host`.
    pub api_host: String,
    pub timeout: Duration,
}

impl ListingConfig {
    /// Endpoint settings from `config`; fails without an API key.
    pub fn from_app(config: &AppConfig) -> Result<Self, ListingError> {
        let api_key = config.api_key.clone().filter(|key| !key.trim().is_empty()).ok_or(ListingError::MissingApiKey)?;
        Ok(Self {
            api_key,
            base_url: config.base_url.clone(),
            api_host: config.api_host.clone(),
            timeout: config.timeout(),
        })
    }

    /// Default endpoint with the key from RENTSCOUT_API_KEY, falling back to RAPIDAPI_KEY.
    pub fn from_env() -> Result<Self, ListingError> {
        let api_key = ["RENTSCOUT_API_KEY", "RAPIDAPI_KEY"]
            .into_iter()
            .find_map(|name| std::env::var(name).ok().filter(|key| !key.trim().is_empty()));
        Self::from_app(&AppConfig { api_key, ..AppConfig::default() })
    }

    fn headers(&self) -> Vec<(String, String)> {
        vec![("x-rapidapi-key".into(), self.api_key.clone()), ("x-rapidapi-host".into(), self.api_host.clone())]
    }
}

/// Listing search client.
///
/// Cheap to clone; clones share the transport and the limiter.
#[derive(Debug, Clone)]
pub struct ListingClient {
    transport: Arc<dyn Transport>,
    limiter: Arc<AdaptiveLimiter>,
    config: ListingConfig,
}

impl ListingClient {
    pub fn new(config: ListingConfig, transport: Arc<dyn Transport>, limiter: Arc<AdaptiveLimiter>) -> Self {
        Self { transport, limiter, config }
    }

    /// Fetch one page of results for `params`.
    ///
    /// The page number is clamped to at least 1 and replaces any `page` in
    /// `params`.
    ///
    /// # Errors
    ///
    /// `Unauthorized` for 401/403, `Http` for other terminal statuses,
    /// `Exhausted` when retries run out and `Parse` for a non-JSON body.
    pub async fn fetch_page(&self, params: &Map<String, Value>, page: u32) -> Result<Value, ListingError> {
        let page = page.max(1);
        let label = format!("page {page}");
        let request = HttpRequest {
            url: self.config.base_url.clone(),
            headers: self.config.headers(),
            params: query_pairs(&page_params(params, page)),
            timeout: self.config.timeout,
        };

        let response = self.limiter.execute_with_retry(&label, || self.transport.get(&request)).await?;

        if response.status == 404 {
            tracing::info!(page, "no results for page; treating response as empty");
            return Ok(json!({ "results": [] }));
        }

        serde_json::from_slice(&response.body).map_err(|e| ListingError::Parse(format!("{label}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedTransport;
    use crate::transport::HttpResponse;
    use rentscout_core::config::LimiterConfig;

    fn config() -> ListingConfig {
        ListingConfig {
            api_key: "secret".into(),
            base_url: "https://listings.test/search".into(),
            api_host: "listings.test".into(),
            timeout: Duration::from_secs(5),
        }
    }

    fn client(transport: Arc<ScriptedTransport>) -> ListingClient {
        let limiter = LimiterConfig { tokens_per_second: 100.0, jitter_factor: 0.0, ..LimiterConfig::default() };
        ListingClient::new(config(), transport, Arc::new(AdaptiveLimiter::new(limiter)))
    }

    #[test]
    fn test_config_from_app_requires_key() {
        let app = AppConfig::default();
        assert!(matches!(ListingConfig::from_app(&app), Err(ListingError::MissingApiKey)));

        let app = AppConfig { api_key: Some("k".into()), ..AppConfig::default() };
        let config = ListingConfig::from_app(&app).unwrap();
        assert_eq!(config.api_host, app.api_host);
        assert_eq!(config.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_config_from_env() {
        let saved: Vec<_> = ["RENTSCOUT_API_KEY", "RAPIDAPI_KEY"].map(|name| (name, std::env::var(name).ok())).into();
        unsafe {
            std::env::remove_var("RENTSCOUT_API_KEY");
            std::env::remove_var("RAPIDAPI_KEY");
        }
        assert!(matches!(ListingConfig::from_env(), Err(ListingError::MissingApiKey)));

        unsafe {
            std::env::set_var("RAPIDAPI_KEY", "fallback");
        }
        assert_eq!(ListingConfig::from_env().unwrap().api_key, "fallback");

        unsafe {
            std::env::set_var("RENTSCOUT_API_KEY", "primary");
        }
        assert_eq!(ListingConfig::from_env().unwrap().api_key, "primary");

        for (name, value) in saved {
            unsafe {
                match value {
                    Some(value) => std::env::set_var(name, value),
                    None => std::env::remove_var(name),
                }
            }
        }
    }

    #[tokio::test]
    async fn test_fetch_page_sends_headers_and_clamped_page() {
        let transport = Arc::new(ScriptedTransport::new([Ok(HttpResponse::new(200, r#"{"results": [{"id": 1}]}"#))]));
        let client = client(Arc::clone(&transport));
        let params = json!({"location": "Nashville, TN", "page": 7}).as_object().cloned().unwrap();

        let payload = client.fetch_page(&params, 0).await.unwrap();
        assert_eq!(extract_results(&payload).len(), 1);

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert_eq!(request.url, "https://listings.test/search");
        assert!(request.headers.contains(&("x-rapidapi-key".to_string(), "secret".to_string())));
        assert!(request.headers.contains(&("x-rapidapi-host".to_string(), "listings.test".to_string())));
        assert!(request.params.contains(&("page".to_string(), "1".to_string())));
        assert!(request.params.contains(&("location".to_string(), "Nashville, TN".to_string())));
    }

    #[tokio::test]
    async fn test_fetch_page_404_is_empty() {
        let transport = Arc::new(ScriptedTransport::new([Ok(HttpResponse::new(404, "not found"))]));
        let payload = client(transport).fetch_page(&Map::new(), 3).await.unwrap();
        assert_eq!(payload, json!({"results": []}));
    }

    #[tokio::test]
    async fn test_fetch_page_unauthorized() {
        let transport =
            Arc::new(ScriptedTransport::new([Ok(HttpResponse::new(
                403,
                r#"{"message": "You are not subscribed to this API."}"#,
            ))]));
        let err = client(transport).fetch_page(&Map::new(), 1).await.unwrap_err();
        match err {
            ListingError::Unauthorized { status, message } => {
                assert_eq!(status, 403);
                assert_eq!(message, "You are not subscribed to this API.");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_fetch_page_invalid_json() {
        let transport = Arc::new(ScriptedTransport::new([Ok(HttpResponse::new(200, "<html>"))]));
        let err = client(transport).fetch_page(&Map::new(), 2).await.unwrap_err();
        assert!(matches!(err, ListingError::Parse(msg) if msg.starts_with("page 2")));
    }
}
