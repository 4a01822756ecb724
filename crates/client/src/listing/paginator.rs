//! Page-by-page traversal of a listing search.

use std::sync::Arc;

use futures_util::stream::{self, Stream, TryStreamExt};
use rentscout_core::{Record, RequestCache};
use serde_json::{Map, Value};

use super::error::ListingError;
use super::request::page_params;
use super::response::{extract_results, total_pages};
use super::ListingClient;

/// Drives `fetch_page` from page 1 until the results run out.
///
/// Pagination stops at the first empty page, after the page that reaches the
/// `totalPages` hint, or at `max_pages`, whichever comes first. Each page is
/// looked up in the cache (keyed by its full query parameters) before the
/// network is touched.
#[derive(Debug, Clone, Copy)]
pub struct Paginator<'a> {
    client: &'a ListingClient,
    cache: Option<&'a RequestCache>,
}

impl<'a> Paginator<'a> {
    pub fn new(client: &'a ListingClient, cache: Option<&'a RequestCache>) -> Self {
        Self { client, cache }
    }

    /// One page, served from the cache when possible.
    pub async fn fetch(&self, base: &Map<String, Value>, page: u32) -> Result<Value, ListingError> {
        let key = page_params(base, page);
        if let Some(cache) = self.cache
            && let Some(payload) = cache.get(&key).await
        {
            tracing::debug!(page, "page served from cache");
            return Ok(payload);
        }

        let payload = self.client.fetch_page(base, page).await?;
        if let Some(cache) = self.cache {
            cache.put(&key, payload.clone()).await;
        }
        Ok(payload)
    }

    /// Lazy stream of non-empty result pages.
    ///
    /// Every call starts again from page 1. An error ends the stream.
    pub fn pages(
        &self,
        base: Map<String, Value>,
        max_pages: u32,
    ) -> impl Stream<Item = Result<Vec<Record>, ListingError>> + 'a {
        let this = *self;
        let base = Arc::new(base);
        stream::try_unfold(Some(1u32), move |next| this.advance(Arc::clone(&base), next, max_pages))
    }

    async fn advance(
        self,
        base: Arc<Map<String, Value>>,
        next: Option<u32>,
        max_pages: u32,
    ) -> Result<Option<(Vec<Record>, Option<u32>)>, ListingError> {
        let Some(page) = next.filter(|page| *page <= max_pages) else {
            return Ok(None);
        };

        tracing::info!(page, "fetching page");
        let payload = self.fetch(&base, page).await?;
        let results = extract_results(&payload);
        if results.is_empty() {
            tracing::info!(page, "no results returned; stopping pagination");
            return Ok(None);
        }

        let next = match total_pages(&payload) {
            Some(total) if u64::from(page) >= total => {
                tracing::info!(total, "reached last page hinted by API");
                None
            }
            _ => page.checked_add(1),
        };
        Ok(Some((results, next)))
    }

    /// Lazy stream of records across all pages.
    pub fn iterate(
        &self,
        base: Map<String, Value>,
        max_pages: u32,
    ) -> impl Stream<Item = Result<Record, ListingError>> + 'a {
        self.pages(base, max_pages)
            .map_ok(|records| stream::iter(records.into_iter().map(Ok::<Record, ListingError>)))
            .try_flatten()
    }

    /// Every record across all pages.
    pub async fn collect(&self, base: Map<String, Value>, max_pages: u32) -> Result<Vec<Record>, ListingError> {
        self.iterate(base, max_pages).try_collect().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limiter::AdaptiveLimiter;
    use crate::listing::ListingConfig;
    use crate::testing::ScriptedTransport;
    use crate::transport::{HttpResponse, Transport};
    use futures_util::StreamExt;
    use rentscout_core::config::LimiterConfig;
    use serde_json::json;
    use std::time::Duration;

    fn client(transport: &Arc<ScriptedTransport>) -> ListingClient {
        let config = ListingConfig {
            api_key: "k".into(),
            base_url: "https://listings.test/search".into(),
            api_host: "listings.test".into(),
            timeout: Duration::from_secs(5),
        };
        let limiter = LimiterConfig { tokens_per_second: 100.0, jitter_factor: 0.0, ..LimiterConfig::default() };
        let transport: Arc<dyn Transport> = transport.clone();
        ListingClient::new(config, transport, Arc::new(AdaptiveLimiter::new(limiter)))
    }

    fn ok(body: Value) -> Result<HttpResponse, crate::transport::TransportError> {
        Ok(HttpResponse::new(200, body.to_string()))
    }

    fn base() -> Map<String, Value> {
        json!({"status_type": "ForRent"}).as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_stops_at_first_empty_page() {
        let transport =
            Arc::new(ScriptedTransport::new([ok(json!({"results": [{"id": 1}]})), ok(json!({"results": []}))]));
        let client = client(&transport);

        let records = Paginator::new(&client, None).collect(base(), 5).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["id"], json!(1));
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn test_stops_at_total_pages_hint() {
        let transport = Arc::new(ScriptedTransport::new([
            ok(json!({"props": [{"id": 1}, {"id": 2}], "totalPages": 2})),
            ok(json!({"props": [{"id": 3}], "totalPages": 2})),
            ok(json!({"props": [{"id": 4}]})),
        ]));
        let client = client(&transport);

        let records = Paginator::new(&client, None).collect(base(), 10).await.unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn test_stops_at_page_ceiling() {
        let transport = Arc::new(ScriptedTransport::new((1..=5).map(|id| ok(json!({"results": [{"id": id}]})))));
        let client = client(&transport);

        let records = Paginator::new(&client, None).collect(base(), 3).await.unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(transport.calls(), 3);
        let pages: Vec<_> = transport
            .requests()
            .iter()
            .filter_map(|r| r.params.iter().find(|(k, _)| k == "page").map(|(_, v)| v.clone()))
            .collect();
        assert_eq!(pages, ["1", "2", "3"]);
    }

    #[tokio::test]
    async fn test_not_found_ends_pagination() {
        let transport = Arc::new(ScriptedTransport::new([
            ok(json!([{"id": 1}])),
            Ok(HttpResponse::new(404, "")),
        ]));
        let client = client(&transport);

        let records = Paginator::new(&client, None).collect(base(), 5).await.unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn test_terminal_error_ends_stream() {
        let transport = Arc::new(ScriptedTransport::new([
            ok(json!({"results": [{"id": 1}]})),
            Ok(HttpResponse::new(500, r#"{"message": "boom"}"#)),
        ]));
        let client = client(&transport);
        let paginator = Paginator::new(&client, None);

        let items: Vec<_> = paginator.iterate(base(), 5).collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(&items[1], Err(ListingError::Http { status: 500, .. })));
    }

    #[tokio::test]
    async fn test_cached_pages_skip_network() {
        let transport = Arc::new(ScriptedTransport::new([
            ok(json!({"results": [{"id": 1}], "totalPages": 1})),
        ]));
        let client = client(&transport);
        let cache = RequestCache::new(10, Duration::from_secs(60));
        let paginator = Paginator::new(&client, Some(&cache));

        let first = paginator.collect(base(), 5).await.unwrap();
        let second = paginator.collect(base(), 5).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(transport.calls(), 1);
        assert_eq!(cache.stats().hits, 1);
    }

    #[tokio::test]
    async fn test_iterate_restarts_from_first_page() {
        let transport = Arc::new(ScriptedTransport::new([
            ok(json!({"results": [{"id": 1}], "totalPages": 1})),
            ok(json!({"results": [{"id": 2}], "totalPages": 1})),
        ]));
        let client = client(&transport);
        let paginator = Paginator::new(&client, None);

        assert_eq!(paginator.collect(base(), 5).await.unwrap()[0]["id"], json!(1));
        assert_eq!(paginator.collect(base(), 5).await.unwrap()[0]["id"], json!(2));
        assert!(transport.requests().iter().all(|r| r.params.contains(&("page".into(), "1".into()))));
    }
}
