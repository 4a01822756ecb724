//! Listing search response handling.
//!
//! The search endpoint is inconsistent about where it puts results, so
//! extraction tries the known container shapes in a fixed order.

use rentscout_core::Record;
use serde_json::Value;

use crate::limiter::{LimitedResponse, Verdict};
use crate::transport::HttpResponse;

/// Keys that may hold a short error description, in priority order.
const ERROR_KEYS: [&str; 5] = ["message", "detail", "error", "errors", "title"];

/// Longest raw-body excerpt used as an error message.
const ERROR_EXCERPT_CHARS: usize = 200;

fn objects(items: &[Value]) -> Vec<Record> {
    items.iter().filter_map(Value::as_object).cloned().collect()
}

/// Pull the result records out of a page payload.
///
/// Tries a top-level list, then `results`, `props`, `matchingResults` and
/// `data.props`; the first list found wins. Non-object items are dropped.
pub fn extract_results(payload: &Value) -> Vec<Record> {
    if let Value::Array(items) = payload {
        return objects(items);
    }
    let Value::Object(map) = payload else {
        return Vec::new();
    };

    let nested = map.get("data").and_then(Value::as_object).and_then(|data| data.get("props"));
    [map.get("results"), map.get("props"), map.get("matchingResults"), nested]
        .into_iter()
        .flatten()
        .find_map(Value::as_array)
        .map(|items| objects(items))
        .unwrap_or_default()
}

/// The `totalPages` hint, when the payload carries one as an integer.
pub fn total_pages(payload: &Value) -> Option<u64> {
    payload.get("totalPages").and_then(Value::as_u64)
}

fn first_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Array(items) => {
            items.iter().filter_map(Value::as_str).map(str::trim).find(|s| !s.is_empty()).map(String::from)
        }
        _ => None,
    }
}

/// Short human-readable reason from an error response body.
pub fn extract_error_message(response: &HttpResponse) -> String {
    if let Ok(Value::Object(payload)) = serde_json::from_slice::<Value>(&response.body)
        && let Some(message) = ERROR_KEYS.iter().filter_map(|key| payload.get(*key)).find_map(first_text)
    {
        return message;
    }
    response.text().trim().chars().take(ERROR_EXCERPT_CHARS).collect()
}

impl LimitedResponse for HttpResponse {
    /// 404 is the API's way of saying a page has no results.
    fn verdict(&self) -> Verdict {
        match self.status {
            200..=299 | 404 => Verdict::Accepted,
            429 => Verdict::RateLimited { retry_after: self.retry_after() },
            _ => Verdict::Rejected,
        }
    }

    fn status(&self) -> u16 {
        self.status
    }

    fn error_message(&self) -> String {
        extract_error_message(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn test_extract_results_fallback_order() {
        assert_eq!(extract_results(&json!([{"id": 1}, 2, "x"])).len(), 1);
        assert_eq!(extract_results(&json!({"results": [{"id": 1}], "props": [{"id": 2}, {"id": 3}]})).len(), 1);
        assert_eq!(extract_results(&json!({"props": [{"id": 2}, {"id": 3}]})).len(), 2);
        assert_eq!(extract_results(&json!({"matchingResults": [{"id": 4}]}))[0]["id"], json!(4));
        assert_eq!(extract_results(&json!({"data": {"props": [{"id": 5}]}}))[0]["id"], json!(5));
    }

    #[test]
    fn test_extract_results_skips_non_list_candidates() {
        let payload = json!({"results": {"id": 1}, "props": [{"id": 2}]});
        assert_eq!(extract_results(&payload)[0]["id"], json!(2));
        assert!(extract_results(&json!({"data": []})).is_empty());
        assert!(extract_results(&json!("nope")).is_empty());
    }

    #[test]
    fn test_total_pages_requires_integer() {
        assert_eq!(total_pages(&json!({"totalPages": 3})), Some(3));
        assert_eq!(total_pages(&json!({"totalPages": "3"})), None);
        assert_eq!(total_pages(&json!([])), None);
    }

    #[test]
    fn test_error_message_prefers_known_keys() {
        let response = HttpResponse::new(403, r#"{"detail": "  ", "error": "You are not subscribed"}"#);
        assert_eq!(extract_error_message(&response), "You are not subscribed");

        let response = HttpResponse::new(400, r#"{"errors": [1, "", " bad location "]}"#);
        assert_eq!(extract_error_message(&response), "bad location");
    }

    #[test]
    fn test_error_message_falls_back_to_excerpt() {
        let body = format!("  {}  ", "x".repeat(500));
        let response = HttpResponse::new(502, body);
        assert_eq!(extract_error_message(&response).len(), 200);
        assert_eq!(extract_error_message(&HttpResponse::new(500, "")), "");
    }

    #[test]
    fn test_verdicts() {
        assert_eq!(HttpResponse::new(200, "").verdict(), Verdict::Accepted);
        assert_eq!(HttpResponse::new(404, "").verdict(), Verdict::Accepted);
        assert_eq!(HttpResponse::new(401, "").verdict(), Verdict::Rejected);
        assert_eq!(HttpResponse::new(503, "").verdict(), Verdict::Rejected);
        assert_eq!(
            HttpResponse::new(429, "").with_header("Retry-After", "3").verdict(),
            Verdict::RateLimited { retry_after: Some(Duration::from_secs(3)) }
        );
    }
}
