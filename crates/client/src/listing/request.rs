//! Listing search request parameters.

use serde_json::{Map, Value};

/// Query parameters for one page: `base` with `page` overridden.
///
/// Pages below 1 are clamped to 1.
pub fn page_params(base: &Map<String, Value>, page: u32) -> Map<String, Value> {
    let mut params = base.clone();
    params.insert("page".into(), Value::from(page.max(1)));
    params
}

/// Render parameters as URL query pairs.
///
/// Strings are sent raw, nulls are omitted and everything else uses its JSON text.
pub fn query_pairs(params: &Map<String, Value>) -> Vec<(String, String)> {
    params
        .iter()
        .filter_map(|(key, value)| {
            let text = match value {
                Value::Null => return None,
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            Some((key.clone(), text))
        })
        .collect()
}

/// Split a semicolon-separated location list.
///
/// Entries are trimmed, empty ones dropped, and at most `limit` kept.
pub fn split_locations(raw: &str, limit: Option<usize>) -> Vec<String> {
    let cleaned = raw.split(';').map(str::trim).filter(|chunk| !chunk.is_empty()).map(String::from);
    match limit {
        Some(limit) => cleaned.take(limit).collect(),
        None => cleaned.collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_page_params_overrides_only_page() {
        let base = object(json!({"status_type": "ForRent", "page": 9}));
        let params = page_params(&base, 3);
        assert_eq!(params.get("page"), Some(&json!(3)));
        assert_eq!(params.get("status_type"), Some(&json!("ForRent")));
        assert_eq!(base.get("page"), Some(&json!(9)));
    }

    #[test]
    fn test_page_params_clamps_zero() {
        let params = page_params(&Map::new(), 0);
        assert_eq!(params.get("page"), Some(&json!(1)));
    }

    #[test]
    fn test_query_pairs() {
        let params = object(json!({"location": "37206, Nashville, TN", "bedsMin": 1, "flag": true, "skip": null}));
        let pairs = query_pairs(&params);
        assert_eq!(
            pairs,
            vec![
                ("location".to_string(), "37206, Nashville, TN".to_string()),
                ("bedsMin".to_string(), "1".to_string()),
                ("flag".to_string(), "true".to_string()),
            ]
        );
    }

    #[test]
    fn test_split_locations() {
        let raw = " 37206, Nashville, TN; ;Midtown, Nashville, TN;  East Nashville ;";
        assert_eq!(
            split_locations(raw, None),
            vec!["37206, Nashville, TN", "Midtown, Nashville, TN", "East Nashville"]
        );
        assert_eq!(split_locations(raw, Some(2)).len(), 2);
        assert!(split_locations("", None).is_empty());
        assert!(split_locations(" ; ; ", None).is_empty());
    }
}
