//! Deterministic cache key construction.
//!
//! Parameters are serialized, their names sorted, and each `name=value` pair
//! URL-encoded, so `{"q": "rust", "page": 2}` and `{"page": 2, "q": "rust"}`
//! produce the same key: `search:page=2&q=rust`. Null parameters are
//! omitted, which makes an unset `Option` equivalent to a missing argument.
//!
//! Scalars are rendered as their text, the way a query string carries them,
//! so `{"page": "2"}` and `{"page": 2}` name the same query. Callers that
//! cache under one prefix must read back the type they stored.

use crate::Result;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Keys longer than this are replaced by a digest of their parameters
pub const MAX_KEY_LEN: usize = 250;

/// Build a deterministic cache key from a prefix and a set of parameters
pub fn generate_key<P>(prefix: &str, params: &P) -> Result<String>
where
    P: Serialize + ?Sized,
{
    let encoded = match serde_json::to_value(params)? {
        Value::Object(map) => {
            let mut pairs: Vec<(&String, &Value)> =
                map.iter().filter(|(_, value)| !value.is_null()).collect();
            pairs.sort_by(|a, b| a.0.cmp(b.0));

            pairs
                .into_iter()
                .map(|(name, value)| {
                    format!(
                        "{}={}",
                        urlencoding::encode(name),
                        urlencoding::encode(&canonical(value))
                    )
                })
                .collect::<Vec<_>>()
                .join("&")
        }
        Value::Null => String::new(),
        other => urlencoding::encode(&canonical(&other)).into_owned(),
    };

    if prefix.len() + 1 + encoded.len() > MAX_KEY_LEN {
        let digest = Sha256::digest(encoded.as_bytes());
        return Ok(format!("{prefix}:sha256:{digest:x}"));
    }

    Ok(format!("{prefix}:{encoded}"))
}

/// Render a parameter value; strings are bare, containers are canonical JSON
fn canonical(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => canonical_json(other),
    }
}

/// JSON with object keys sorted at every depth, independent of map ordering
fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut names: Vec<&String> = map.keys().collect();
            names.sort();
            let body = names
                .into_iter()
                .map(|name| format!("{}:{}", Value::String(name.clone()), canonical_json(&map[name])))
                .collect::<Vec<_>>()
                .join(",");
            format!("{{{body}}}")
        }
        Value::Array(items) => {
            let body = items.iter().map(canonical_json).collect::<Vec<_>>().join(",");
            format!("[{body}]")
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scalars_key_by_their_text() {
        let text = generate_key("search", &json!({"page": "2", "open": "true"})).unwrap();
        let typed = generate_key("search", &json!({"page": 2, "open": true})).unwrap();
        assert_eq!(text, typed);
        assert_eq!(typed, "search:open=true&page=2");
    }

    #[test]
    fn test_parameter_order_does_not_matter() {
        let a = generate_key("search", &json!({"q": "rust", "page": 2})).unwrap();
        let b = generate_key("search", &json!({"page": 2, "q": "rust"})).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, "search:page=2&q=rust");
    }

    #[test]
    fn test_values_are_url_encoded() {
        let key = generate_key("news", &json!({"q": "a&b=c d"})).unwrap();
        assert_eq!(key, "news:q=a%26b%3Dc%20d");
    }

    #[test]
    fn test_nulls_are_omitted() {
        #[derive(Serialize)]
        struct Query<'a> {
            q: &'a str,
            limit: Option<u32>,
        }

        let with_none = generate_key("s", &Query { q: "x", limit: None }).unwrap();
        let without = generate_key("s", &json!({"q": "x"})).unwrap();
        assert_eq!(with_none, without);
    }

    #[test]
    fn test_nested_objects_are_canonical() {
        let a = generate_key("s", &json!({"filter": {"b": 1, "a": [2, {"y": 1, "x": 0}]}})).unwrap();
        let b = generate_key("s", &json!({"filter": {"a": [2, {"x": 0, "y": 1}], "b": 1}})).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_different_values_produce_different_keys() {
        let a = generate_key("weather", &json!({"city": "Oslo"})).unwrap();
        let b = generate_key("weather", &json!({"city": "Bergen"})).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_long_keys_are_hashed() {
        let long = "x".repeat(400);
        let key = generate_key("papers", &json!({"q": long})).unwrap();
        assert!(key.starts_with("papers:sha256:"));
        assert_eq!(key.len(), "papers:sha256:".len() + 64);

        let again = generate_key("papers", &json!({"q": "x".repeat(400)})).unwrap();
        assert_eq!(key, again);
    }

    #[test]
    fn test_scalar_and_empty_params() {
        assert_eq!(generate_key("doi", "10.1000/xyz").unwrap(), "doi:10.1000%2Fxyz");
        assert_eq!(generate_key("ping", &json!(null)).unwrap(), "ping:");
    }
}
