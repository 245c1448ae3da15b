//! Endpoint templating and query encoding

use serde_json::Value;

use crate::types::{Result, TransportError};

/// Substitute `{name}` placeholders with URL-encoded path parameters
pub fn resolve_template(template: &str, params: &[(String, String)]) -> Result<String> {
    let mut resolved = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        resolved.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let end = after.find('}').ok_or_else(|| {
            TransportError::Config(format!("Unclosed placeholder in endpoint {}", template))
        })?;
        let name = &after[..end];
        let value = params
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
            .ok_or_else(|| {
                TransportError::Config(format!(
                    "Missing path parameter '{}' for endpoint {}",
                    name, template
                ))
            })?;
        resolved.push_str(&urlencoding::encode(value));
        rest = &after[end + 1..];
    }
    resolved.push_str(rest);
    Ok(resolved)
}

/// Encode query parameters, skipping null values.
///
/// Arrays repeat the key per element; objects are sent as compact JSON.
pub fn encode_query(params: &[(String, Value)]) -> String {
    let mut pairs = Vec::new();
    for (key, value) in params {
        match value {
            Value::Null => {}
            Value::Array(items) => {
                for item in items.iter().filter(|item| !item.is_null()) {
                    pairs.push(encode_pair(key, item));
                }
            }
            other => pairs.push(encode_pair(key, other)),
        }
    }
    pairs.join("&")
}

fn encode_pair(key: &str, value: &Value) -> String {
    let raw = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    format!("{}={}", urlencoding::encode(key), urlencoding::encode(&raw))
}

/// Join base URL, path, and an encoded query string
pub fn join_url(base_url: &str, path: &str, query: &str) -> String {
    let mut url = if path.starts_with("http://") || path.starts_with("https://") {
        path.to_string()
    } else {
        format!(
            "{}/{}",
            base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    };
    if !query.is_empty() {
        url.push(if url.contains('?') { '&' } else { '?' });
        url.push_str(query);
    }
    url
}
