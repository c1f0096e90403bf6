//! Value sanitizer.
//!
//! Embedded images encoded as data URIs tend to get copied into every structure a value passes through: the pending
//! buffer, both caches, and the durable record. Large ones are replaced with a short placeholder before they ever
//! get serialized.

use serde_json::Map;
use serde_json::Value;

/// How deep into nested arrays and objects the sanitizer looks. The root value is at depth 0.
pub const MAX_SANITIZE_DEPTH: usize = 6;
/// Strings longer than this which look like embedded images are replaced.
pub const INLINE_IMAGE_LIMIT: usize = 500;
pub const INLINE_IMAGE_PREFIX: &str = "data:image/";
pub const IMAGE_PLACEHOLDER: &str = "[embedded image removed]";

/// Sanitized deep copy of `value` using the default limits.
pub fn sanitize(value: &Value) -> Value {
    sanitize_with(value, MAX_SANITIZE_DEPTH, INLINE_IMAGE_LIMIT)
}

pub fn sanitize_with(value: &Value, max_depth: usize, limit: usize) -> Value {
    sanitize_at(value, 0, max_depth, limit)
}

fn sanitize_at(value: &Value, depth: usize, max_depth: usize, limit: usize) -> Value {
    // Past the cutoff the subtree is copied as is.
    if depth > max_depth {
        return value.clone();
    }

    match value {
        Value::String(s) if is_inline_image(s, limit) => Value::String(IMAGE_PLACEHOLDER.to_string()),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| sanitize_at(item, depth + 1, max_depth, limit))
                .collect(),
        ),
        Value::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), sanitize_at(v, depth + 1, max_depth, limit)))
                .collect::<Map<String, Value>>(),
        ),
        other => other.clone(),
    }
}

#[inline]
fn is_inline_image(s: &str, limit: usize) -> bool {
    s.starts_with(INLINE_IMAGE_PREFIX) && s.chars().count() > limit
}
