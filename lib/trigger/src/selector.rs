//! Path-like selectors into JSON payloads.
//!
//! A selector is a dot separated path such as `pull_request.head.ref`.
//! Array elements are addressed either with a numeric segment
//! (`commits.0.id`) or with brackets (`commits[0].id`). A leading `$.` is
//! accepted and ignored.

use serde_json::Value;

/// Selects the value at `path` within `payload`.
///
/// Returns `None` when any segment is missing or the path walks into a
/// scalar.
#[must_use]
pub fn select<'a>(payload: &'a Value, path: &str) -> Option<&'a Value> {
    let path = path.trim();
    let path = path.strip_prefix("$.").unwrap_or(path);
    if path.is_empty() || path == "$" {
        return Some(payload);
    }

    let mut current = payload;
    for segment in path.split('.') {
        let (key, indices) = split_indices(segment)?;
        if !key.is_empty() {
            current = step(current, key)?;
        }
        for index in indices {
            current = current.as_array()?.get(index)?;
        }
    }
    Some(current)
}

/// Selects the value at `path` and renders it as a string.
///
/// Strings are returned without quotes; numbers and booleans use their JSON
/// text; `null` is treated as absent; objects and arrays are rendered as
/// compact JSON.
#[must_use]
pub fn select_string(payload: &Value, path: &str) -> Option<String> {
    select(payload, path).and_then(value_to_string)
}

/// Renders a JSON value as a plain string.
#[must_use]
pub fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(_) | Value::Object(_) => Some(value.to_string()),
    }
}

fn step<'a>(current: &'a Value, key: &str) -> Option<&'a Value> {
    match current {
        Value::Object(map) => map.get(key),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}

fn split_indices(segment: &str) -> Option<(&str, Vec<usize>)> {
    let Some(open) = segment.find('[') else {
        return Some((segment, Vec::new()));
    };
    let key = &segment[..open];
    let mut indices = Vec::new();
    let mut rest = &segment[open..];
    while let Some(stripped) = rest.strip_prefix('[') {
        let close = stripped.find(']')?;
        indices.push(stripped[..close].trim().parse().ok()?);
        rest = &stripped[close + 1..];
    }
    if !rest.is_empty() {
        return None;
    }
    Some((key, indices))
}
