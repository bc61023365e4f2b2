use axum::body::Bytes;
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

use crate::error::AppError;

/// Fields never echoed back for a user record.
pub const PRIVATE_USER_FIELDS: [&str; 3] = ["password", "createdAt", "updatedAt"];

/// ISO-8601 UTC with milliseconds, e.g. `2025-11-14T08:30:00.000Z`.
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Empty bodies are `None`; anything else must be JSON.
pub fn parse_body(body: &Bytes) -> Result<Option<Value>, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }

    serde_json::from_slice(body)
        .map(Some)
        .map_err(|_| AppError::MalformedPayload)
}

/// String form used when comparing against path segments and query values.
///
/// Arrays join their elements with commas and objects collapse to a fixed
/// marker, the way query strings have always compared against them.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(stringify).collect::<Vec<_>>().join(","),
        Value::Object(_) => "[object Object]".to_string(),
        other => other.to_string(),
    }
}

pub fn id_matches(record: &Value, id: &str) -> bool {
    record
        .get("id")
        .is_some_and(|record_id| !record_id.is_null() && stringify(record_id) == id)
}

/// Resolves `author.name` style paths.
pub fn lookup<'a>(record: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(record, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

pub fn public_user(user: &Value) -> Map<String, Value> {
    let mut fields = user.as_object().cloned().unwrap_or_default();

    for private in PRIVATE_USER_FIELDS {
        fields.shift_remove(private);
    }

    fields
}

/// `posts` -> `post`, `categories` -> `category`.
pub fn singular(name: &str) -> String {
    if let Some(stem) = name.strip_suffix("ies") {
        format!("{stem}y")
    } else if let Some(stem) = name.strip_suffix('s') {
        stem.to_string()
    } else {
        name.to_string()
    }
}

/// `post` -> `posts`, `category` -> `categories`.
pub fn plural(name: &str) -> String {
    match name.strip_suffix('y') {
        Some(stem) if !stem.ends_with(['a', 'e', 'i', 'o', 'u']) => format!("{stem}ies"),
        _ if name.ends_with('s') => name.to_string(),
        _ => format!("{name}s"),
    }
}

/// Foreign key a child record uses to point at a `resource` record.
pub fn foreign_key(resource: &str) -> String {
    format!("{}Id", singular(resource))
}
