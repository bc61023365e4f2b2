//! # Collection Admin
//!
//! Adds or removes whole top-level keys of the document at runtime. The CRUD
//! router resolves resources per request, so a created collection is
//! reachable immediately without re-mounting anything.
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::{
    database::Document,
    error::AppError::{
        self, CollectionExists, CollectionMissing, IdOverflow, InvalidCollectionName,
        ProtectedCollection,
    },
};

pub const PROTECTED_COLLECTIONS: [&str; 2] = ["users", "admin"];

static COLLECTION_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_-]+$").expect("collection name pattern"));

pub fn validate_name(name: &str) -> Result<(), AppError> {
    if COLLECTION_NAME.is_match(name) {
        Ok(())
    } else {
        Err(InvalidCollectionName)
    }
}

/// Inserts `name` seeded from `body`, returning how many records it holds.
pub fn create(document: &mut Document, name: &str, body: Option<Value>) -> Result<usize, AppError> {
    validate_name(name)?;

    if document.contains_key(name) {
        return Err(CollectionExists);
    }

    let records = initial_records(body)?;
    let count = records.len();

    document.insert(name.to_string(), Value::Array(records));

    Ok(count)
}

pub fn delete(document: &mut Document, name: &str) -> Result<(), AppError> {
    validate_name(name)?;

    if !document.contains_key(name) {
        return Err(CollectionMissing(name.to_string()));
    }

    if PROTECTED_COLLECTIONS.contains(&name) {
        return Err(ProtectedCollection);
    }

    document.shift_remove(name);

    Ok(())
}

/// Normalizes a request body into object records with ids.
///
/// Records without an id are numbered after the highest numeric id supplied.
fn initial_records(body: Option<Value>) -> Result<Vec<Value>, AppError> {
    let raw = match body {
        Some(Value::Array(items)) => items,
        Some(object @ Value::Object(_)) => vec![object],
        _ => Vec::new(),
    };

    let max_existing = raw
        .iter()
        .filter_map(|item| item.get("id").and_then(Value::as_f64))
        .fold(0.0_f64, f64::max);

    // non-integer maxima round down, the counter itself is always integral
    let mut next_id = (max_existing.floor() as i64).checked_add(1);

    raw.into_iter()
        .filter_map(|item| match item {
            Value::Object(record) => Some(record),
            _ => None,
        })
        .map(|mut record| {
            if record.get("id").is_none_or(Value::is_null) {
                let id = next_id.ok_or(IdOverflow)?;
                record.insert("id".into(), Value::from(id));
                next_id = id.checked_add(1);
            }
            Ok(Value::Object(record))
        })
        .collect()
}
