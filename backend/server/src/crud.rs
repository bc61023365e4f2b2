//! # Generic Resources
//!
//! Every top-level key of the document is served without registration.
//!
//! - Array values are plural resources: list, get/put/patch/delete by id, insert
//! - Object values are singular resources: get, put/post to replace, patch to merge
//! - `/{resource}/{id}/{nested}` lists or inserts `{nested}` records pointing
//!   back through `<resource>Id`
//!
//! Resources are looked up per request, so collections created through the
//! admin routes are live immediately.
use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::State as AxumState,
    http::{HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::{Map, Value, json};
use uuid::Uuid;

use crate::{
    database::Document,
    error::AppError::{self, DuplicateId, MalformedPayload, RecordMissing, ResourceMissing},
    extract::{Path, Query},
    query::{ListQuery, Listing, attach_relations, list},
    state::State,
    utils::{foreign_key, id_matches, parse_body, stringify},
};

pub const TOTAL_COUNT_HEADER: HeaderName = HeaderName::from_static("x-total-count");

type Params = Query<Vec<(String, String)>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Update {
    Replace,
    Merge,
}

pub async fn list_handler(
    AxumState(state): AxumState<Arc<State>>,
    Path(resource): Path<String>,
    Query(params): Params,
) -> Result<Response, AppError> {
    let query = ListQuery::parse(params);
    list_response(&state, &resource, &query).await
}

pub async fn create_handler(
    AxumState(state): AxumState<Arc<State>>,
    Path(resource): Path<String>,
    body: Bytes,
) -> Result<Response, AppError> {
    let body = parse_body(&body)?.ok_or(MalformedPayload)?;

    let created = state
        .database
        .write(|document| insert(document, &resource, body))
        .await?;

    Ok((StatusCode::CREATED, Json(created)).into_response())
}

pub async fn replace_singular_handler(
    AxumState(state): AxumState<Arc<State>>,
    Path(resource): Path<String>,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let body = parse_body(&body)?.ok_or(MalformedPayload)?;

    state
        .database
        .write(|document| update_singular(document, &resource, body, Update::Replace))
        .await
        .map(Json)
}

pub async fn patch_singular_handler(
    AxumState(state): AxumState<Arc<State>>,
    Path(resource): Path<String>,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let body = parse_body(&body)?.ok_or(MalformedPayload)?;

    state
        .database
        .write(|document| update_singular(document, &resource, body, Update::Merge))
        .await
        .map(Json)
}

pub async fn get_handler(
    AxumState(state): AxumState<Arc<State>>,
    Path((resource, id)): Path<(String, String)>,
    Query(params): Params,
) -> Result<Json<Value>, AppError> {
    let query = ListQuery::parse(params);

    state
        .database
        .read(|document| -> Result<Json<Value>, AppError> {
            let mut record = records(document, &resource)?
                .iter()
                .find(|record| id_matches(record, &id))
                .cloned()
                .ok_or_else(|| RecordMissing(id.clone()))?;

            attach_relations(document, &resource, &mut record, &query.embed, &query.expand);
            Ok(Json(record))
        })
        .await
}

pub async fn replace_handler(
    AxumState(state): AxumState<Arc<State>>,
    Path((resource, id)): Path<(String, String)>,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    update_response(&state, &resource, &id, body, Update::Replace).await
}

pub async fn patch_handler(
    AxumState(state): AxumState<Arc<State>>,
    Path((resource, id)): Path<(String, String)>,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    update_response(&state, &resource, &id, body, Update::Merge).await
}

pub async fn delete_handler(
    AxumState(state): AxumState<Arc<State>>,
    Path((resource, id)): Path<(String, String)>,
) -> Result<Json<Value>, AppError> {
    state
        .database
        .write(|document| remove(document, &resource, &id))
        .await?;

    Ok(Json(json!({})))
}

pub async fn nested_list_handler(
    AxumState(state): AxumState<Arc<State>>,
    Path((resource, id, nested)): Path<(String, String, String)>,
    Query(params): Params,
) -> Result<Response, AppError> {
    let mut query = ListQuery::parse(params);
    query.require(&foreign_key(&resource), &id);

    list_response(&state, &nested, &query).await
}

pub async fn nested_create_handler(
    AxumState(state): AxumState<Arc<State>>,
    Path((resource, id, nested)): Path<(String, String, String)>,
    body: Bytes,
) -> Result<Response, AppError> {
    let mut body = parse_body(&body)?.ok_or(MalformedPayload)?;
    let fields = body.as_object_mut().ok_or(MalformedPayload)?;

    // numeric path ids are stored as numbers so they compare equal to `id` fields
    let parent_id = id.parse::<i64>().map(Value::from).unwrap_or_else(|_| Value::from(id));
    fields.insert(foreign_key(&resource), parent_id);

    let created = state
        .database
        .write(|document| insert(document, &nested, body))
        .await?;

    Ok((StatusCode::CREATED, Json(created)).into_response())
}

enum Found {
    Plural(Listing),
    Singular(Value),
}

async fn list_response(
    state: &State,
    resource: &str,
    query: &ListQuery,
) -> Result<Response, AppError> {
    let found = state
        .database
        .read(|document| match document.get(resource) {
            Some(Value::Array(items)) => list(document, resource, items, query).map(Found::Plural),
            Some(singular @ Value::Object(_)) => Ok(Found::Singular(singular.clone())),
            _ => Err(ResourceMissing(resource.to_string())),
        })
        .await?;

    let listing = match found {
        Found::Singular(value) => return Ok(Json(value).into_response()),
        Found::Plural(listing) => listing,
    };

    let mut response = Json(listing.records).into_response();
    if let Some(total) = listing.total {
        response
            .headers_mut()
            .insert(TOTAL_COUNT_HEADER, HeaderValue::from(total));
    }

    Ok(response)
}

async fn update_response(
    state: &State,
    resource: &str,
    id: &str,
    body: Bytes,
    mode: Update,
) -> Result<Json<Value>, AppError> {
    let body = parse_body(&body)?.ok_or(MalformedPayload)?;

    state
        .database
        .write(|document| update(document, resource, id, body, mode))
        .await
        .map(Json)
}

fn records<'a>(document: &'a Document, resource: &str) -> Result<&'a Vec<Value>, AppError> {
    match document.get(resource) {
        Some(Value::Array(items)) => Ok(items),
        _ => Err(ResourceMissing(resource.to_string())),
    }
}

fn records_mut<'a>(
    document: &'a mut Document,
    resource: &str,
) -> Result<&'a mut Vec<Value>, AppError> {
    match document.get_mut(resource) {
        Some(Value::Array(items)) => Ok(items),
        _ => Err(ResourceMissing(resource.to_string())),
    }
}

/// Appends `body` to a plural resource, or replaces a singular one.
pub fn insert(document: &mut Document, resource: &str, body: Value) -> Result<Value, AppError> {
    if let Some(Value::Object(_)) = document.get(resource) {
        return update_singular(document, resource, body, Update::Replace);
    }

    let items = records_mut(document, resource)?;
    let Value::Object(mut record) = body else {
        return Err(MalformedPayload);
    };

    match record.get("id").filter(|id| !id.is_null()).map(stringify) {
        Some(id) => {
            if items.iter().any(|existing| id_matches(existing, &id)) {
                return Err(DuplicateId(id));
            }
        }
        None => {
            record.insert("id".into(), next_id(items));
        }
    }

    let record = Value::Object(record);
    items.push(record.clone());

    Ok(record)
}

pub fn update(
    document: &mut Document,
    resource: &str,
    id: &str,
    body: Value,
    mode: Update,
) -> Result<Value, AppError> {
    let Value::Object(body) = body else {
        return Err(MalformedPayload);
    };

    let record = records_mut(document, resource)?
        .iter_mut()
        .find(|record| id_matches(record, id))
        .ok_or_else(|| RecordMissing(id.to_string()))?;

    let record_id = record.get("id").cloned().unwrap_or(Value::Null);
    apply(record, body, mode);

    if let Value::Object(fields) = &mut *record {
        fields.insert("id".into(), record_id);
    }

    Ok(record.clone())
}

pub fn remove(document: &mut Document, resource: &str, id: &str) -> Result<(), AppError> {
    let items = records_mut(document, resource)?;
    let position = items
        .iter()
        .position(|record| id_matches(record, id))
        .ok_or_else(|| RecordMissing(id.to_string()))?;

    items.remove(position);

    Ok(())
}

fn update_singular(
    document: &mut Document,
    resource: &str,
    body: Value,
    mode: Update,
) -> Result<Value, AppError> {
    let Value::Object(body) = body else {
        return Err(MalformedPayload);
    };

    match document.get_mut(resource) {
        Some(current @ Value::Object(_)) => {
            apply(current, body, mode);
            Ok(current.clone())
        }
        _ => Err(ResourceMissing(resource.to_string())),
    }
}

fn apply(target: &mut Value, body: Map<String, Value>, mode: Update) {
    match (mode, target) {
        (Update::Merge, Value::Object(fields)) => fields.extend(body),
        (_, target) => *target = Value::Object(body),
    }
}

/// `1` for an empty collection, `max + 1` when every id is numeric, else a
/// short random string. Ids past `i64::MAX` also fall back to a string.
fn next_id(items: &[Value]) -> Value {
    let ids: Vec<&Value> = items.iter().filter_map(|item| item.get("id")).collect();

    if ids.iter().all(|id| id.is_number()) {
        let max = ids
            .iter()
            .filter_map(|id| id.as_f64())
            .fold(0.0_f64, f64::max);

        if let Some(next) = (max.floor() as i64).checked_add(1) {
            return Value::from(next);
        }
    }

    Value::from(Uuid::new_v4().simple().to_string()[..7].to_string())
}
