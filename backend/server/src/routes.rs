use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::State as AxumState,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::info;

use crate::{
    auth::{bearer_token, issue_token, verify_token},
    collections,
    error::AppError::{self, TokenSecretMissing, UserMissing, WrongLogin},
    extract::{Path, Query},
    state::State,
    utils::{now_iso, parse_body, public_user},
};

pub async fn db_handler(AxumState(state): AxumState<Arc<State>>) -> Result<Json<Value>, AppError> {
    let document = state.database.read_from_disk().await?;

    Ok(Json(Value::Object(document)))
}

/// Echoes the query string back, repeated keys collected into arrays.
pub async fn echo_handler(Query(params): Query<Vec<(String, String)>>) -> Json<Value> {
    let mut echoed = Map::new();

    for (key, value) in params {
        match echoed.get_mut(&key) {
            Some(Value::Array(values)) => values.push(value.into()),
            Some(single) => {
                let first = single.take();
                *single = Value::Array(vec![first, value.into()]);
            }
            None => {
                echoed.insert(key, value.into());
            }
        }
    }

    Json(Value::Object(echoed))
}

pub async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "ok", "time": now_iso() }))
}

pub async fn collections_handler(AxumState(state): AxumState<Arc<State>>) -> Json<Vec<String>> {
    Json(state.database.collection_names().await)
}

pub async fn create_collection_handler(
    AxumState(state): AxumState<Arc<State>>,
    Path(name): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    collections::validate_name(&name)?;
    let body = parse_body(&body)?;

    let count = state
        .database
        .write(|document| collections::create(document, &name, body))
        .await?;

    info!("Created collection {name} with {count} records");

    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": format!("Collection '{name}' created."), "count": count })),
    ))
}

pub async fn delete_collection_handler(
    AxumState(state): AxumState<Arc<State>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    state
        .database
        .write(|document| collections::delete(document, &name))
        .await?;

    info!("Deleted collection: {name}");

    Ok(Json(json!({ "message": format!("Collection '{name}' deleted.") })))
}

#[derive(Deserialize)]
pub struct Credentials {
    #[serde(default)]
    email: Option<Value>,
    #[serde(default)]
    password: Option<Value>,
}

pub async fn login_handler(
    AxumState(state): AxumState<Arc<State>>,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let credentials: Credentials = match parse_body(&body)? {
        Some(payload) => serde_json::from_value(payload).map_err(|_| AppError::MalformedPayload)?,
        None => return Err(WrongLogin),
    };
    let (Some(email), Some(password)) = (credentials.email, credentials.password) else {
        return Err(WrongLogin);
    };

    let user = state
        .database
        .read(|document| {
            users(document)
                .find(|user| {
                    user.get("email") == Some(&email) && user.get("password") == Some(&password)
                })
                .map(public_user)
        })
        .await
        .ok_or(WrongLogin)?;

    let secret = state.config.jwt_secret.as_deref().ok_or(TokenSecretMissing)?;
    let token = issue_token(&user, secret)?;
    let user_id = user.get("id").cloned().unwrap_or_default();
    info!("Issued token for user {user_id}");

    let mut response = user;
    response.insert("token".into(), token.into());

    Ok(Json(Value::Object(response)))
}

pub async fn profile_handler(
    AxumState(state): AxumState<Arc<State>>,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    let token = bearer_token(&headers)?;
    let secret = state.config.jwt_secret.as_deref().ok_or(TokenSecretMissing)?;
    let claims = verify_token(token, secret)?;

    let user_id = claims.get("id").cloned().ok_or(UserMissing)?;

    state
        .database
        .read(|document| {
            users(document)
                .find(|user| user.get("id") == Some(&user_id))
                .map(public_user)
        })
        .await
        .map(|user| Json(Value::Object(user)))
        .ok_or(UserMissing)
}

fn users(document: &Map<String, Value>) -> impl Iterator<Item = &Value> {
    document
        .get("users")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}
