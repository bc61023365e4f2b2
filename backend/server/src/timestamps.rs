use axum::{
    body::{Body, to_bytes},
    extract::Request,
    http::{Method, header::CONTENT_LENGTH},
    middleware::Next,
    response::Response,
};
use serde_json::Value;

use crate::{error::AppError, utils::now_iso};

pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Stamps `createdAt`/`updatedAt` onto JSON write bodies before dispatch.
pub async fn timestamp_middleware(request: Request, next: Next) -> Result<Response, AppError> {
    if ![Method::POST, Method::PUT, Method::PATCH].contains(request.method()) {
        return Ok(next.run(request).await);
    }

    let (mut parts, body) = request.into_parts();
    let bytes = to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|_| AppError::MalformedPayload)?;

    let body = match serde_json::from_slice::<Value>(&bytes) {
        Ok(mut payload) => {
            stamp(&parts.method, &mut payload, &now_iso());
            parts.headers.remove(CONTENT_LENGTH);
            Body::from(payload.to_string())
        }
        Err(_) => Body::from(bytes),
    };

    Ok(next.run(Request::from_parts(parts, body)).await)
}

pub fn stamp(method: &Method, payload: &mut Value, now: &str) {
    let creating = method == Method::POST;

    match payload {
        Value::Array(items) => {
            for record in items.iter_mut().filter_map(Value::as_object_mut) {
                if creating {
                    record.insert("createdAt".into(), now.into());
                }
                record.insert("updatedAt".into(), now.into());
            }
        }
        Value::Object(record) => {
            if creating && !record.get("createdAt").is_some_and(truthy) {
                record.insert("createdAt".into(), now.into());
            }
            record.insert("updatedAt".into(), now.into());
        }
        _ => {}
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
