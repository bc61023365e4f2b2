//! # Auth
//!
//! Two independent schemes.
//!
//! ## Basic
//! - Optional gate in front of every route except `/profile`
//! - Static username/password from config, no user lookup
//! - 401 without a `Basic` header, 400 if the credentials do not decode, 403 on mismatch
//!
//! ## Bearer
//! - `/login` signs the public user fields as an HS256 JWT, valid 7 days
//! - `/profile` verifies it and reads the `id` claim
//! - Stateless: no revocation, expiry is the only way out
use std::sync::Arc;

use axum::{
    extract::{Request, State as AxumState},
    http::{HeaderMap, header::AUTHORIZATION},
    middleware::Next,
    response::Response,
};
use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde_json::{Map, Value};

use crate::{
    config::BasicCredentials,
    error::AppError::{
        self, AuthenticationRequired, InvalidToken, MalformedAuthorization, MissingToken,
        WrongBasicCredentials,
    },
    state::State,
};

pub const BASIC_AUTH_EXEMPT: [&str; 1] = ["/profile"];
pub const TOKEN_LIFETIME_DAYS: i64 = 7;

pub async fn basic_auth_middleware(
    AxumState(state): AxumState<Arc<State>>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(expected) = &state.config.basic_auth else {
        return Ok(next.run(request).await);
    };

    if !BASIC_AUTH_EXEMPT.contains(&request.uri().path()) {
        check_basic(request.headers(), expected)?;
    }

    Ok(next.run(request).await)
}

pub fn check_basic(headers: &HeaderMap, expected: &BasicCredentials) -> Result<(), AppError> {
    let encoded = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Basic "))
        .ok_or(AuthenticationRequired)?;

    let decoded = STANDARD
        .decode(encoded.trim())
        .map_err(|_| MalformedAuthorization)?;
    let decoded = String::from_utf8(decoded).map_err(|_| MalformedAuthorization)?;
    let (username, password) = decoded.split_once(':').ok_or(MalformedAuthorization)?;

    if username == expected.username && password == expected.password {
        Ok(())
    } else {
        Err(WrongBasicCredentials)
    }
}

/// Signs `claims` plus `iat`/`exp`.
pub fn issue_token(claims: &Map<String, Value>, secret: &str) -> Result<String, AppError> {
    let now = Utc::now();

    let mut claims = claims.clone();
    claims.insert("iat".into(), now.timestamp().into());
    claims.insert(
        "exp".into(),
        (now + Duration::days(TOKEN_LIFETIME_DAYS)).timestamp().into(),
    );

    Ok(encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?)
}

pub fn verify_token(token: &str, secret: &str) -> Result<Map<String, Value>, AppError> {
    decode::<Map<String, Value>>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map(|data| data.claims)
    .map_err(|_| InvalidToken)
}

/// Pulls the token out of `Authorization: <scheme> <token>`.
///
/// No header at all is a 401; a header without a second word is treated as
/// a bad token (403).
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    let header = headers.get(AUTHORIZATION).ok_or(MissingToken)?;
    let header = header.to_str().map_err(|_| InvalidToken)?;

    header.split(' ').nth(1).ok_or(InvalidToken)
}
