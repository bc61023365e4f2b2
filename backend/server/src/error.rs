use axum::{
    Json,
    extract::rejection::{PathRejection, QueryRejection},
    http::{HeaderValue, StatusCode, header::WWW_AUTHENTICATE},
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::database::DatabaseError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Malformed payload")]
    MalformedPayload,

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("Id counter overflow")]
    IdOverflow,

    #[error("Invalid collection name.")]
    InvalidCollectionName,

    #[error("Collection already exists.")]
    CollectionExists,

    #[error("Collection '{0}' does not exist.")]
    CollectionMissing(String),

    #[error("Cannot delete protected collection.")]
    ProtectedCollection,

    #[error("Resource '{0}' not found.")]
    ResourceMissing(String),

    #[error("Record '{0}' not found.")]
    RecordMissing(String),

    #[error("Duplicate id {0}")]
    DuplicateId(String),

    #[error("Authentication required.")]
    AuthenticationRequired,

    #[error("Malformed authorization header.")]
    MalformedAuthorization,

    #[error("Invalid credentials.")]
    WrongBasicCredentials,

    #[error("Invalid credentials")]
    WrongLogin,

    #[error("Missing bearer token")]
    MissingToken,

    #[error("Invalid token")]
    InvalidToken,

    #[error("User not found")]
    UserMissing,

    #[error("JWT_SECRET_KEY is not configured")]
    TokenSecretMissing,

    #[error("Token signing failed: {0}")]
    TokenSigning(#[from] jsonwebtoken::errors::Error),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::MalformedPayload
            | AppError::InvalidQuery(_)
            | AppError::InvalidPath(_)
            | AppError::IdOverflow
            | AppError::InvalidCollectionName
            | AppError::CollectionExists
            | AppError::DuplicateId(_)
            | AppError::MalformedAuthorization => StatusCode::BAD_REQUEST,
            AppError::AuthenticationRequired | AppError::WrongLogin | AppError::MissingToken => {
                StatusCode::UNAUTHORIZED
            }
            AppError::ProtectedCollection
            | AppError::WrongBasicCredentials
            | AppError::InvalidToken => StatusCode::FORBIDDEN,
            AppError::CollectionMissing(_)
            | AppError::ResourceMissing(_)
            | AppError::RecordMissing(_)
            | AppError::UserMissing => StatusCode::NOT_FOUND,
            AppError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            AppError::TokenSecretMissing | AppError::TokenSigning(_) | AppError::Database(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::InvalidPath(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::InvalidQuery(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut response = (status, Json(json!({ "error": self.to_string() }))).into_response();

        if let AppError::AuthenticationRequired = self {
            response.headers_mut().insert(
                WWW_AUTHENTICATE,
                HeaderValue::from_static("Basic realm=\"JSON Server\""),
            );
        }

        response
    }
}
