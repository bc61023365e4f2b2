//! Mock REST API over a single JSON file.
//!
//! Point it at a `db.json` and every top-level key becomes a resource with
//! full CRUD, filtering and pagination. Meant for front-end development and
//! demos, not production data.
//!
//!
//!
//! # Request Pipeline
//!
//! ```text
//! CORS → Trace → Basic Auth (optional) → Timestamps → custom routes | generic resources
//! ```
//!
//! - CORS answers preflights before anything else runs
//! - Basic Auth is only active with `ENABLE_BASIC_AUTH=true`, and skips `/profile`
//! - Timestamps rewrite JSON bodies of POST/PUT/PATCH and cap them at 10 MiB, see [`timestamps`]
//! - Static routes (`/db`, `/login`, `/admin/...`) win over `/{resource}` captures
//!
//!
//!
//! # Routes
//!
//! | Method | Path | Handler |
//! |---|---|---|
//! | GET | `/db`, `/admin/db` | whole document, fresh from disk |
//! | GET | `/echo`, `/admin/echo` | query string as JSON |
//! | GET | `/admin/health` | liveness + server time |
//! | GET | `/admin/collections` | collection names |
//! | POST, DELETE | `/admin/collections/{name}` | create or drop a collection |
//! | POST | `/login` | email/password to bearer token |
//! | GET | `/profile` | user behind a bearer token |
//! | * | `/{resource}[/{id}[/{nested}]]` | see [`crud`] and [`query`] |
//!
//!
//!
//! # Configuration
//!
//! All from the environment, see [`config::Config::load`].
//!
//! | Variable | Default |
//! |---|---|
//! | `NODE_PORT` | `8000` |
//! | `DB_FILE` | `db.json` |
//! | `ENABLE_BASIC_AUTH` | `false` |
//! | `BASIC_AUTH_USERNAME` | `admin` |
//! | `BASIC_AUTH_PASSWORD` | `admin` |
//! | `JWT_SECRET_KEY` | unset, falls back to `/run/secrets/JWT_SECRET_KEY` |
//!
//!
//!
//! # Notes
//!
//! ## Persistence
//! The document lives in memory and the file is rewritten after every
//! mutation. Writes are serialized by one lock, so a single process never
//! loses updates, but two processes on one file will.
//!
//! ## Tokens
//! Login tokens are plain HS256 JWTs holding the public user fields. There is
//! no revocation list; rotate `JWT_SECRET_KEY` to invalidate everything.
//!
//!
//!
//! # Setup
//!
//! Seed a database and run.
//! ```sh
//! cargo run -p seed -- --users 5
//! JWT_SECRET_KEY=dev cargo run -p mockdb
//! ```
//!
//! Logs follow `RUST_LOG`.
//! ```sh
//! RUST_LOG=info,tower_http=debug cargo run -p mockdb
//! ```
use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{Method, Uri},
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
};

use signal::{
    ctrl_c,
    unix::{SignalKind, signal},
};
use tokio::{net::TcpListener, signal};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

pub mod auth;
pub mod collections;
pub mod config;
pub mod crud;
pub mod database;
pub mod error;
pub mod extract;
pub mod query;
pub mod routes;
pub mod state;
pub mod timestamps;
pub mod utils;

use auth::basic_auth_middleware;
use config::Config;
use crud::{
    TOTAL_COUNT_HEADER, create_handler, delete_handler, get_handler, list_handler,
    nested_create_handler, nested_list_handler, patch_handler, patch_singular_handler,
    replace_handler, replace_singular_handler,
};
use error::AppError;
use routes::{
    collections_handler, create_collection_handler, db_handler, delete_collection_handler,
    echo_handler, health_handler, login_handler, profile_handler,
};
use state::State;
use timestamps::timestamp_middleware;

pub async fn start_server() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    info!("Loading config...");
    let config = Config::load()?;

    info!("Initializing state...");
    let state = State::new(config).await?;

    if state.config.basic_auth.is_some() {
        info!("Basic auth enabled");
    }

    info!("Starting server...");
    let app = app(state.clone());

    let address = format!("0.0.0.0:{}", state.config.port);
    info!("Binding to {address}");

    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {address}"))?;
    info!("Server running on {address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutting down...");

    Ok(())
}

/// Builds the full router; split out from [`start_server`] so tests can drive it in-process.
pub fn app(state: Arc<State>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::HEAD,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any)
        .expose_headers([TOTAL_COUNT_HEADER])
        .max_age(Duration::from_secs(60 * 60));

    Router::new()
        .route("/db", get(db_handler))
        .route("/admin/db", get(db_handler))
        .route("/echo", get(echo_handler))
        .route("/admin/echo", get(echo_handler))
        .route("/admin/health", get(health_handler))
        .route("/admin/collections", get(collections_handler))
        .route(
            "/admin/collections/{name}",
            post(create_collection_handler).delete(delete_collection_handler),
        )
        .route("/login", post(login_handler))
        .route("/profile", get(profile_handler))
        .route(
            "/{resource}",
            get(list_handler)
                .post(create_handler)
                .put(replace_singular_handler)
                .patch(patch_singular_handler),
        )
        .route(
            "/{resource}/{id}",
            get(get_handler)
                .put(replace_handler)
                .patch(patch_handler)
                .delete(delete_handler),
        )
        .route(
            "/{resource}/{id}/{nested}",
            get(nested_list_handler).post(nested_create_handler),
        )
        .fallback(not_found)
        .method_not_allowed_fallback(method_not_allowed)
        // write bodies are already capped while stamping, and stamping makes them grow
        .layer(DefaultBodyLimit::disable())
        .layer(from_fn(timestamp_middleware))
        .layer(from_fn_with_state(state.clone(), basic_auth_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn not_found(uri: Uri) -> AppError {
    AppError::ResourceMissing(uri.path().to_string())
}

async fn method_not_allowed() -> AppError {
    AppError::MethodNotAllowed
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(e) => {
                warn!("Failed to install Ctrl+C handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                warn!("Failed to install signal handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
