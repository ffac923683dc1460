//! Stock Ledger - inventory ledger service
//!
//! Keeps per-item on-hand quantity and weighted-average cost consistent with
//! an append-only movement ledger, with at-most-once mutations keyed by a
//! caller-supplied operation id.

use std::sync::Arc;

use axum::{extract::OriginalUri, middleware::from_fn, routing::get, Router};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod services;
pub mod store;

pub use config::Config;
pub use error::{AppError, AppResult};

use crate::middleware::request_id_middleware;
use crate::services::IdempotencyGuard;
use crate::store::LedgerStore;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn LedgerStore>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(store: Arc<dyn LedgerStore>, config: Config) -> Self {
        Self {
            store,
            config: Arc::new(config),
        }
    }

    pub fn idempotency(&self) -> IdempotencyGuard {
        IdempotencyGuard::new(self.config.idempotency.retry_after_ms)
    }
}

/// Create the application router with all routes and middleware
pub fn create_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(root))
        .route("/health", get(handlers::health_check))
        .nest("/api/v1", routes::api_routes())
        .fallback(fallback)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(from_fn(request_id_middleware))
        .with_state(state)
}

async fn root() -> &'static str {
    "Stock Ledger API v1"
}

async fn fallback(OriginalUri(uri): OriginalUri) -> AppError {
    AppError::not_found("Route", uri.path())
}
