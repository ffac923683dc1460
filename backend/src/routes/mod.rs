//! Route definitions for the stock ledger API

use axum::{
    routing::{get, post, put},
    Router,
};

use crate::{handlers, AppState};

/// Create API routes
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(handlers::health_check))
        .nest("/inventory", inventory_routes())
        .nest("/receipts", receipt_routes())
        .nest("/logs", log_routes())
}

/// Inventory routes
fn inventory_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::list_items))
        .route("/batch", post(handlers::apply_batch))
        .route(
            "/:id",
            put(handlers::adjust_item).delete(handlers::remove_item),
        )
        .route("/:id/movements", get(handlers::list_item_movements))
}

/// Receipt routes
fn receipt_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/",
            get(handlers::list_receipts).post(handlers::create_receipt),
        )
        .route(
            "/:id",
            get(handlers::get_receipt)
                .patch(handlers::update_receipt)
                .delete(handlers::delete_receipt),
        )
}

/// Activity log routes
fn log_routes() -> Router<AppState> {
    Router::new().route("/", get(handlers::list_logs).post(handlers::create_log))
}
