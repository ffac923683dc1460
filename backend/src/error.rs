//! Error handling for the stock ledger service
//!
//! Every failure leaves the service as one JSON envelope:
//! `{"error": {code, message, retryable, requestId, details?, retryAfterMs?}}`.
//! Storage errors are classified here so callers never see raw database codes.

use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::{json, Value};
use shared::CostError;
use thiserror::Error;

use crate::middleware::request_id;

/// Unique index enforcing case-insensitive SKU uniqueness
pub const SKU_UNIQUE_INDEX: &str = "ux_inventory_sku_norm_nonempty";

/// Unique index on the movement-level operation id
pub const MOVEMENT_OPERATION_INDEX: &str = "ux_inventory_movements_operation_id";

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        field: Option<String>,
        message: String,
        details: Option<Value>,
    },

    #[error("{resource} not found")]
    NotFound { resource: String, id: Option<String> },

    #[error("Not enough stock for {inventory_id}: available {available}, requested {requested}")]
    InventoryInsufficient {
        inventory_id: String,
        available: i64,
        requested: i64,
    },

    #[error("Operation {operation_id} is already in progress")]
    OperationInProgress {
        operation_id: String,
        retry_after_ms: u64,
    },

    #[error("Conflict: {message}")]
    Conflict { resource: String, message: String },

    #[error("Database unavailable: {0}")]
    DbUnavailable(String),

    #[error("Database timeout: {0}")]
    Timeout(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Internal server error")]
    InternalError(#[from] anyhow::Error),
}

impl AppError {
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::InvalidArgument {
            field: Some(field.into()),
            message: message.into(),
            details: None,
        }
    }

    pub fn not_found(resource: impl Into<String>, id: impl Into<String>) -> Self {
        AppError::NotFound {
            resource: resource.into(),
            id: Some(id.into()),
        }
    }

    /// Attach the item a cost engine failure happened on
    pub fn from_cost(inventory_id: &str, err: CostError) -> Self {
        match err {
            CostError::InsufficientStock {
                available,
                requested,
            } => AppError::InventoryInsufficient {
                inventory_id: inventory_id.to_string(),
                available,
                requested,
            },
        }
    }

    /// Stable machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            AppError::InvalidArgument { .. } => "INVALID_ARGUMENT",
            AppError::NotFound { .. } => "NOT_FOUND",
            AppError::InventoryInsufficient { .. } => "INVENTORY_INSUFFICIENT",
            AppError::OperationInProgress { .. } => "OPERATION_IN_PROGRESS",
            AppError::Conflict { .. } => "CONFLICT",
            AppError::DbUnavailable(_) => "DB_UNAVAILABLE",
            AppError::Timeout(_) => "TIMEOUT",
            AppError::Internal(_) | AppError::InternalError(_) => "INTERNAL",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::InvalidArgument { .. } => StatusCode::BAD_REQUEST,
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,
            AppError::InventoryInsufficient { .. }
            | AppError::OperationInProgress { .. }
            | AppError::Conflict { .. } => StatusCode::CONFLICT,
            AppError::DbUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::Internal(_) | AppError::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Whether the same request may succeed if simply retried
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            AppError::OperationInProgress { .. } | AppError::DbUnavailable(_) | AppError::Timeout(_)
        )
    }

    fn public_message(&self) -> String {
        match self {
            AppError::InvalidArgument { message, .. } => message.clone(),
            AppError::Conflict { message, .. } => message.clone(),
            AppError::DbUnavailable(_) => "Database is temporarily unavailable".to_string(),
            AppError::Timeout(_) => "Database operation timed out".to_string(),
            AppError::Internal(_) | AppError::InternalError(_) => {
                "An internal server error occurred".to_string()
            }
            other => other.to_string(),
        }
    }

    fn details(&self) -> Option<Value> {
        match self {
            AppError::InvalidArgument { field, details, .. } => match (field, details) {
                (Some(field), Some(Value::Object(extra))) => {
                    let mut map = extra.clone();
                    map.insert("field".to_string(), json!(field));
                    Some(Value::Object(map))
                }
                (Some(field), _) => Some(json!({ "field": field })),
                (None, details) => details.clone(),
            },
            AppError::NotFound { resource, id } => Some(json!({ "resource": resource, "id": id })),
            AppError::InventoryInsufficient {
                inventory_id,
                available,
                requested,
            } => Some(json!({
                "inventoryId": inventory_id,
                "available": available,
                "requested": requested,
            })),
            AppError::OperationInProgress { operation_id, .. } => {
                Some(json!({ "operationId": operation_id }))
            }
            AppError::Conflict { resource, .. } => Some(json!({ "resource": resource })),
            _ => None,
        }
    }

    fn retry_after_ms(&self) -> Option<u64> {
        match self {
            AppError::OperationInProgress { retry_after_ms, .. } => Some(*retry_after_ms),
            _ => None,
        }
    }
}

/// Map a Postgres SQLSTATE (plus the violated constraint, if any) onto the taxonomy
pub fn classify_db_code(code: &str, constraint: Option<&str>, message: &str) -> AppError {
    match code {
        "23505" => match constraint {
            Some(SKU_UNIQUE_INDEX) => AppError::Conflict {
                resource: "sku".to_string(),
                message: "SKU already exists".to_string(),
            },
            Some(MOVEMENT_OPERATION_INDEX) => AppError::Conflict {
                resource: "operation".to_string(),
                message: "Operation has already been applied to this item".to_string(),
            },
            _ => AppError::Conflict {
                resource: constraint.unwrap_or("record").to_string(),
                message: "Duplicate value".to_string(),
            },
        },
        "23503" => AppError::Conflict {
            resource: constraint.unwrap_or("reference").to_string(),
            message: "Record is referenced by other records".to_string(),
        },
        "23514" | "23502" | "22003" | "22P02" => AppError::InvalidArgument {
            field: constraint.map(str::to_string),
            message: format!("Value rejected by storage: {}", message),
            details: None,
        },
        "40001" | "40P01" => AppError::DbUnavailable(message.to_string()),
        "55P03" | "57014" => AppError::Timeout(message.to_string()),
        c if c.starts_with("08") || c.starts_with("57P") || c == "53300" => {
            AppError::DbUnavailable(message.to_string())
        }
        _ => AppError::Internal(format!("database error {}: {}", code, message)),
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db) => {
                let code = db.code().map(|c| c.into_owned()).unwrap_or_default();
                classify_db_code(&code, db.constraint(), db.message())
            }
            sqlx::Error::PoolTimedOut => AppError::Timeout("connection pool timed out".to_string()),
            sqlx::Error::Io(e) => AppError::DbUnavailable(e.to_string()),
            sqlx::Error::PoolClosed | sqlx::Error::WorkerCrashed => {
                AppError::DbUnavailable("connection pool unavailable".to_string())
            }
            sqlx::Error::Tls(e) => AppError::DbUnavailable(e.to_string()),
            sqlx::Error::RowNotFound => AppError::NotFound {
                resource: "Record".to_string(),
                id: None,
            },
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::invalid("body", rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::invalid("query", rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::invalid("path", rejection.body_text())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let field = errors
            .field_errors()
            .keys()
            .next()
            .map(|k| k.to_string())
            .unwrap_or_default();
        AppError::InvalidArgument {
            message: format!("{} is invalid", field),
            field: Some(field),
            details: serde_json::to_value(&errors).ok(),
        }
    }
}

/// Error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    pub retryable: bool,
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let request_id = request_id::current();

        if status.is_server_error() {
            tracing::error!(
                request_id = request_id.as_deref().unwrap_or("-"),
                code = self.code(),
                "Error: {:?}",
                self
            );
        } else {
            tracing::warn!(
                request_id = request_id.as_deref().unwrap_or("-"),
                code = self.code(),
                "Request rejected: {}",
                self
            );
        }

        let detail = ErrorDetail {
            code: self.code().to_string(),
            message: self.public_message(),
            retryable: self.retryable(),
            request_id,
            details: self.details(),
            retry_after_ms: self.retry_after_ms(),
        };

        let mut response = (status, Json(ErrorResponse { error: detail })).into_response();
        if let Some(ms) = self.retry_after_ms() {
            let secs = ms.div_ceil(1000).max(1);
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

/// Result type alias for handlers
pub type AppResult<T> = Result<T, AppError>;
