//! Business logic services for the stock ledger

pub mod idempotency;
pub mod inventory;
pub mod log;
pub mod receipt;

pub use idempotency::{Admission, IdempotencyGuard};
pub use inventory::InventoryService;
pub use log::LogService;
pub use receipt::ReceiptService;

use shared::OperationId;

use crate::error::{AppError, AppResult};

/// Per-request facts recorded alongside every mutation
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub endpoint: String,
}

impl RequestContext {
    pub fn new(request_id: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            endpoint: endpoint.into(),
        }
    }
}

/// Parse the caller's operation id before any transaction begins
pub(crate) fn require_operation_id(raw: Option<&str>) -> AppResult<OperationId> {
    OperationId::parse(raw).map_err(|message| AppError::invalid("operationId", message))
}

/// Emit the success/error event closing a mutation
pub(crate) fn trace_outcome<T>(
    event: &'static str,
    ctx: &RequestContext,
    operation_id: &OperationId,
    result: &AppResult<T>,
) {
    match result {
        Ok(_) => tracing::info!(
            request_id = %ctx.request_id,
            operation_id = %operation_id,
            endpoint = %ctx.endpoint,
            status = "success",
            "{}",
            event
        ),
        Err(err) => tracing::warn!(
            request_id = %ctx.request_id,
            operation_id = %operation_id,
            endpoint = %ctx.endpoint,
            status = "error",
            code = err.code(),
            error = %err,
            "{}",
            event
        ),
    }
}
