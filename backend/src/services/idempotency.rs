//! Idempotency guard
//!
//! Gives every mutating operation at-most-once semantics per operation id.
//! The guard runs inside the caller's transaction, so the IN_PROGRESS record,
//! the business writes and the DONE record commit or roll back together.

use serde::{de::DeserializeOwned, Serialize};
use shared::{OperationId, OperationState};

use crate::error::{AppError, AppResult};
use crate::store::LedgerTx;

/// Whether the caller should run the operation or replay a stored response
#[derive(Debug)]
pub enum Admission<T> {
    Fresh,
    Replay(T),
}

#[derive(Debug, Clone, Copy)]
pub struct IdempotencyGuard {
    retry_after_ms: u64,
}

impl IdempotencyGuard {
    pub fn new(retry_after_ms: u64) -> Self {
        Self { retry_after_ms }
    }

    /// Claim `operation_id` for this transaction
    pub async fn admit<T: DeserializeOwned>(
        &self,
        tx: &mut dyn LedgerTx,
        operation_id: &OperationId,
        endpoint: &str,
    ) -> AppResult<Admission<T>> {
        match tx.begin_operation(operation_id.as_str(), endpoint).await? {
            OperationState::New => Ok(Admission::Fresh),
            OperationState::InProgress => Err(AppError::OperationInProgress {
                operation_id: operation_id.to_string(),
                retry_after_ms: self.retry_after_ms,
            }),
            OperationState::Done { endpoint: applied_on, response } => {
                if let Some(applied_on) = applied_on.filter(|e| e.as_str() != endpoint) {
                    return Err(reused_elsewhere(operation_id, &applied_on));
                }
                // Same path, different shape: the id was spent on another kind of mutation
                serde_json::from_value(response)
                    .map(Admission::Replay)
                    .map_err(|_| reused_elsewhere(operation_id, endpoint))
            }
        }
    }

    /// Record the response to replay for later attempts
    pub async fn complete<T: Serialize>(
        &self,
        tx: &mut dyn LedgerTx,
        operation_id: &OperationId,
        response: &T,
    ) -> AppResult<()> {
        let value = serde_json::to_value(response)
            .map_err(|e| AppError::Internal(format!("response is not serializable: {}", e)))?;
        tx.complete_operation(operation_id.as_str(), &value).await
    }
}

fn reused_elsewhere(operation_id: &OperationId, applied_on: &str) -> AppError {
    AppError::Conflict {
        resource: "operation".to_string(),
        message: format!(
            "Operation {} was already used for a different request ({})",
            operation_id, applied_on
        ),
    }
}

impl Default for IdempotencyGuard {
    fn default() -> Self {
        Self::new(500)
    }
}
