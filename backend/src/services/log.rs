//! Client activity log service

use std::sync::Arc;

use chrono::Utc;
use shared::{CreateLogInput, LogEntry, OperationId};

use super::{require_operation_id, trace_outcome, Admission, IdempotencyGuard, RequestContext};
use crate::error::{AppError, AppResult};
use crate::store::{LedgerStore, LOG_LIST_LIMIT};

#[derive(Clone)]
pub struct LogService {
    store: Arc<dyn LedgerStore>,
    guard: IdempotencyGuard,
}

impl LogService {
    pub fn new(store: Arc<dyn LedgerStore>, guard: IdempotencyGuard) -> Self {
        Self { store, guard }
    }

    /// Newest entries first
    pub async fn list_logs(&self) -> AppResult<Vec<LogEntry>> {
        let mut tx = self.store.begin().await?;
        let logs = tx.list_logs(LOG_LIST_LIMIT).await?;
        tx.commit().await?;
        Ok(logs)
    }

    pub async fn create_log(&self, ctx: &RequestContext, input: CreateLogInput) -> AppResult<LogEntry> {
        let operation_id = require_operation_id(input.operation_id.as_deref())?;
        let id = input
            .id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| AppError::invalid("id", "id is required"))?
            .to_string();

        let entry = LogEntry {
            id,
            timestamp: input
                .timestamp
                .unwrap_or_else(|| Utc::now().timestamp_millis()),
            log_type: input.log_type,
            title: input.title,
            msg: input.msg,
            meta: input.meta,
        };

        let result = self.create_in_tx(ctx, &operation_id, entry).await;
        trace_outcome("log.create.finish", ctx, &operation_id, &result);
        result
    }

    async fn create_in_tx(
        &self,
        ctx: &RequestContext,
        operation_id: &OperationId,
        entry: LogEntry,
    ) -> AppResult<LogEntry> {
        let mut tx = self.store.begin().await?;
        if let Admission::Replay(saved) = self
            .guard
            .admit::<LogEntry>(tx.as_mut(), operation_id, &ctx.endpoint)
            .await?
        {
            return Ok(saved);
        }

        let saved = tx.insert_log(&entry).await?;
        self.guard.complete(tx.as_mut(), operation_id, &saved).await?;
        tx.commit().await?;
        Ok(saved)
    }
}
