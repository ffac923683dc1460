//! HTTP handlers for the activity log

use axum::{
    extract::{OriginalUri, State},
    Json,
};
use shared::{CreateLogInput, LogEntry};

use super::request_context;
use crate::error::AppResult;
use crate::middleware::{ApiJson, RequestId};
use crate::services::LogService;
use crate::AppState;

fn service(state: &AppState) -> LogService {
    LogService::new(state.store.clone(), state.idempotency())
}

pub async fn list_logs(State(state): State<AppState>) -> AppResult<Json<Vec<LogEntry>>> {
    let logs = service(&state).list_logs().await?;
    Ok(Json(logs))
}

/// Append one log entry
pub async fn create_log(
    State(state): State<AppState>,
    request_id: RequestId,
    uri: OriginalUri,
    ApiJson(input): ApiJson<CreateLogInput>,
) -> AppResult<Json<LogEntry>> {
    let ctx = request_context(&request_id, &uri);
    let entry = service(&state).create_log(&ctx, input).await?;
    Ok(Json(entry))
}
