//! HTTP handlers for inventory endpoints

use axum::{
    extract::{OriginalUri, State},
    Json,
};
use serde::Deserialize;
use shared::{BatchRequest, BatchResult, InventoryItem, InventoryPatch, MovementView, RemoveItemResult};

use super::{request_context, OperationQuery};
use crate::error::AppResult;
use crate::middleware::{ApiJson, ApiPath, ApiQuery, RequestId};
use crate::services::InventoryService;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListItemsQuery {
    #[serde(default)]
    pub include_archived: bool,
}

fn service(state: &AppState) -> InventoryService {
    InventoryService::new(state.store.clone(), state.idempotency())
}

/// List inventory items
pub async fn list_items(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<ListItemsQuery>,
) -> AppResult<Json<Vec<InventoryItem>>> {
    let items = service(&state).list_items(query.include_archived).await?;
    Ok(Json(items))
}

/// Movement history of one item, newest first
pub async fn list_item_movements(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<String>,
) -> AppResult<Json<Vec<MovementView>>> {
    let movements = service(&state).item_movements(&id).await?;
    Ok(Json(movements))
}

/// Set quantity/cost of one item
pub async fn adjust_item(
    State(state): State<AppState>,
    request_id: RequestId,
    uri: OriginalUri,
    ApiPath(id): ApiPath<String>,
    ApiJson(patch): ApiJson<InventoryPatch>,
) -> AppResult<Json<InventoryItem>> {
    let ctx = request_context(&request_id, &uri);
    let item = service(&state).adjust_item(&ctx, &id, patch).await?;
    Ok(Json(item))
}

/// Apply signed deltas to several items at once
pub async fn apply_batch(
    State(state): State<AppState>,
    request_id: RequestId,
    uri: OriginalUri,
    ApiJson(request): ApiJson<BatchRequest>,
) -> AppResult<Json<BatchResult>> {
    let ctx = request_context(&request_id, &uri);
    let result = service(&state).apply_batch(&ctx, request).await?;
    Ok(Json(result))
}

/// Delete an item, or archive it when receipts still reference it
pub async fn remove_item(
    State(state): State<AppState>,
    request_id: RequestId,
    uri: OriginalUri,
    ApiPath(id): ApiPath<String>,
    ApiQuery(query): ApiQuery<OperationQuery>,
    body: Option<Json<OperationQuery>>,
) -> AppResult<Json<RemoveItemResult>> {
    let ctx = request_context(&request_id, &uri);
    let operation_id = query.resolve(body);
    let result = service(&state)
        .remove_item(&ctx, &id, operation_id.as_deref())
        .await?;
    Ok(Json(result))
}
