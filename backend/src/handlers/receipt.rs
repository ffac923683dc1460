//! HTTP handlers for goods-received receipts

use axum::{
    extract::{OriginalUri, State},
    Json,
};
use serde::Deserialize;
use shared::{
    CreateReceiptInput, ReceiptDetail, ReceiptSummary, RemoveReceiptResult, UpdateReceiptInput,
};

use super::{request_context, OperationQuery};
use crate::error::AppResult;
use crate::middleware::{ApiJson, ApiPath, ApiQuery, RequestId};
use crate::services::ReceiptService;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ListReceiptsQuery {
    pub limit: Option<i64>,
}

fn service(state: &AppState) -> ReceiptService {
    ReceiptService::new(state.store.clone(), state.idempotency())
}

/// List receipts, newest first
pub async fn list_receipts(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<ListReceiptsQuery>,
) -> AppResult<Json<Vec<ReceiptSummary>>> {
    let receipts = service(&state).list_receipts(query.limit).await?;
    Ok(Json(receipts))
}

pub async fn get_receipt(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i64>,
) -> AppResult<Json<ReceiptDetail>> {
    let detail = service(&state).get_receipt(id).await?;
    Ok(Json(detail))
}

/// Record a receipt and receive its lines into stock
pub async fn create_receipt(
    State(state): State<AppState>,
    request_id: RequestId,
    uri: OriginalUri,
    ApiJson(input): ApiJson<CreateReceiptInput>,
) -> AppResult<Json<ReceiptDetail>> {
    let ctx = request_context(&request_id, &uri);
    let detail = service(&state).create_receipt(&ctx, input).await?;
    Ok(Json(detail))
}

/// Edit receipt header and lines
pub async fn update_receipt(
    State(state): State<AppState>,
    request_id: RequestId,
    uri: OriginalUri,
    ApiPath(id): ApiPath<i64>,
    ApiJson(input): ApiJson<UpdateReceiptInput>,
) -> AppResult<Json<ReceiptDetail>> {
    let ctx = request_context(&request_id, &uri);
    let detail = service(&state).update_receipt(&ctx, id, input).await?;
    Ok(Json(detail))
}

/// Delete a receipt, taking back all the stock it received
pub async fn delete_receipt(
    State(state): State<AppState>,
    request_id: RequestId,
    uri: OriginalUri,
    ApiPath(id): ApiPath<i64>,
    ApiQuery(query): ApiQuery<OperationQuery>,
    body: Option<Json<OperationQuery>>,
) -> AppResult<Json<RemoveReceiptResult>> {
    let ctx = request_context(&request_id, &uri);
    let operation_id = query.resolve(body);
    let result = service(&state)
        .delete_receipt(&ctx, id, operation_id.as_deref())
        .await?;
    Ok(Json(result))
}
