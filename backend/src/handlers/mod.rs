//! HTTP handlers for the stock ledger API

pub mod health;
pub mod inventory;
pub mod log;
pub mod receipt;

pub use health::*;
pub use inventory::*;
pub use log::*;
pub use receipt::*;

use axum::extract::OriginalUri;
use axum::Json;
use serde::Deserialize;

use crate::middleware::RequestId;
use crate::services::RequestContext;

/// `operationId` carried by DELETE requests, in the query string or a JSON body
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationQuery {
    pub operation_id: Option<String>,
}

impl OperationQuery {
    /// Query string wins over the body
    fn resolve(self, body: Option<Json<OperationQuery>>) -> Option<String> {
        self.operation_id
            .or_else(|| body.and_then(|Json(b)| b.operation_id))
    }
}

fn request_context(request_id: &RequestId, uri: &OriginalUri) -> RequestContext {
    RequestContext::new(request_id.as_str(), uri.0.path())
}
