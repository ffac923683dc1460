//! Client activity log

use serde::{Deserialize, Serialize};

/// Activity log record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    #[serde(rename = "type")]
    pub log_type: Option<String>,
    pub title: Option<String>,
    pub msg: Option<String>,
    pub meta: Option<serde_json::Value>,
}

/// Log append request
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateLogInput {
    pub operation_id: Option<String>,
    pub id: Option<String>,
    pub timestamp: Option<i64>,
    #[serde(rename = "type")]
    pub log_type: Option<String>,
    pub title: Option<String>,
    pub msg: Option<String>,
    pub meta: Option<serde_json::Value>,
}
