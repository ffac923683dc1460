//! Idempotency records backing the at-most-once guarantee

use serde::{Deserialize, Serialize};

/// Persisted status of an operation id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    InProgress,
    Done,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::InProgress => "IN_PROGRESS",
            OperationStatus::Done => "DONE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "IN_PROGRESS" => Some(OperationStatus::InProgress),
            "DONE" => Some(OperationStatus::Done),
            _ => None,
        }
    }
}

/// Outcome of trying to start an operation
#[derive(Debug, Clone, PartialEq)]
pub enum OperationState {
    /// First sighting; the caller owns the operation now
    New,
    /// Another execution holds the operation id
    InProgress,
    /// Already applied; carries the endpoint that applied it and the
    /// response returned the first time
    Done {
        endpoint: Option<String>,
        response: serde_json::Value,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_strings() {
        assert_eq!(OperationStatus::InProgress.as_str(), "IN_PROGRESS");
        assert_eq!(OperationStatus::parse("DONE"), Some(OperationStatus::Done));
        assert_eq!(OperationStatus::parse("done"), None);
    }
}
