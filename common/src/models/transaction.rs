//! Live preview transaction models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::query::{ColumnInfo, Row};

/// Transaction state. Every state other than `Active` is terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Active,
    Committed,
    RolledBack,
    Failed,
}

impl TransactionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Active => "active",
            TransactionStatus::Committed => "committed",
            TransactionStatus::RolledBack => "rolled_back",
            TransactionStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "active" => TransactionStatus::Active,
            "committed" => TransactionStatus::Committed,
            "rolled_back" => TransactionStatus::RolledBack,
            "failed" => TransactionStatus::Failed,
            _ => return None,
        })
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rows produced by a write statement inside an uncommitted transaction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TransactionPreview {
    pub columns: Vec<ColumnInfo>,
    #[schema(value_type = Vec<Object>)]
    pub rows: Vec<Row>,
    pub affected_rows: u64,
}

/// A live transaction opened to preview a write.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct QueryTransaction {
    pub id: String,
    pub approval_id: String,
    pub data_source_id: String,
    pub sql: String,
    pub started_by: String,
    pub status: TransactionStatus,
    pub preview: TransactionPreview,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_active_is_open() {
        assert!(!TransactionStatus::Active.is_terminal());
        assert!(TransactionStatus::Committed.is_terminal());
        assert!(TransactionStatus::RolledBack.is_terminal());
        assert!(TransactionStatus::Failed.is_terminal());
    }
}
