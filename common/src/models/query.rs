//! SQL query models.
//!
//! Contains models for query submission, execution status, and
//! materialized results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

/// A single materialized row: column name to JSON value.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Closed classification of a statement's effect.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Select,
    Insert,
    Update,
    Delete,
    CreateTable,
    DropTable,
    AlterTable,
    /// Transaction control, privilege changes, and any other write form.
    OtherWrite,
}

impl OperationKind {
    /// Returns true for every kind except `Select`.
    pub fn is_write(&self) -> bool {
        !matches!(self, OperationKind::Select)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Select => "select",
            OperationKind::Insert => "insert",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
            OperationKind::CreateTable => "create_table",
            OperationKind::DropTable => "drop_table",
            OperationKind::AlterTable => "alter_table",
            OperationKind::OtherWrite => "other_write",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "select" => OperationKind::Select,
            "insert" => OperationKind::Insert,
            "update" => OperationKind::Update,
            "delete" => OperationKind::Delete,
            "create_table" => OperationKind::CreateTable,
            "drop_table" => OperationKind::DropTable,
            "alter_table" => OperationKind::AlterTable,
            "other_write" => OperationKind::OtherWrite,
            _ => return None,
        })
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a submitted query.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum QueryStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl QueryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryStatus::Queued => "queued",
            QueryStatus::Running => "running",
            QueryStatus::Completed => "completed",
            QueryStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "queued" => QueryStatus::Queued,
            "running" => QueryStatus::Running,
            "completed" => QueryStatus::Completed,
            "failed" => QueryStatus::Failed,
            _ => return None,
        })
    }
}

/// A submitted statement.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Query {
    pub id: String,
    /// Submitting user.
    pub user_id: String,
    /// Target data source.
    pub data_source_id: String,
    pub sql: String,
    /// Detected operation kind.
    pub operation: OperationKind,
    pub status: QueryStatus,
    /// Engine error, recorded verbatim on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Materialized result (completed reads only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<u64>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Query {
    /// Creates a queued query.
    pub fn new(
        id: String,
        user_id: impl Into<String>,
        data_source_id: impl Into<String>,
        sql: impl Into<String>,
        operation: OperationKind,
    ) -> Self {
        Self {
            id,
            user_id: user_id.into(),
            data_source_id: data_source_id.into(),
            sql: sql.into(),
            operation,
            status: QueryStatus::Queued,
            error_message: None,
            result_id: None,
            execution_time_ms: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}

/// Column information in a query result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ColumnInfo {
    /// Column name.
    pub name: String,

    /// Engine-reported column data type.
    pub data_type: String,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
        }
    }
}

/// Cached materialization of a completed read.
///
/// Immutable once stored; only `expires_at` governs its lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct QueryResult {
    pub id: String,
    pub query_id: String,
    /// Ordered column names.
    pub columns: Vec<String>,
    /// Engine-reported types, parallel to `columns`.
    pub column_types: Vec<String>,
    /// Full row set.
    #[schema(value_type = Vec<Object>)]
    pub rows: Vec<Row>,
    pub row_count: usize,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl QueryResult {
    /// Returns true once the result is past its expiry time.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Audit entry written for every read execution.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct QueryHistoryEntry {
    pub id: String,
    pub query_id: String,
    pub user_id: String,
    pub data_source_id: String,
    pub sql: String,
    pub status: QueryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count: Option<usize>,
    pub execution_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub executed_at: DateTime<Utc>,
}

/// Request body for submitting a SQL statement.
#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct QueryRequest {
    /// ID of the data source to run against.
    #[validate(length(min = 1, message = "Data source ID is required"))]
    pub data_source_id: String,

    /// SQL statement to execute.
    #[validate(length(min = 1, message = "SQL statement is required"))]
    pub sql: String,
}

/// Request body for the plan explanation endpoint.
#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct ExplainRequest {
    #[validate(length(min = 1, message = "Data source ID is required"))]
    pub data_source_id: String,

    #[validate(length(min = 1, message = "SQL statement is required"))]
    pub sql: String,

    /// Runs the statement to collect actual timings (inside a rolled-back transaction).
    #[serde(default)]
    pub analyze: bool,
}

/// Sort direction for paged result views.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// Export encodings for stored results.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Csv,
    Json,
}

impl ExportFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv; charset=utf-8",
            ExportFormat::Json => "application/json",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
        }
    }
}
