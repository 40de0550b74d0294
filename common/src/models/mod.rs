//! Shared data models.

pub mod approval;
pub mod data_source;
pub mod query;
pub mod transaction;

// Re-export commonly used types
pub use approval::{
    ApprovalDetail, ApprovalRequest, ApprovalReview, ApprovalStatus, ReviewDecision,
    ReviewRequest,
};
pub use data_source::{DataSource, DbType};
pub use query::{
    ColumnInfo, ExplainRequest, ExportFormat, OperationKind, Query, QueryHistoryEntry,
    QueryRequest, QueryResult, QueryStatus, Row, SortDirection,
};
pub use transaction::{QueryTransaction, TransactionPreview, TransactionStatus};
