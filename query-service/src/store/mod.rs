//! Metadata persistence.
//!
//! Queries, results, approvals, reviews and preview transactions live in a
//! metadata database separate from the engines queries run against.

mod memory;
mod mysql;

pub use memory::MemoryStore;
pub use mysql::MySqlStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use common::errors::AppResult;
use common::models::{
    ApprovalRequest, ApprovalReview, ApprovalStatus, DataSource, Query, QueryHistoryEntry,
    QueryResult, QueryTransaction,
};

/// Storage operations used by the query engine.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn get_data_source(&self, id: &str) -> AppResult<DataSource>;

    async fn insert_query(&self, query: &Query) -> AppResult<()>;
    async fn update_query(&self, query: &Query) -> AppResult<()>;
    async fn get_query(&self, id: &str) -> AppResult<Query>;

    async fn insert_result(&self, result: &QueryResult) -> AppResult<()>;
    /// Expired results are reported as not found.
    async fn get_result(&self, id: &str) -> AppResult<QueryResult>;
    /// Deletes results that expired at or before `now`. Returns the number removed.
    async fn purge_expired_results(&self, now: DateTime<Utc>) -> AppResult<u64>;

    async fn record_history(&self, entry: &QueryHistoryEntry) -> AppResult<()>;
    /// Most recent entries first.
    async fn list_history(&self, user_id: &str, limit: usize) -> AppResult<Vec<QueryHistoryEntry>>;

    async fn insert_approval(&self, approval: &ApprovalRequest) -> AppResult<()>;
    async fn get_approval(&self, id: &str) -> AppResult<ApprovalRequest>;
    /// Moves a pending approval to `to`.
    ///
    /// Fails with `NonPendingApproval` when the approval already left
    /// `pending`; the check and the write are atomic.
    async fn transition_approval(
        &self,
        id: &str,
        to: ApprovalStatus,
        reason: Option<&str>,
        at: DateTime<Utc>,
    ) -> AppResult<ApprovalRequest>;

    /// Fails with `DuplicateReview` when the reviewer already reviewed the approval.
    async fn insert_review(&self, review: &ApprovalReview) -> AppResult<()>;
    /// Reviews in recording order.
    async fn list_reviews(&self, approval_id: &str) -> AppResult<Vec<ApprovalReview>>;

    async fn insert_transaction(&self, tx: &QueryTransaction) -> AppResult<()>;
    async fn update_transaction(&self, tx: &QueryTransaction) -> AppResult<()>;
    async fn get_transaction(&self, id: &str) -> AppResult<QueryTransaction>;
}
