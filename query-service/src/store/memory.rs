//! In-process metadata store.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use common::errors::{AppError, AppResult};
use common::models::{
    ApprovalRequest, ApprovalReview, ApprovalStatus, DataSource, Query, QueryHistoryEntry,
    QueryResult, QueryTransaction,
};

use super::MetadataStore;

#[derive(Default)]
struct Tables {
    data_sources: HashMap<String, DataSource>,
    queries: HashMap<String, Query>,
    results: HashMap<String, QueryResult>,
    history: VecDeque<QueryHistoryEntry>,
    approvals: HashMap<String, ApprovalRequest>,
    reviews: Vec<ApprovalReview>,
    transactions: HashMap<String, QueryTransaction>,
}

/// History entries kept before the oldest are dropped.
pub const DEFAULT_HISTORY_LIMIT: usize = 10_000;

/// Metadata store kept in memory. Used when no metadata database is
/// configured and by tests.
pub struct MemoryStore {
    tables: RwLock<Tables>,
    history_limit: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_history_limit(DEFAULT_HISTORY_LIMIT)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps at most `limit` history entries across all users.
    pub fn with_history_limit(limit: usize) -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            history_limit: limit.max(1),
        }
    }

    /// Registers a data source. Data source administration lives elsewhere;
    /// this seeds the in-memory catalog.
    pub async fn insert_data_source(&self, source: DataSource) {
        self.tables
            .write()
            .await
            .data_sources
            .insert(source.id.clone(), source);
    }
}

#[async_trait]
impl MetadataStore for MemoryStore {
    async fn get_data_source(&self, id: &str) -> AppResult<DataSource> {
        self.tables
            .read()
            .await
            .data_sources
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::not_found("data source", id))
    }

    async fn insert_query(&self, query: &Query) -> AppResult<()> {
        self.tables
            .write()
            .await
            .queries
            .insert(query.id.clone(), query.clone());
        Ok(())
    }

    async fn update_query(&self, query: &Query) -> AppResult<()> {
        let mut tables = self.tables.write().await;
        let slot = tables
            .queries
            .get_mut(&query.id)
            .ok_or_else(|| AppError::not_found("query", &query.id))?;
        *slot = query.clone();
        Ok(())
    }

    async fn get_query(&self, id: &str) -> AppResult<Query> {
        self.tables
            .read()
            .await
            .queries
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::not_found("query", id))
    }

    async fn insert_result(&self, result: &QueryResult) -> AppResult<()> {
        self.tables
            .write()
            .await
            .results
            .insert(result.id.clone(), result.clone());
        Ok(())
    }

    async fn get_result(&self, id: &str) -> AppResult<QueryResult> {
        self.tables
            .read()
            .await
            .results
            .get(id)
            .filter(|r| !r.is_expired(Utc::now()))
            .cloned()
            .ok_or_else(|| AppError::not_found("query result", id))
    }

    async fn purge_expired_results(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let mut tables = self.tables.write().await;
        let before = tables.results.len();
        tables.results.retain(|_, r| !r.is_expired(now));
        Ok((before - tables.results.len()) as u64)
    }

    async fn record_history(&self, entry: &QueryHistoryEntry) -> AppResult<()> {
        let mut tables = self.tables.write().await;
        tables.history.push_back(entry.clone());
        while tables.history.len() > self.history_limit {
            tables.history.pop_front();
        }
        Ok(())
    }

    async fn list_history(&self, user_id: &str, limit: usize) -> AppResult<Vec<QueryHistoryEntry>> {
        Ok(self
            .tables
            .read()
            .await
            .history
            .iter()
            .rev()
            .filter(|e| e.user_id == user_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn insert_approval(&self, approval: &ApprovalRequest) -> AppResult<()> {
        self.tables
            .write()
            .await
            .approvals
            .insert(approval.id.clone(), approval.clone());
        Ok(())
    }

    async fn get_approval(&self, id: &str) -> AppResult<ApprovalRequest> {
        self.tables
            .read()
            .await
            .approvals
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::not_found("approval", id))
    }

    async fn transition_approval(
        &self,
        id: &str,
        to: ApprovalStatus,
        reason: Option<&str>,
        at: DateTime<Utc>,
    ) -> AppResult<ApprovalRequest> {
        let mut tables = self.tables.write().await;
        let approval = tables
            .approvals
            .get_mut(id)
            .ok_or_else(|| AppError::not_found("approval", id))?;
        if !approval.is_pending() {
            return Err(AppError::NonPendingApproval {
                approval_id: id.to_string(),
                status: approval.status.to_string(),
            });
        }
        approval.status = to;
        approval.rejection_reason = reason.map(str::to_string);
        approval.completed_at = Some(at);
        Ok(approval.clone())
    }

    async fn insert_review(&self, review: &ApprovalReview) -> AppResult<()> {
        let mut tables = self.tables.write().await;
        let duplicate = tables
            .reviews
            .iter()
            .any(|r| r.approval_id == review.approval_id && r.reviewer == review.reviewer);
        if duplicate {
            return Err(AppError::DuplicateReview {
                approval_id: review.approval_id.clone(),
                reviewer: review.reviewer.clone(),
            });
        }
        tables.reviews.push(review.clone());
        Ok(())
    }

    async fn list_reviews(&self, approval_id: &str) -> AppResult<Vec<ApprovalReview>> {
        Ok(self
            .tables
            .read()
            .await
            .reviews
            .iter()
            .filter(|r| r.approval_id == approval_id)
            .cloned()
            .collect())
    }

    async fn insert_transaction(&self, tx: &QueryTransaction) -> AppResult<()> {
        self.tables
            .write()
            .await
            .transactions
            .insert(tx.id.clone(), tx.clone());
        Ok(())
    }

    async fn update_transaction(&self, tx: &QueryTransaction) -> AppResult<()> {
        let mut tables = self.tables.write().await;
        let slot = tables
            .transactions
            .get_mut(&tx.id)
            .ok_or_else(|| AppError::not_found("transaction", &tx.id))?;
        *slot = tx.clone();
        Ok(())
    }

    async fn get_transaction(&self, id: &str) -> AppResult<QueryTransaction> {
        self.tables
            .read()
            .await
            .transactions
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::not_found("transaction", id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use common::models::{OperationKind, QueryStatus, ReviewDecision};

    fn approval(id: &str) -> ApprovalRequest {
        ApprovalRequest {
            id: id.into(),
            query_id: "q1".into(),
            data_source_id: "ds1".into(),
            sql: "DELETE FROM t".into(),
            operation: OperationKind::Delete,
            requested_by: "alice".into(),
            status: ApprovalStatus::Pending,
            rejection_reason: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    fn review(reviewer: &str, decision: ReviewDecision) -> ApprovalReview {
        ApprovalReview {
            id: format!("r-{reviewer}"),
            approval_id: "a1".into(),
            reviewer: reviewer.into(),
            decision,
            comment: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_transition_only_from_pending() {
        let store = MemoryStore::new();
        store.insert_approval(&approval("a1")).await.unwrap();

        let done = store
            .transition_approval("a1", ApprovalStatus::Approved, None, Utc::now())
            .await
            .unwrap();
        assert_eq!(done.status, ApprovalStatus::Approved);
        assert!(done.completed_at.is_some());

        let err = store
            .transition_approval("a1", ApprovalStatus::Rejected, Some("late"), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NonPendingApproval { .. }));
    }

    #[tokio::test]
    async fn test_review_pair_is_unique() {
        let store = MemoryStore::new();
        store.insert_review(&review("bob", ReviewDecision::Approve)).await.unwrap();
        let err = store
            .insert_review(&review("bob", ReviewDecision::Reject))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::DuplicateReview { .. }));
        store.insert_review(&review("carol", ReviewDecision::Reject)).await.unwrap();
        assert_eq!(store.list_reviews("a1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_expired_results_are_hidden_and_purged() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let result = QueryResult {
            id: "r1".into(),
            query_id: "q1".into(),
            columns: vec![],
            column_types: vec![],
            rows: vec![],
            row_count: 0,
            created_at: now - Duration::hours(2),
            expires_at: now - Duration::hours(1),
        };
        store.insert_result(&result).await.unwrap();
        assert!(matches!(
            store.get_result("r1").await,
            Err(AppError::NotFound { .. })
        ));
        assert_eq!(store.purge_expired_results(now).await.unwrap(), 1);
        assert_eq!(store.purge_expired_results(now).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_history_drops_oldest_past_limit() {
        let store = MemoryStore::with_history_limit(3);
        for i in 0..5 {
            let entry = QueryHistoryEntry {
                id: format!("h{i}"),
                query_id: format!("q{i}"),
                user_id: "alice".into(),
                data_source_id: "ds1".into(),
                sql: "SELECT 1".into(),
                status: QueryStatus::Completed,
                row_count: Some(1),
                execution_time_ms: 1,
                error_message: None,
                executed_at: Utc::now(),
            };
            store.record_history(&entry).await.unwrap();
        }
        let ids: Vec<_> = store
            .list_history("alice", 10)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec!["h4", "h3", "h2"]);
    }
}
