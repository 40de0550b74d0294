//! Approval workflow.
//!
//! Write statements never run directly. Each one becomes a pending approval
//! request that is settled either by a review decision or by the outcome of
//! its preview transaction.

use std::sync::Arc;

use chrono::Utc;

use common::errors::{AppError, AppResult};
use common::models::{
    ApprovalDetail, ApprovalRequest, ApprovalReview, ApprovalStatus, Query, QueryTransaction,
    ReviewDecision, TransactionStatus,
};
use common::utils::{IdGenerator, StatementClassifier};

use crate::hooks::{Notifier, StatsHook};
use crate::store::MetadataStore;
use crate::transaction::TransactionManager;

/// Moves a pending approval to its final status.
///
/// An approval that already left `pending` is left untouched.
pub(crate) async fn settle(
    store: &dyn MetadataStore,
    stats: &dyn StatsHook,
    approval_id: &str,
    to: ApprovalStatus,
    reason: Option<&str>,
) -> AppResult<()> {
    match store
        .transition_approval(approval_id, to, reason, Utc::now())
        .await
    {
        Ok(approval) => {
            tracing::info!(approval_id, status = %approval.status, "approval settled");
            stats.on_approval_status_changed();
            Ok(())
        }
        Err(AppError::NonPendingApproval { status, .. }) => {
            tracing::debug!(approval_id, %status, "approval already settled");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Single-stage policy: any rejection rejects, otherwise any approval approves.
fn decide(reviews: &[ApprovalReview]) -> Option<ApprovalStatus> {
    if reviews.iter().any(|r| r.decision == ReviewDecision::Reject) {
        Some(ApprovalStatus::Rejected)
    } else if reviews.iter().any(|r| r.decision == ReviewDecision::Approve) {
        Some(ApprovalStatus::Approved)
    } else {
        None
    }
}

/// Coordinates approval requests, reviews and preview transactions.
pub struct ApprovalService {
    store: Arc<dyn MetadataStore>,
    classifier: Arc<dyn StatementClassifier>,
    notifier: Arc<dyn Notifier>,
    stats: Arc<dyn StatsHook>,
    transactions: Arc<TransactionManager>,
}

impl ApprovalService {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        classifier: Arc<dyn StatementClassifier>,
        notifier: Arc<dyn Notifier>,
        stats: Arc<dyn StatsHook>,
        transactions: Arc<TransactionManager>,
    ) -> Self {
        Self {
            store,
            classifier,
            notifier,
            stats,
            transactions,
        }
    }

    /// Wraps a write statement in a pending approval request.
    pub async fn create_approval(
        &self,
        data_source_id: &str,
        sql: &str,
        requester: &str,
    ) -> AppResult<ApprovalRequest> {
        let operation = self.classifier.classify(sql);
        if !operation.is_write() {
            return Err(AppError::Validation(
                "read statements do not need approval".into(),
            ));
        }
        if !self.classifier.is_single_statement(sql) {
            return Err(AppError::Validation(
                "an approval request holds a single statement".into(),
            ));
        }
        let source = self.store.get_data_source(data_source_id).await?;
        if !source.is_active {
            return Err(AppError::Validation(format!(
                "data source {} is inactive",
                source.id
            )));
        }

        let query = Query::new(IdGenerator::query_id(), requester, data_source_id, sql, operation);
        self.store.insert_query(&query).await?;

        let approval = ApprovalRequest {
            id: IdGenerator::approval_id(),
            query_id: query.id.clone(),
            data_source_id: data_source_id.to_string(),
            sql: sql.to_string(),
            operation,
            requested_by: requester.to_string(),
            status: ApprovalStatus::Pending,
            rejection_reason: None,
            created_at: Utc::now(),
            completed_at: None,
        };
        self.store.insert_approval(&approval).await?;

        tracing::info!(
            approval_id = %approval.id,
            data_source_id,
            requested_by = requester,
            operation = %operation,
            "approval requested"
        );
        self.notifier.on_approval_created(&approval);
        self.stats.on_approval_status_changed();
        Ok(approval)
    }

    /// Approval request with its reviews.
    pub async fn get(&self, approval_id: &str) -> AppResult<ApprovalDetail> {
        let approval = self.store.get_approval(approval_id).await?;
        let reviews = self.store.list_reviews(approval_id).await?;
        Ok(ApprovalDetail { approval, reviews })
    }

    /// Records a review and recomputes the approval status.
    ///
    /// # Errors
    /// `DuplicateReview` when the reviewer already reviewed this request,
    /// whatever its current status. `NonPendingApproval` when the request
    /// is already settled. `Validation` while a preview transaction for
    /// the request is open; it must be committed or rolled back instead.
    pub async fn review(
        &self,
        approval_id: &str,
        reviewer: &str,
        decision: ReviewDecision,
        comment: Option<String>,
    ) -> AppResult<ApprovalDetail> {
        let approval = self.store.get_approval(approval_id).await?;
        let existing = self.store.list_reviews(approval_id).await?;
        if existing.iter().any(|r| r.reviewer == reviewer) {
            return Err(AppError::DuplicateReview {
                approval_id: approval_id.to_string(),
                reviewer: reviewer.to_string(),
            });
        }
        ensure_pending(&approval)?;
        if let Some(tx) = self.transactions.active_for(&approval.data_source_id).await {
            if tx.approval_id == approval.id {
                return Err(AppError::Validation(format!(
                    "preview transaction {} is open; commit or roll it back",
                    tx.id
                )));
            }
        }

        let review = ApprovalReview {
            id: IdGenerator::approval_id(),
            approval_id: approval_id.to_string(),
            reviewer: reviewer.to_string(),
            decision,
            comment,
            created_at: Utc::now(),
        };
        self.store.insert_review(&review).await?;
        tracing::info!(approval_id, reviewer, decision = decision.as_str(), "review recorded");
        self.notifier.on_review_recorded(&approval, &review);

        let reviews = self.store.list_reviews(approval_id).await?;
        if let Some(status) = decide(&reviews) {
            let reason = match status {
                ApprovalStatus::Rejected => Some(
                    review
                        .comment
                        .clone()
                        .filter(|c| !c.trim().is_empty())
                        .unwrap_or_else(|| format!("rejected by {}", reviewer)),
                ),
                _ => None,
            };
            settle(
                self.store.as_ref(),
                self.stats.as_ref(),
                approval_id,
                status,
                reason.as_deref(),
            )
            .await?;
        }
        self.get(approval_id).await
    }

    /// Opens (or joins) the preview transaction for a pending approval.
    pub async fn start_transaction(&self, approval_id: &str, starter: &str) -> AppResult<QueryTransaction> {
        let approval = self.store.get_approval(approval_id).await?;
        ensure_pending(&approval)?;
        self.transactions.start(&approval, starter).await
    }

    /// Commits a preview transaction; the approval becomes `approved`.
    pub async fn commit_transaction(&self, transaction_id: &str) -> AppResult<QueryTransaction> {
        self.ensure_actionable(transaction_id).await?;
        self.transactions.commit(transaction_id).await
    }

    /// Rolls back a preview transaction; the approval becomes `rejected`.
    pub async fn rollback_transaction(&self, transaction_id: &str) -> AppResult<QueryTransaction> {
        self.ensure_actionable(transaction_id).await?;
        self.transactions.rollback(transaction_id).await
    }

    /// Transaction state is checked before approval state so a repeated
    /// commit or rollback reports `TransactionState`.
    async fn ensure_actionable(&self, transaction_id: &str) -> AppResult<()> {
        let tx = match self.store.get_transaction(transaction_id).await {
            Ok(tx) => tx,
            Err(AppError::NotFound { .. }) => {
                return Err(AppError::TransactionState(transaction_id.to_string()))
            }
            Err(e) => return Err(e),
        };
        if tx.status != TransactionStatus::Active {
            return Err(AppError::TransactionState(transaction_id.to_string()));
        }
        let approval = self.store.get_approval(&tx.approval_id).await?;
        ensure_pending(&approval)
    }
}

fn ensure_pending(approval: &ApprovalRequest) -> AppResult<()> {
    if approval.is_pending() {
        Ok(())
    } else {
        Err(AppError::NonPendingApproval {
            approval_id: approval.id.clone(),
            status: approval.status.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn review(reviewer: &str, decision: ReviewDecision) -> ApprovalReview {
        ApprovalReview {
            id: reviewer.into(),
            approval_id: "a1".into(),
            reviewer: reviewer.into(),
            decision,
            comment: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_no_reviews_leaves_pending() {
        assert_eq!(decide(&[]), None);
    }

    #[test]
    fn test_rejection_wins() {
        let reviews = [
            review("bob", ReviewDecision::Approve),
            review("carol", ReviewDecision::Reject),
        ];
        assert_eq!(decide(&reviews), Some(ApprovalStatus::Rejected));
    }

    #[test]
    fn test_single_approval_approves() {
        assert_eq!(
            decide(&[review("bob", ReviewDecision::Approve)]),
            Some(ApprovalStatus::Approved)
        );
    }
}
