//! Outbound collaborator hooks.
//!
//! Both hooks are best effort. They never block the caller and their
//! failures are only logged.

use redis::aio::ConnectionManager as RedisConnectionManager;
use redis::AsyncCommands;
use serde_json::json;

use common::errors::{AppError, AppResult};
use common::models::{ApprovalRequest, ApprovalReview};

/// Approval notification dispatcher.
pub trait Notifier: Send + Sync {
    fn on_approval_created(&self, approval: &ApprovalRequest);
    fn on_review_recorded(&self, approval: &ApprovalRequest, review: &ApprovalReview);
}

/// Dashboard statistics invalidation.
pub trait StatsHook: Send + Sync {
    fn on_query_completed(&self);
    fn on_approval_status_changed(&self);
}

/// Notifier that only writes log lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn on_approval_created(&self, approval: &ApprovalRequest) {
        tracing::info!(
            approval_id = %approval.id,
            requested_by = %approval.requested_by,
            operation = %approval.operation,
            "approval created"
        );
    }

    fn on_review_recorded(&self, approval: &ApprovalRequest, review: &ApprovalReview) {
        tracing::info!(
            approval_id = %approval.id,
            reviewer = %review.reviewer,
            decision = review.decision.as_str(),
            "review recorded"
        );
    }
}

/// Posts approval events to a webhook.
#[derive(Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    fn post(&self, event: &'static str, body: serde_json::Value) {
        let client = self.client.clone();
        let url = self.url.clone();
        tokio::spawn(async move {
            match client.post(&url).json(&body).send().await {
                Ok(resp) if resp.status().is_success() => {
                    tracing::debug!(event, "notification delivered");
                }
                Ok(resp) => {
                    tracing::warn!(event, status = %resp.status(), "notification rejected");
                }
                Err(e) => {
                    tracing::warn!(event, error = %e, "notification failed");
                }
            }
        });
    }
}

impl Notifier for WebhookNotifier {
    fn on_approval_created(&self, approval: &ApprovalRequest) {
        self.post(
            "approval_created",
            json!({ "event": "approval_created", "approval": approval }),
        );
    }

    fn on_review_recorded(&self, approval: &ApprovalRequest, review: &ApprovalReview) {
        self.post(
            "review_recorded",
            json!({ "event": "review_recorded", "approval": approval, "review": review }),
        );
    }
}

/// Stats hook that does nothing beyond a debug line.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStatsHook;

impl StatsHook for NoopStatsHook {
    fn on_query_completed(&self) {
        tracing::debug!("query stats changed");
    }

    fn on_approval_status_changed(&self) {
        tracing::debug!("approval stats changed");
    }
}

/// Drops cached dashboard statistics from Redis.
#[derive(Clone)]
pub struct RedisStatsHook {
    manager: RedisConnectionManager,
    keys: Vec<String>,
}

impl RedisStatsHook {
    pub async fn connect(url: &str, keys: Vec<String>) -> AppResult<Self> {
        let client = redis::Client::open(url).map_err(|e| AppError::Config(e.to_string()))?;
        let manager = RedisConnectionManager::new(client)
            .await
            .map_err(|e| AppError::Connection(e.to_string()))?;
        Ok(Self { manager, keys })
    }

    fn invalidate(&self) {
        if self.keys.is_empty() {
            return;
        }
        let mut conn = self.manager.clone();
        let keys = self.keys.clone();
        tokio::spawn(async move {
            let result: redis::RedisResult<()> = conn.del(&keys).await;
            if let Err(e) = result {
                tracing::warn!(error = %e, "stats cache invalidation failed");
            }
        });
    }
}

impl StatsHook for RedisStatsHook {
    fn on_query_completed(&self) {
        self.invalidate();
    }

    fn on_approval_status_changed(&self) {
        self.invalidate();
    }
}
