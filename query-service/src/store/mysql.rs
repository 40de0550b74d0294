//! MySQL-backed metadata store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::MySqlPool;

use common::errors::{AppError, AppResult};
use common::models::{
    ApprovalRequest, ApprovalReview, ApprovalStatus, DataSource, DbType, OperationKind, Query,
    QueryHistoryEntry, QueryResult, QueryStatus, QueryTransaction, ReviewDecision,
    TransactionPreview, TransactionStatus,
};

use super::MetadataStore;

const TABLES: [(&str, &str); 7] = [
    (
        "data_sources",
        "CREATE TABLE IF NOT EXISTS `data_sources` (
            `id`                 VARCHAR(64)       NOT NULL,
            `name`               VARCHAR(100)      NOT NULL,
            `db_type`            VARCHAR(32)       NOT NULL,
            `host`               VARCHAR(255)      NOT NULL,
            `port`               SMALLINT UNSIGNED NOT NULL,
            `database_name`      VARCHAR(128)      NOT NULL,
            `username`           VARCHAR(128)      NOT NULL,
            `password_encrypted` VARCHAR(1024)     NOT NULL,
            `is_active`          TINYINT(1)        NOT NULL DEFAULT 1,
            `created_at`         DATETIME(3)       NOT NULL DEFAULT CURRENT_TIMESTAMP(3),
            PRIMARY KEY (`id`)
        ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_unicode_ci",
    ),
    (
        "queries",
        "CREATE TABLE IF NOT EXISTS `queries` (
            `id`                VARCHAR(64)     NOT NULL,
            `user_id`           VARCHAR(128)    NOT NULL,
            `data_source_id`    VARCHAR(64)     NOT NULL,
            `sql_text`          MEDIUMTEXT      NOT NULL,
            `operation`         VARCHAR(32)     NOT NULL,
            `status`            VARCHAR(16)     NOT NULL,
            `error_message`     TEXT            DEFAULT NULL,
            `result_id`         VARCHAR(64)     DEFAULT NULL,
            `execution_time_ms` BIGINT UNSIGNED DEFAULT NULL,
            `created_at`        DATETIME(3)     NOT NULL,
            `completed_at`      DATETIME(3)     DEFAULT NULL,
            PRIMARY KEY (`id`),
            KEY `idx_user_id` (`user_id`),
            KEY `idx_created_at` (`created_at`)
        ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_unicode_ci",
    ),
    (
        "query_results",
        "CREATE TABLE IF NOT EXISTS `query_results` (
            `id`                VARCHAR(64)     NOT NULL,
            `query_id`          VARCHAR(64)     NOT NULL,
            `columns_json`      TEXT            NOT NULL,
            `column_types_json` TEXT            NOT NULL,
            `rows_json`         LONGTEXT        NOT NULL,
            `row_count`         BIGINT UNSIGNED NOT NULL,
            `created_at`        DATETIME(3)     NOT NULL,
            `expires_at`        DATETIME(3)     NOT NULL,
            PRIMARY KEY (`id`),
            KEY `idx_expires_at` (`expires_at`)
        ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_unicode_ci",
    ),
    (
        "query_history",
        "CREATE TABLE IF NOT EXISTS `query_history` (
            `id`                VARCHAR(64)     NOT NULL,
            `query_id`          VARCHAR(64)     NOT NULL,
            `user_id`           VARCHAR(128)    NOT NULL,
            `data_source_id`    VARCHAR(64)     NOT NULL,
            `sql_text`          MEDIUMTEXT      NOT NULL,
            `status`            VARCHAR(16)     NOT NULL,
            `row_count`         BIGINT UNSIGNED DEFAULT NULL,
            `execution_time_ms` BIGINT UNSIGNED NOT NULL,
            `error_message`     TEXT            DEFAULT NULL,
            `executed_at`       DATETIME(3)     NOT NULL,
            PRIMARY KEY (`id`),
            KEY `idx_user_executed` (`user_id`, `executed_at`)
        ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_unicode_ci",
    ),
    (
        "approval_requests",
        "CREATE TABLE IF NOT EXISTS `approval_requests` (
            `id`               VARCHAR(64)  NOT NULL,
            `query_id`         VARCHAR(64)  NOT NULL,
            `data_source_id`   VARCHAR(64)  NOT NULL,
            `sql_text`         MEDIUMTEXT   NOT NULL,
            `operation`        VARCHAR(32)  NOT NULL,
            `requested_by`     VARCHAR(128) NOT NULL,
            `status`           VARCHAR(16)  NOT NULL,
            `rejection_reason` TEXT         DEFAULT NULL,
            `created_at`       DATETIME(3)  NOT NULL,
            `completed_at`     DATETIME(3)  DEFAULT NULL,
            PRIMARY KEY (`id`),
            KEY `idx_status` (`status`)
        ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_unicode_ci",
    ),
    (
        "approval_reviews",
        "CREATE TABLE IF NOT EXISTS `approval_reviews` (
            `id`          VARCHAR(64)  NOT NULL,
            `approval_id` VARCHAR(64)  NOT NULL,
            `reviewer`    VARCHAR(128) NOT NULL,
            `decision`    VARCHAR(16)  NOT NULL,
            `comment`     TEXT         DEFAULT NULL,
            `created_at`  DATETIME(3)  NOT NULL,
            PRIMARY KEY (`id`),
            UNIQUE KEY `uk_approval_reviewer` (`approval_id`, `reviewer`)
        ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_unicode_ci",
    ),
    (
        "query_transactions",
        "CREATE TABLE IF NOT EXISTS `query_transactions` (
            `id`             VARCHAR(64)  NOT NULL,
            `approval_id`    VARCHAR(64)  NOT NULL,
            `data_source_id` VARCHAR(64)  NOT NULL,
            `sql_text`       MEDIUMTEXT   NOT NULL,
            `started_by`     VARCHAR(128) NOT NULL,
            `status`         VARCHAR(16)  NOT NULL,
            `preview_json`   LONGTEXT     NOT NULL,
            `error_message`  TEXT         DEFAULT NULL,
            `started_at`     DATETIME(3)  NOT NULL,
            `completed_at`   DATETIME(3)  DEFAULT NULL,
            PRIMARY KEY (`id`),
            KEY `idx_approval_id` (`approval_id`)
        ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_unicode_ci",
    ),
];

#[derive(sqlx::FromRow)]
struct DataSourceRow {
    id: String,
    name: String,
    db_type: String,
    host: String,
    port: u16,
    database_name: String,
    username: String,
    password_encrypted: String,
    is_active: bool,
    created_at: DateTime<Utc>,
}

impl DataSourceRow {
    fn into_model(self) -> AppResult<DataSource> {
        Ok(DataSource {
            db_type: parse_column(&self.db_type, DbType::parse, "db_type")?,
            id: self.id,
            name: self.name,
            host: self.host,
            port: self.port,
            database: self.database_name,
            username: self.username,
            password_encrypted: self.password_encrypted,
            is_active: self.is_active,
            created_at: self.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct QueryRow {
    id: String,
    user_id: String,
    data_source_id: String,
    sql_text: String,
    operation: String,
    status: String,
    error_message: Option<String>,
    result_id: Option<String>,
    execution_time_ms: Option<u64>,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl QueryRow {
    fn into_model(self) -> AppResult<Query> {
        Ok(Query {
            operation: parse_column(&self.operation, OperationKind::parse, "operation")?,
            status: parse_column(&self.status, QueryStatus::parse, "status")?,
            id: self.id,
            user_id: self.user_id,
            data_source_id: self.data_source_id,
            sql: self.sql_text,
            error_message: self.error_message,
            result_id: self.result_id,
            execution_time_ms: self.execution_time_ms,
            created_at: self.created_at,
            completed_at: self.completed_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ResultRow {
    id: String,
    query_id: String,
    columns_json: String,
    column_types_json: String,
    rows_json: String,
    row_count: u64,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl ResultRow {
    fn into_model(self) -> AppResult<QueryResult> {
        Ok(QueryResult {
            columns: from_json(&self.columns_json)?,
            column_types: from_json(&self.column_types_json)?,
            rows: from_json(&self.rows_json)?,
            row_count: self.row_count as usize,
            id: self.id,
            query_id: self.query_id,
            created_at: self.created_at,
            expires_at: self.expires_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct HistoryRow {
    id: String,
    query_id: String,
    user_id: String,
    data_source_id: String,
    sql_text: String,
    status: String,
    row_count: Option<u64>,
    execution_time_ms: u64,
    error_message: Option<String>,
    executed_at: DateTime<Utc>,
}

impl HistoryRow {
    fn into_model(self) -> AppResult<QueryHistoryEntry> {
        Ok(QueryHistoryEntry {
            status: parse_column(&self.status, QueryStatus::parse, "status")?,
            id: self.id,
            query_id: self.query_id,
            user_id: self.user_id,
            data_source_id: self.data_source_id,
            sql: self.sql_text,
            row_count: self.row_count.map(|n| n as usize),
            execution_time_ms: self.execution_time_ms,
            error_message: self.error_message,
            executed_at: self.executed_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ApprovalRow {
    id: String,
    query_id: String,
    data_source_id: String,
    sql_text: String,
    operation: String,
    requested_by: String,
    status: String,
    rejection_reason: Option<String>,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl ApprovalRow {
    fn into_model(self) -> AppResult<ApprovalRequest> {
        Ok(ApprovalRequest {
            operation: parse_column(&self.operation, OperationKind::parse, "operation")?,
            status: parse_column(&self.status, ApprovalStatus::parse, "status")?,
            id: self.id,
            query_id: self.query_id,
            data_source_id: self.data_source_id,
            sql: self.sql_text,
            requested_by: self.requested_by,
            rejection_reason: self.rejection_reason,
            created_at: self.created_at,
            completed_at: self.completed_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ReviewRow {
    id: String,
    approval_id: String,
    reviewer: String,
    decision: String,
    comment: Option<String>,
    created_at: DateTime<Utc>,
}

impl ReviewRow {
    fn into_model(self) -> AppResult<ApprovalReview> {
        Ok(ApprovalReview {
            decision: parse_column(&self.decision, ReviewDecision::parse, "decision")?,
            id: self.id,
            approval_id: self.approval_id,
            reviewer: self.reviewer,
            comment: self.comment,
            created_at: self.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TransactionRow {
    id: String,
    approval_id: String,
    data_source_id: String,
    sql_text: String,
    started_by: String,
    status: String,
    preview_json: String,
    error_message: Option<String>,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl TransactionRow {
    fn into_model(self) -> AppResult<QueryTransaction> {
        let preview: TransactionPreview = from_json(&self.preview_json)?;
        Ok(QueryTransaction {
            status: parse_column(&self.status, TransactionStatus::parse, "status")?,
            preview,
            id: self.id,
            approval_id: self.approval_id,
            data_source_id: self.data_source_id,
            sql: self.sql_text,
            started_by: self.started_by,
            error_message: self.error_message,
            started_at: self.started_at,
            completed_at: self.completed_at,
        })
    }
}

fn parse_column<T>(value: &str, parse: fn(&str) -> Option<T>, column: &str) -> AppResult<T> {
    parse(value).ok_or_else(|| {
        AppError::MetadataStore(format!("unexpected {} value '{}'", column, value))
    })
}

fn from_json<T: serde::de::DeserializeOwned>(text: &str) -> AppResult<T> {
    serde_json::from_str(text)
        .map_err(|e| AppError::MetadataStore(format!("corrupt stored JSON: {}", e)))
}

fn to_json<T: serde::Serialize>(value: &T) -> AppResult<String> {
    serde_json::to_string(value).map_err(|e| AppError::Internal(e.to_string()))
}

fn store_err(context: &'static str) -> impl FnOnce(sqlx::Error) -> AppError {
    move |e| AppError::MetadataStore(format!("{}: {}", context, e))
}

/// Metadata store persisted in MySQL.
pub struct MySqlStore {
    pool: MySqlPool,
}

impl MySqlStore {
    /// Wraps the pool and creates the metadata tables if they do not exist.
    pub async fn new(pool: MySqlPool) -> AppResult<Self> {
        let store = Self { pool };
        store.ensure_tables().await?;
        Ok(store)
    }

    async fn ensure_tables(&self) -> AppResult<()> {
        for (name, ddl) in TABLES {
            sqlx::query(ddl)
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    AppError::MetadataStore(format!("Failed to create {} table: {}", name, e))
                })?;
        }
        tracing::info!(count = TABLES.len(), "Metadata tables ensured");
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for MySqlStore {
    async fn get_data_source(&self, id: &str) -> AppResult<DataSource> {
        sqlx::query_as::<_, DataSourceRow>(
            "SELECT `id`, `name`, `db_type`, `host`, `port`, `database_name`, `username`,
                    `password_encrypted`, `is_active`, `created_at`
             FROM `data_sources` WHERE `id` = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err("Failed to load data source"))?
        .ok_or_else(|| AppError::not_found("data source", id))?
        .into_model()
    }

    async fn insert_query(&self, query: &Query) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO `queries` (`id`, `user_id`, `data_source_id`, `sql_text`, `operation`,
                `status`, `error_message`, `result_id`, `execution_time_ms`, `created_at`, `completed_at`)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&query.id)
        .bind(&query.user_id)
        .bind(&query.data_source_id)
        .bind(&query.sql)
        .bind(query.operation.as_str())
        .bind(query.status.as_str())
        .bind(&query.error_message)
        .bind(&query.result_id)
        .bind(query.execution_time_ms)
        .bind(query.created_at)
        .bind(query.completed_at)
        .execute(&self.pool)
        .await
        .map_err(store_err("Failed to save query"))?;
        Ok(())
    }

    async fn update_query(&self, query: &Query) -> AppResult<()> {
        let done = sqlx::query(
            "UPDATE `queries` SET `status` = ?, `error_message` = ?, `result_id` = ?,
                `execution_time_ms` = ?, `completed_at` = ?
             WHERE `id` = ?",
        )
        .bind(query.status.as_str())
        .bind(&query.error_message)
        .bind(&query.result_id)
        .bind(query.execution_time_ms)
        .bind(query.completed_at)
        .bind(&query.id)
        .execute(&self.pool)
        .await
        .map_err(store_err("Failed to update query"))?;
        if done.rows_affected() == 0 {
            // MySQL reports zero for an update that changed nothing.
            self.get_query(&query.id).await?;
        }
        Ok(())
    }

    async fn get_query(&self, id: &str) -> AppResult<Query> {
        sqlx::query_as::<_, QueryRow>("SELECT * FROM `queries` WHERE `id` = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err("Failed to load query"))?
            .ok_or_else(|| AppError::not_found("query", id))?
            .into_model()
    }

    async fn insert_result(&self, result: &QueryResult) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO `query_results` (`id`, `query_id`, `columns_json`, `column_types_json`,
                `rows_json`, `row_count`, `created_at`, `expires_at`)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&result.id)
        .bind(&result.query_id)
        .bind(to_json(&result.columns)?)
        .bind(to_json(&result.column_types)?)
        .bind(to_json(&result.rows)?)
        .bind(result.row_count as u64)
        .bind(result.created_at)
        .bind(result.expires_at)
        .execute(&self.pool)
        .await
        .map_err(store_err("Failed to save query result"))?;
        Ok(())
    }

    async fn get_result(&self, id: &str) -> AppResult<QueryResult> {
        sqlx::query_as::<_, ResultRow>(
            "SELECT * FROM `query_results` WHERE `id` = ? AND `expires_at` > ?",
        )
        .bind(id)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err("Failed to load query result"))?
        .ok_or_else(|| AppError::not_found("query result", id))?
        .into_model()
    }

    async fn purge_expired_results(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let done = sqlx::query("DELETE FROM `query_results` WHERE `expires_at` <= ?")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(store_err("Failed to purge query results"))?;
        Ok(done.rows_affected())
    }

    async fn record_history(&self, entry: &QueryHistoryEntry) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO `query_history` (`id`, `query_id`, `user_id`, `data_source_id`, `sql_text`,
                `status`, `row_count`, `execution_time_ms`, `error_message`, `executed_at`)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.id)
        .bind(&entry.query_id)
        .bind(&entry.user_id)
        .bind(&entry.data_source_id)
        .bind(&entry.sql)
        .bind(entry.status.as_str())
        .bind(entry.row_count.map(|n| n as u64))
        .bind(entry.execution_time_ms)
        .bind(&entry.error_message)
        .bind(entry.executed_at)
        .execute(&self.pool)
        .await
        .map_err(store_err("Failed to record query history"))?;
        Ok(())
    }

    async fn list_history(&self, user_id: &str, limit: usize) -> AppResult<Vec<QueryHistoryEntry>> {
        sqlx::query_as::<_, HistoryRow>(
            "SELECT * FROM `query_history` WHERE `user_id` = ?
             ORDER BY `executed_at` DESC LIMIT ?",
        )
        .bind(user_id)
        .bind(limit as u64)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err("Failed to list query history"))?
        .into_iter()
        .map(HistoryRow::into_model)
        .collect()
    }

    async fn insert_approval(&self, approval: &ApprovalRequest) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO `approval_requests` (`id`, `query_id`, `data_source_id`, `sql_text`,
                `operation`, `requested_by`, `status`, `rejection_reason`, `created_at`, `completed_at`)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&approval.id)
        .bind(&approval.query_id)
        .bind(&approval.data_source_id)
        .bind(&approval.sql)
        .bind(approval.operation.as_str())
        .bind(&approval.requested_by)
        .bind(approval.status.as_str())
        .bind(&approval.rejection_reason)
        .bind(approval.created_at)
        .bind(approval.completed_at)
        .execute(&self.pool)
        .await
        .map_err(store_err("Failed to save approval"))?;
        Ok(())
    }

    async fn get_approval(&self, id: &str) -> AppResult<ApprovalRequest> {
        sqlx::query_as::<_, ApprovalRow>("SELECT * FROM `approval_requests` WHERE `id` = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err("Failed to load approval"))?
            .ok_or_else(|| AppError::not_found("approval", id))?
            .into_model()
    }

    async fn transition_approval(
        &self,
        id: &str,
        to: ApprovalStatus,
        reason: Option<&str>,
        at: DateTime<Utc>,
    ) -> AppResult<ApprovalRequest> {
        let done = sqlx::query(
            "UPDATE `approval_requests`
             SET `status` = ?, `rejection_reason` = ?, `completed_at` = ?
             WHERE `id` = ? AND `status` = 'pending'",
        )
        .bind(to.as_str())
        .bind(reason)
        .bind(at)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(store_err("Failed to update approval"))?;

        let approval = self.get_approval(id).await?;
        if done.rows_affected() == 0 {
            return Err(AppError::NonPendingApproval {
                approval_id: id.to_string(),
                status: approval.status.to_string(),
            });
        }
        Ok(approval)
    }

    async fn insert_review(&self, review: &ApprovalReview) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO `approval_reviews` (`id`, `approval_id`, `reviewer`, `decision`, `comment`, `created_at`)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&review.id)
        .bind(&review.approval_id)
        .bind(&review.reviewer)
        .bind(review.decision.as_str())
        .bind(&review.comment)
        .bind(review.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => AppError::DuplicateReview {
                approval_id: review.approval_id.clone(),
                reviewer: review.reviewer.clone(),
            },
            _ => AppError::MetadataStore(format!("Failed to save review: {}", e)),
        })?;
        Ok(())
    }

    async fn list_reviews(&self, approval_id: &str) -> AppResult<Vec<ApprovalReview>> {
        sqlx::query_as::<_, ReviewRow>(
            "SELECT * FROM `approval_reviews` WHERE `approval_id` = ? ORDER BY `created_at`",
        )
        .bind(approval_id)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err("Failed to list reviews"))?
        .into_iter()
        .map(ReviewRow::into_model)
        .collect()
    }

    async fn insert_transaction(&self, tx: &QueryTransaction) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO `query_transactions` (`id`, `approval_id`, `data_source_id`, `sql_text`,
                `started_by`, `status`, `preview_json`, `error_message`, `started_at`, `completed_at`)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&tx.id)
        .bind(&tx.approval_id)
        .bind(&tx.data_source_id)
        .bind(&tx.sql)
        .bind(&tx.started_by)
        .bind(tx.status.as_str())
        .bind(to_json(&tx.preview)?)
        .bind(&tx.error_message)
        .bind(tx.started_at)
        .bind(tx.completed_at)
        .execute(&self.pool)
        .await
        .map_err(store_err("Failed to save transaction"))?;
        Ok(())
    }

    async fn update_transaction(&self, tx: &QueryTransaction) -> AppResult<()> {
        sqlx::query(
            "UPDATE `query_transactions`
             SET `status` = ?, `preview_json` = ?, `error_message` = ?, `completed_at` = ?
             WHERE `id` = ?",
        )
        .bind(tx.status.as_str())
        .bind(to_json(&tx.preview)?)
        .bind(&tx.error_message)
        .bind(tx.completed_at)
        .bind(&tx.id)
        .execute(&self.pool)
        .await
        .map_err(store_err("Failed to update transaction"))?;
        Ok(())
    }

    async fn get_transaction(&self, id: &str) -> AppResult<QueryTransaction> {
        sqlx::query_as::<_, TransactionRow>("SELECT * FROM `query_transactions` WHERE `id` = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err("Failed to load transaction"))?
            .ok_or_else(|| AppError::not_found("transaction", id))?
            .into_model()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_column_value_is_store_error() {
        let err = parse_column("archived", ApprovalStatus::parse, "status").unwrap_err();
        assert!(matches!(err, AppError::MetadataStore(_)));
        assert_eq!(
            parse_column("rolled_back", TransactionStatus::parse, "status").unwrap(),
            TransactionStatus::RolledBack
        );
    }

    #[test]
    fn test_every_table_is_created_idempotently() {
        for (name, ddl) in TABLES {
            assert!(ddl.contains(&format!("CREATE TABLE IF NOT EXISTS `{}`", name)));
        }
    }
}
