//! Read execution.
//!
//! Only `select` statements run here. Writes go through the approval
//! workflow and the transaction manager.

use std::sync::{Arc, LazyLock};
use std::time::Instant;

use chrono::Utc;
use regex::Regex;
use serde::Serialize;
use utoipa::ToSchema;

use common::errors::{AppError, AppResult};
use common::models::{
    ColumnInfo, DataSource, OperationKind, Query, QueryHistoryEntry, QueryResult, QueryStatus,
    Row,
};
use common::utils::{IdGenerator, StatementClassifier};

use crate::connector::{ConnectionProvider, RowSet};
use crate::hooks::StatsHook;
use crate::store::MetadataStore;

/// Rows sampled by a dry-run delete.
pub const DRY_RUN_SAMPLE_LIMIT: usize = 100;

static DELETE_FROM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)^\s*DELETE\s+FROM\s+(.+?)\s*;?\s*$").unwrap());
static UNSUPPORTED_DELETE_CLAUSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(USING|RETURNING)\b").unwrap());
static TRAILING_LIMIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bLIMIT\s+\d+\s*$").unwrap());

/// Output of `EXPLAIN`.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ExplainPlan {
    pub columns: Vec<ColumnInfo>,
    #[schema(value_type = Vec<Object>)]
    pub rows: Vec<Row>,
}

/// What a `DELETE` would remove, measured inside a rolled-back transaction.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DryRunReport {
    pub affected_rows: u64,
    pub columns: Vec<ColumnInfo>,
    /// Up to 100 of the rows the statement matches.
    #[schema(value_type = Vec<Object>)]
    pub sample_rows: Vec<Row>,
}

/// Runs read statements and materializes their results.
pub struct QueryExecutor {
    store: Arc<dyn MetadataStore>,
    connections: ConnectionProvider,
    classifier: Arc<dyn StatementClassifier>,
    stats: Arc<dyn StatsHook>,
    result_ttl: chrono::Duration,
}

impl QueryExecutor {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        connections: ConnectionProvider,
        classifier: Arc<dyn StatementClassifier>,
        stats: Arc<dyn StatsHook>,
        result_ttl: chrono::Duration,
    ) -> Self {
        Self {
            store,
            connections,
            classifier,
            stats,
            result_ttl,
        }
    }

    /// Executes a read and stores its result.
    ///
    /// The query is persisted as `running`, then flipped to `completed` or
    /// `failed`. Engine errors are recorded on the query verbatim and
    /// returned to the caller.
    pub async fn execute(&self, mut query: Query, source: &DataSource) -> AppResult<QueryResult> {
        let detected = self.classifier.classify(&query.sql);
        let operation = if detected.is_write() {
            detected
        } else {
            query.operation
        };
        if operation.is_write() {
            return Err(AppError::Validation(format!(
                "{} statements require approval",
                operation
            )));
        }
        if !self.classifier.is_single_statement(&query.sql) {
            return Err(AppError::Validation(
                "only a single statement can be executed".into(),
            ));
        }

        query.status = QueryStatus::Running;
        self.store.insert_query(&query).await?;

        let started = Instant::now();
        let outcome = self.run(&query.sql, source).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let now = Utc::now();
        query.execution_time_ms = Some(elapsed_ms);
        query.completed_at = Some(now);

        let outcome = match outcome {
            Ok(set) => {
                let result = QueryResult {
                    id: IdGenerator::result_id(),
                    query_id: query.id.clone(),
                    columns: set.columns.iter().map(|c| c.name.clone()).collect(),
                    column_types: set.columns.iter().map(|c| c.data_type.clone()).collect(),
                    row_count: set.rows.len(),
                    rows: set.rows,
                    created_at: now,
                    expires_at: now + self.result_ttl,
                };
                match self.store.insert_result(&result).await {
                    Ok(()) => {
                        query.status = QueryStatus::Completed;
                        query.result_id = Some(result.id.clone());
                        Ok(result)
                    }
                    Err(e) => {
                        query.status = QueryStatus::Failed;
                        query.error_message = Some(e.to_string());
                        Err(e)
                    }
                }
            }
            Err(e) => {
                query.status = QueryStatus::Failed;
                query.error_message = Some(e.to_string());
                Err(e)
            }
        };
        self.store.update_query(&query).await?;

        match &outcome {
            Ok(result) => tracing::info!(
                query_id = %query.id,
                data_source_id = %source.id,
                rows = result.row_count,
                elapsed_ms,
                "query completed"
            ),
            Err(e) => tracing::warn!(
                query_id = %query.id,
                data_source_id = %source.id,
                error = %e,
                "query failed"
            ),
        }

        self.record_history(&query, outcome.as_ref().ok().map(|r| r.row_count))
            .await;
        self.stats.on_query_completed();
        outcome
    }

    async fn run(&self, sql: &str, source: &DataSource) -> AppResult<RowSet> {
        let tables = self.classifier.referenced_tables(sql);
        let mut conn = self.connections.open_validated(source, &tables).await?;
        let outcome = conn.query(sql).await;
        conn.close().await;
        outcome
    }

    async fn record_history(&self, query: &Query, row_count: Option<usize>) {
        let entry = QueryHistoryEntry {
            id: IdGenerator::history_id(),
            query_id: query.id.clone(),
            user_id: query.user_id.clone(),
            data_source_id: query.data_source_id.clone(),
            sql: query.sql.clone(),
            status: query.status,
            row_count,
            execution_time_ms: query.execution_time_ms.unwrap_or_default(),
            error_message: query.error_message.clone(),
            executed_at: query.completed_at.unwrap_or_else(Utc::now),
        };
        if let Err(e) = self.store.record_history(&entry).await {
            tracing::warn!(query_id = %query.id, error = %e, "failed to record query history");
        }
    }

    /// Runs `EXPLAIN [ANALYZE]` inside a transaction that is always rolled back.
    pub async fn explain(&self, sql: &str, source: &DataSource, analyze: bool) -> AppResult<ExplainPlan> {
        if !self.classifier.is_single_statement(sql) {
            return Err(AppError::Validation(
                "only a single statement can be explained".into(),
            ));
        }
        let statement = sql.trim().trim_end_matches(';');
        let explain_sql = if analyze {
            format!("EXPLAIN ANALYZE {}", statement)
        } else {
            format!("EXPLAIN {}", statement)
        };

        let tables = self.classifier.referenced_tables(sql);
        let mut conn = self.connections.open_validated(source, &tables).await?;
        let mut tx = match conn.begin().await {
            Ok(tx) => tx,
            Err(e) => {
                conn.close().await;
                return Err(e);
            }
        };
        drop(conn);

        let outcome = tx.execute(&explain_sql).await;
        if let Err(e) = tx.rollback().await {
            tracing::warn!(data_source_id = %source.id, error = %e, "explain rollback failed");
        }
        let set = outcome?;
        Ok(ExplainPlan {
            columns: set.columns,
            rows: set.rows,
        })
    }

    /// Reports what a `DELETE FROM ...` would remove without removing it.
    pub async fn dry_run_delete(&self, sql: &str, source: &DataSource) -> AppResult<DryRunReport> {
        if self.classifier.classify(sql) != OperationKind::Delete {
            return Err(AppError::Validation("dry run requires a DELETE statement".into()));
        }
        if !self.classifier.is_single_statement(sql) {
            return Err(AppError::Validation(
                "only a single statement can be dry-run".into(),
            ));
        }
        let select_sql = sample_select(sql)?;

        let tables = self.classifier.referenced_tables(sql);
        let mut conn = self.connections.open_validated(source, &tables).await?;
        let mut tx = match conn.begin().await {
            Ok(tx) => tx,
            Err(e) => {
                conn.close().await;
                return Err(e);
            }
        };
        drop(conn);

        let sample = tx.execute(&select_sql).await;
        let deleted = match &sample {
            Ok(_) => Some(tx.execute(sql).await),
            Err(_) => None,
        };
        if let Err(e) = tx.rollback().await {
            tracing::warn!(data_source_id = %source.id, error = %e, "dry run rollback failed");
        }

        let mut sample = sample?;
        let affected_rows = match deleted {
            Some(done) => done?.rows_affected,
            None => 0,
        };
        sample.rows.truncate(DRY_RUN_SAMPLE_LIMIT);
        tracing::info!(data_source_id = %source.id, affected_rows, "dry run delete");
        Ok(DryRunReport {
            affected_rows,
            columns: sample.columns,
            sample_rows: sample.rows,
        })
    }
}

/// Turns `DELETE FROM <rest>` into `SELECT * FROM <rest>` capped at the sample size.
fn sample_select(sql: &str) -> AppResult<String> {
    let rest = DELETE_FROM
        .captures(sql)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .ok_or_else(|| {
            AppError::Validation("dry run supports DELETE FROM <table> [WHERE ...]".into())
        })?;
    if UNSUPPORTED_DELETE_CLAUSE.is_match(rest) {
        return Err(AppError::Validation(
            "dry run does not support USING or RETURNING clauses".into(),
        ));
    }
    if TRAILING_LIMIT.is_match(rest) {
        Ok(format!("SELECT * FROM {}", rest))
    } else {
        Ok(format!("SELECT * FROM {} LIMIT {}", rest, DRY_RUN_SAMPLE_LIMIT))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_select_rewrites_delete() {
        assert_eq!(
            sample_select("DELETE FROM orders WHERE id > 10;").unwrap(),
            "SELECT * FROM orders WHERE id > 10 LIMIT 100"
        );
        assert_eq!(
            sample_select("delete from logs where ts < now() limit 5").unwrap(),
            "SELECT * FROM logs where ts < now() limit 5"
        );
    }

    #[test]
    fn test_sample_select_rejects_other_forms() {
        assert!(sample_select("DELETE t FROM t JOIN u ON t.id = u.id").is_err());
        assert!(sample_select("DELETE FROM t USING u WHERE t.id = u.id").is_err());
        assert!(sample_select("DELETE FROM t RETURNING id").is_err());
    }
}
