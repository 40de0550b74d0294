mod support;

use std::sync::atomic::Ordering;

use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use common::errors::AppError;
use common::models::{ExportFormat, OperationKind, QueryStatus, SortDirection};
use query_service::result_store::PageRequest;
use query_service::store::MetadataStore;
use query_service::Submission;
use support::{data_source, failing_harness, harness, EngineState, DS};

#[tokio::test]
async fn test_read_is_materialized_and_recorded() {
    let h = harness(EngineState::with_accounts()).await;
    let result = h
        .service
        .execute_read("alice", DS, "SELECT * FROM accounts")
        .await
        .unwrap();
    assert_eq!(result.columns, vec!["id", "owner", "balance"]);
    assert_eq!(result.column_types, vec!["INT4", "TEXT", "INT8"]);
    assert_eq!(result.row_count, 5);
    assert!(result.expires_at > result.created_at);

    let query = h.service.get_query(&result.query_id).await.unwrap();
    assert_eq!(query.status, QueryStatus::Completed);
    assert_eq!(query.result_id.as_deref(), Some(result.id.as_str()));

    let history = h.service.history("alice", 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].row_count, Some(5));
    assert_eq!(history[0].status, QueryStatus::Completed);
}

#[tokio::test]
async fn test_submit_routes_reads_to_executor() {
    let h = harness(EngineState::with_accounts()).await;
    match h
        .service
        .submit("alice", DS, "select id from accounts where id = 1")
        .await
        .unwrap()
    {
        Submission::Completed(result) => assert_eq!(result.row_count, 5),
        other => panic!("expected completed read, got {:?}", other),
    }
}

#[tokio::test]
async fn test_writes_are_refused_by_executor() {
    let h = harness(EngineState::with_accounts()).await;
    let err = h
        .service
        .execute_read("alice", DS, "DELETE FROM accounts")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
    assert!(h.engine.executed().is_empty());
    assert!(h.service.history("alice", 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_missing_table_is_named() {
    let h = harness(EngineState::with_accounts()).await;
    let err = h
        .service
        .execute_read("alice", DS, "SELECT a.id FROM accounts a JOIN ghosts g ON g.id = a.id")
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "table not found: ghosts");
    assert!(h.engine.executed().is_empty());

    let history = h.service.history("alice", 10).await.unwrap();
    assert_eq!(history[0].status, QueryStatus::Failed);
}

#[tokio::test]
async fn test_engine_error_is_recorded_verbatim() {
    let message = "column \"nope\" does not exist";
    let h = harness(EngineState {
        read_error: Some(message.into()),
        ..EngineState::with_accounts()
    })
    .await;
    let err = h
        .service
        .execute_read("alice", DS, "SELECT nope FROM accounts")
        .await
        .unwrap_err();
    assert_eq!(err, AppError::Execution(message.into()));

    let entry = &h.service.history("alice", 10).await.unwrap()[0];
    assert_eq!(entry.error_message.as_deref(), Some(message));
    let query = h.service.get_query(&entry.query_id).await.unwrap();
    assert_eq!(query.status, QueryStatus::Failed);
    assert_eq!(query.error_message.as_deref(), Some(message));
}

#[tokio::test]
async fn test_credential_failures() {
    let h = harness(EngineState::with_accounts()).await;
    h.store
        .insert_data_source(data_source("ds-corrupt", "bm90IGEgYmxvYg==".into(), true))
        .await;
    h.store
        .insert_data_source(data_source("ds-wrong", h.cipher.encrypt("hunter2").unwrap(), true))
        .await;
    h.store
        .insert_data_source(data_source("ds-off", h.cipher.encrypt("secret").unwrap(), false))
        .await;

    let err = h
        .service
        .execute_read("alice", "ds-corrupt", "SELECT 1")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Decryption(_)));

    let err = h
        .service
        .execute_read("alice", "ds-wrong", "SELECT 1")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Connection(_)));

    let err = h
        .service
        .execute_read("alice", "ds-off", "SELECT 1")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    let err = h
        .service
        .execute_read("alice", "ds-none", "SELECT 1")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound { .. }));
}

#[tokio::test]
async fn test_paginate_and_export_stored_result() {
    let h = harness(EngineState {
        read_result: support::accounts(12),
        ..EngineState::with_accounts()
    })
    .await;
    let result = h
        .service
        .execute_read("alice", DS, "SELECT * FROM accounts")
        .await
        .unwrap();

    let req = PageRequest {
        page: 99,
        page_size: 5,
        sort_column: Some("balance".into()),
        sort_direction: SortDirection::Desc,
    };
    let page = h.service.paginate_result(&result.id, &req).await.unwrap();
    assert_eq!(page.pagination.page, 3);
    assert_eq!(page.pagination.total_pages, 3);
    let balances: Vec<Value> = page.rows.iter().map(|r| r["balance"].clone()).collect();
    assert_eq!(balances, vec![json!(200), json!(100)]);

    let csv = h
        .service
        .export_result(&result.id, ExportFormat::Csv)
        .await
        .unwrap();
    let csv = String::from_utf8(csv).unwrap();
    assert_eq!(csv.lines().count(), 13);
    assert_eq!(csv.lines().next(), Some("\"id\",\"owner\",\"balance\""));

    let json_bytes = h
        .service
        .export_result(&result.id, ExportFormat::Json)
        .await
        .unwrap();
    let parsed: Value = serde_json::from_slice(&json_bytes).unwrap();
    assert_eq!(parsed["row_count"], json!(12));
    assert_eq!(parsed["data"].as_array().unwrap().len(), 12);

    // the stored result is untouched by sorted views
    let stored = h.store.get_result(&result.id).await.unwrap();
    assert_eq!(stored.rows, result.rows);
}

#[tokio::test]
async fn test_explain_runs_in_rolled_back_transaction() {
    let h = harness(EngineState::with_accounts()).await;
    let plan = h
        .service
        .explain(DS, "SELECT * FROM accounts WHERE id = 1;", true)
        .await
        .unwrap();
    assert_eq!(plan.rows.len(), 1);
    assert_eq!(
        h.engine.executed(),
        vec!["EXPLAIN ANALYZE SELECT * FROM accounts WHERE id = 1".to_string()]
    );
    assert_eq!(h.engine.rollbacks(), 1);
    assert_eq!(h.engine.commits(), 0);
}

#[tokio::test]
async fn test_dry_run_delete_counts_without_deleting() {
    let h = harness(EngineState {
        write_result: query_service::connector::RowSet {
            rows_affected: 3,
            ..Default::default()
        },
        ..EngineState::with_accounts()
    })
    .await;
    let report = h
        .service
        .dry_run_delete(DS, "DELETE FROM accounts WHERE balance < 400")
        .await
        .unwrap();
    assert_eq!(report.affected_rows, 3);
    assert_eq!(report.sample_rows.len(), 5);
    assert_eq!(
        h.engine.executed(),
        vec![
            "SELECT * FROM accounts WHERE balance < 400 LIMIT 100".to_string(),
            "DELETE FROM accounts WHERE balance < 400".to_string(),
        ]
    );
    assert_eq!(h.engine.rollbacks(), 1);
    assert_eq!(h.engine.commits(), 0);

    let err = h
        .service
        .dry_run_delete(DS, "UPDATE accounts SET balance = 0")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
}

#[tokio::test]
async fn test_explain_analyze_of_write_needs_approval() {
    let h = harness(EngineState::with_accounts()).await;
    let sql = "EXPLAIN ANALYZE DELETE FROM accounts";
    let err = h.service.execute_read("alice", DS, sql).await.unwrap_err();
    assert_eq!(
        err,
        AppError::Validation("delete statements require approval".into())
    );
    assert!(h.engine.executed().is_empty());

    match h.service.submit("alice", DS, sql).await.unwrap() {
        Submission::PendingApproval(approval) => {
            assert_eq!(approval.operation, OperationKind::Delete)
        }
        other => panic!("expected approval, got {:?}", other),
    }
    assert!(h.engine.executed().is_empty());
}

#[tokio::test]
async fn test_result_write_failure_marks_query_failed() {
    let (h, store) = failing_harness(EngineState::with_accounts()).await;
    store.fail_insert_result.store(true, Ordering::SeqCst);

    let err = h
        .service
        .execute_read("alice", DS, "SELECT * FROM accounts")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::MetadataStore(_)));

    let entry = &h.service.history("alice", 10).await.unwrap()[0];
    assert_eq!(entry.status, QueryStatus::Failed);
    let query = h.service.get_query(&entry.query_id).await.unwrap();
    assert_eq!(query.status, QueryStatus::Failed);
    assert!(query.result_id.is_none());
}
