//! Scripted engine used by the scenario tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;

use common::errors::{AppError, AppResult};
use common::models::{
    ApprovalRequest, ApprovalReview, ApprovalStatus, ColumnInfo, DataSource, DbType, Query,
    QueryHistoryEntry, QueryResult, QueryTransaction, Row,
};
use common::utils::sql_classifier::TableRef;
use common::utils::CredentialCipher;
use query_service::connector::{Connector, EngineConnection, EngineTransaction, RowSet};
use query_service::store::{MemoryStore, MetadataStore};
use query_service::QueryService;

pub const PASSWORD: &str = "secret";
pub const DS: &str = "ds-1";

/// Behaviour and counters of the fake engine.
#[derive(Default)]
pub struct EngineState {
    pub tables: Vec<String>,
    pub read_result: RowSet,
    pub write_result: RowSet,
    pub delay: Duration,
    /// Applied to every COMMIT and ROLLBACK.
    pub finish_delay: Duration,
    pub fail_commit: bool,
    pub read_error: Option<String>,
    pub executed: Mutex<Vec<String>>,
    pub tx_executions: AtomicUsize,
    pub commits: AtomicUsize,
    pub rollbacks: AtomicUsize,
}

impl EngineState {
    pub fn with_accounts() -> Self {
        Self {
            tables: vec!["accounts".into()],
            read_result: accounts(5),
            write_result: RowSet {
                rows_affected: 1,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    pub fn tx_executions(&self) -> usize {
        self.tx_executions.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn rollbacks(&self) -> usize {
        self.rollbacks.load(Ordering::SeqCst)
    }
}

pub fn accounts(n: i64) -> RowSet {
    let rows = (1..=n)
        .map(|i| {
            let mut row = Row::new();
            row.insert("id".into(), json!(i));
            row.insert("owner".into(), json!(format!("user{}", i)));
            row.insert("balance".into(), json!(i * 100));
            row
        })
        .collect();
    RowSet {
        columns: vec![
            ColumnInfo::new("id", "INT4"),
            ColumnInfo::new("owner", "TEXT"),
            ColumnInfo::new("balance", "INT8"),
        ],
        rows,
        rows_affected: 0,
    }
}

#[derive(Clone)]
pub struct ScriptedConnector(pub Arc<EngineState>);

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(
        &self,
        _source: &DataSource,
        password: &str,
    ) -> AppResult<Box<dyn EngineConnection>> {
        if password != PASSWORD {
            return Err(AppError::Connection("password authentication failed".into()));
        }
        Ok(Box::new(ScriptedConnection(self.0.clone())))
    }
}

struct ScriptedConnection(Arc<EngineState>);

#[async_trait]
impl EngineConnection for ScriptedConnection {
    async fn query(&mut self, sql: &str) -> AppResult<RowSet> {
        tokio::time::sleep(self.0.delay).await;
        self.0.executed.lock().unwrap().push(sql.to_string());
        match &self.0.read_error {
            Some(msg) => Err(AppError::Execution(msg.clone())),
            None => Ok(self.0.read_result.clone()),
        }
    }

    async fn table_exists(&mut self, table: &TableRef) -> AppResult<bool> {
        Ok(self
            .0
            .tables
            .iter()
            .any(|t| t.eq_ignore_ascii_case(&table.name)))
    }

    async fn begin(&mut self) -> AppResult<Box<dyn EngineTransaction>> {
        Ok(Box::new(ScriptedTransaction(self.0.clone())))
    }

    async fn close(&mut self) {}
}

struct ScriptedTransaction(Arc<EngineState>);

#[async_trait]
impl EngineTransaction for ScriptedTransaction {
    async fn execute(&mut self, sql: &str) -> AppResult<RowSet> {
        tokio::time::sleep(self.0.delay).await;
        self.0.tx_executions.fetch_add(1, Ordering::SeqCst);
        self.0.executed.lock().unwrap().push(sql.to_string());
        let upper = sql.trim_start().to_ascii_uppercase();
        if upper.starts_with("EXPLAIN") {
            let mut row = Row::new();
            row.insert("QUERY PLAN".into(), json!("Seq Scan on accounts"));
            Ok(RowSet {
                columns: vec![ColumnInfo::new("QUERY PLAN", "TEXT")],
                rows: vec![row],
                rows_affected: 0,
            })
        } else if upper.starts_with("SELECT") {
            Ok(self.0.read_result.clone())
        } else {
            Ok(self.0.write_result.clone())
        }
    }

    async fn commit(&mut self) -> AppResult<()> {
        tokio::time::sleep(self.0.finish_delay).await;
        if self.0.fail_commit {
            return Err(AppError::Execution("could not serialize access".into()));
        }
        self.0.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&mut self) -> AppResult<()> {
        tokio::time::sleep(self.0.finish_delay).await;
        self.0.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct Harness {
    pub service: Arc<QueryService>,
    pub store: Arc<MemoryStore>,
    pub engine: Arc<EngineState>,
    pub cipher: CredentialCipher,
}

pub fn data_source(id: &str, password_encrypted: String, is_active: bool) -> DataSource {
    DataSource {
        id: id.into(),
        name: format!("{} db", id),
        db_type: DbType::Postgres,
        host: "127.0.0.1".into(),
        port: 5432,
        database: "bank".into(),
        username: "app".into(),
        password_encrypted,
        is_active,
        created_at: Utc::now(),
    }
}

pub async fn harness(engine: EngineState) -> Harness {
    build(engine, |store| store).await
}

/// Harness whose service writes through a [`FailingStore`].
pub async fn failing_harness(engine: EngineState) -> (Harness, Arc<FailingStore>) {
    let mut failing = None;
    let h = build(engine, |store| {
        let wrapped = Arc::new(FailingStore::new(store));
        failing = Some(wrapped.clone());
        wrapped
    })
    .await;
    (h, failing.unwrap())
}

async fn build<S, F>(engine: EngineState, wrap: F) -> Harness
where
    S: MetadataStore + 'static,
    F: FnOnce(Arc<MemoryStore>) -> Arc<S>,
{
    let cipher = CredentialCipher::new(&[9u8; 32]);
    let store = Arc::new(MemoryStore::new());
    store
        .insert_data_source(data_source(DS, cipher.encrypt(PASSWORD).unwrap(), true))
        .await;
    let engine = Arc::new(engine);
    let service = QueryService::builder(
        wrap(store.clone()),
        Arc::new(ScriptedConnector(engine.clone())),
        cipher.clone(),
    )
    .build();
    Harness {
        service: Arc::new(service),
        store,
        engine,
        cipher,
    }
}

/// Memory store with switchable write failures.
pub struct FailingStore {
    inner: Arc<MemoryStore>,
    pub fail_insert_result: AtomicBool,
    pub fail_update_transaction: AtomicBool,
}

impl FailingStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            fail_insert_result: AtomicBool::new(false),
            fail_update_transaction: AtomicBool::new(false),
        }
    }

    fn check(flag: &AtomicBool) -> AppResult<()> {
        if flag.load(Ordering::SeqCst) {
            return Err(AppError::MetadataStore("metadata database unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for FailingStore {
    async fn get_data_source(&self, id: &str) -> AppResult<DataSource> {
        self.inner.get_data_source(id).await
    }

    async fn insert_query(&self, query: &Query) -> AppResult<()> {
        self.inner.insert_query(query).await
    }

    async fn update_query(&self, query: &Query) -> AppResult<()> {
        self.inner.update_query(query).await
    }

    async fn get_query(&self, id: &str) -> AppResult<Query> {
        self.inner.get_query(id).await
    }

    async fn insert_result(&self, result: &QueryResult) -> AppResult<()> {
        Self::check(&self.fail_insert_result)?;
        self.inner.insert_result(result).await
    }

    async fn get_result(&self, id: &str) -> AppResult<QueryResult> {
        self.inner.get_result(id).await
    }

    async fn purge_expired_results(&self, now: DateTime<Utc>) -> AppResult<u64> {
        self.inner.purge_expired_results(now).await
    }

    async fn record_history(&self, entry: &QueryHistoryEntry) -> AppResult<()> {
        self.inner.record_history(entry).await
    }

    async fn list_history(&self, user_id: &str, limit: usize) -> AppResult<Vec<QueryHistoryEntry>> {
        self.inner.list_history(user_id, limit).await
    }

    async fn insert_approval(&self, approval: &ApprovalRequest) -> AppResult<()> {
        self.inner.insert_approval(approval).await
    }

    async fn get_approval(&self, id: &str) -> AppResult<ApprovalRequest> {
        self.inner.get_approval(id).await
    }

    async fn transition_approval(
        &self,
        id: &str,
        to: ApprovalStatus,
        reason: Option<&str>,
        at: DateTime<Utc>,
    ) -> AppResult<ApprovalRequest> {
        self.inner.transition_approval(id, to, reason, at).await
    }

    async fn insert_review(&self, review: &ApprovalReview) -> AppResult<()> {
        self.inner.insert_review(review).await
    }

    async fn list_reviews(&self, approval_id: &str) -> AppResult<Vec<ApprovalReview>> {
        self.inner.list_reviews(approval_id).await
    }

    async fn insert_transaction(&self, tx: &QueryTransaction) -> AppResult<()> {
        self.inner.insert_transaction(tx).await
    }

    async fn update_transaction(&self, tx: &QueryTransaction) -> AppResult<()> {
        Self::check(&self.fail_update_transaction)?;
        self.inner.update_transaction(tx).await
    }

    async fn get_transaction(&self, id: &str) -> AppResult<QueryTransaction> {
        self.inner.get_transaction(id).await
    }
}
