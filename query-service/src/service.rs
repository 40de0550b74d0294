//! 查询引擎服务门面
//!
//! Entry point used by the HTTP layer. Owns the executor, result store,
//! transaction manager and approval workflow and wires them to one
//! metadata store.

use std::sync::Arc;

use serde::Serialize;
use utoipa::ToSchema;

use common::errors::{AppError, AppResult};
use common::models::{
    ApprovalDetail, ApprovalRequest, DataSource, ExportFormat, OperationKind, Query,
    QueryHistoryEntry, QueryResult, QueryTransaction, ReviewDecision,
};
use common::utils::{CredentialCipher, IdGenerator, LexicalClassifier, StatementClassifier};

use crate::approval::ApprovalService;
use crate::connector::{ConnectionProvider, Connector};
use crate::executor::{DryRunReport, ExplainPlan, QueryExecutor};
use crate::hooks::{LogNotifier, NoopStatsHook, Notifier, StatsHook};
use crate::result_store::{PageRequest, ResultPage, ResultStore};
use crate::store::MetadataStore;
use crate::transaction::TransactionManager;

/// Outcome of a submitted statement.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Submission {
    /// A read ran and its result was stored.
    Completed(QueryResult),
    /// A write was queued for review.
    PendingApproval(ApprovalRequest),
}

/// Assembles a [`QueryService`].
pub struct QueryServiceBuilder {
    store: Arc<dyn MetadataStore>,
    connector: Arc<dyn Connector>,
    cipher: CredentialCipher,
    classifier: Arc<dyn StatementClassifier>,
    notifier: Arc<dyn Notifier>,
    stats: Arc<dyn StatsHook>,
    result_ttl: chrono::Duration,
}

impl QueryServiceBuilder {
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn stats_hook(mut self, stats: Arc<dyn StatsHook>) -> Self {
        self.stats = stats;
        self
    }

    pub fn classifier(mut self, classifier: Arc<dyn StatementClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn result_ttl(mut self, ttl: chrono::Duration) -> Self {
        self.result_ttl = ttl;
        self
    }

    pub fn build(self) -> QueryService {
        let connections = ConnectionProvider::new(self.connector, self.cipher);
        let executor = QueryExecutor::new(
            self.store.clone(),
            connections.clone(),
            self.classifier.clone(),
            self.stats.clone(),
            self.result_ttl,
        );
        let transactions = Arc::new(TransactionManager::new(
            self.store.clone(),
            connections,
            self.classifier.clone(),
            self.stats.clone(),
        ));
        let approvals = ApprovalService::new(
            self.store.clone(),
            self.classifier.clone(),
            self.notifier,
            self.stats,
            transactions.clone(),
        );
        QueryService {
            results: ResultStore::new(self.store.clone()),
            store: self.store,
            classifier: self.classifier,
            executor,
            transactions,
            approvals,
        }
    }
}

/// 查询引擎服务
pub struct QueryService {
    store: Arc<dyn MetadataStore>,
    classifier: Arc<dyn StatementClassifier>,
    executor: QueryExecutor,
    results: ResultStore,
    transactions: Arc<TransactionManager>,
    approvals: ApprovalService,
}

impl QueryService {
    /// Starts a builder with the lexical classifier, logging-only hooks and
    /// a 24 hour result lifetime.
    pub fn builder(
        store: Arc<dyn MetadataStore>,
        connector: Arc<dyn Connector>,
        cipher: CredentialCipher,
    ) -> QueryServiceBuilder {
        QueryServiceBuilder {
            store,
            connector,
            cipher,
            classifier: Arc::new(LexicalClassifier),
            notifier: Arc::new(LogNotifier),
            stats: Arc::new(NoopStatsHook),
            result_ttl: chrono::Duration::hours(24),
        }
    }

    pub fn transactions(&self) -> &Arc<TransactionManager> {
        &self.transactions
    }

    /// 判断语句类型
    pub fn classify(&self, sql: &str) -> OperationKind {
        self.classifier.classify(sql)
    }

    /// 执行只读查询
    pub async fn execute_read(&self, user_id: &str, data_source_id: &str, sql: &str) -> AppResult<QueryResult> {
        let source = self.active_source(data_source_id).await?;
        let query = Query::new(
            IdGenerator::query_id(),
            user_id,
            data_source_id,
            sql,
            self.classifier.classify(sql),
        );
        self.executor.execute(query, &source).await
    }

    /// 提交语句：读语句直接执行，写语句进入审批
    pub async fn submit(&self, user_id: &str, data_source_id: &str, sql: &str) -> AppResult<Submission> {
        if self.classifier.classify(sql).is_write() {
            let approval = self
                .approvals
                .create_approval(data_source_id, sql, user_id)
                .await?;
            Ok(Submission::PendingApproval(approval))
        } else {
            let result = self.execute_read(user_id, data_source_id, sql).await?;
            Ok(Submission::Completed(result))
        }
    }

    pub async fn explain(&self, data_source_id: &str, sql: &str, analyze: bool) -> AppResult<ExplainPlan> {
        let source = self.active_source(data_source_id).await?;
        self.executor.explain(sql, &source, analyze).await
    }

    pub async fn dry_run_delete(&self, data_source_id: &str, sql: &str) -> AppResult<DryRunReport> {
        let source = self.active_source(data_source_id).await?;
        self.executor.dry_run_delete(sql, &source).await
    }

    pub async fn get_query(&self, query_id: &str) -> AppResult<Query> {
        self.store.get_query(query_id).await
    }

    pub async fn history(&self, user_id: &str, limit: usize) -> AppResult<Vec<QueryHistoryEntry>> {
        self.store.list_history(user_id, limit).await
    }

    /// 分页查看结果
    pub async fn paginate_result(&self, result_id: &str, req: &PageRequest) -> AppResult<ResultPage> {
        self.results.paginate(result_id, req).await
    }

    /// 导出结果
    pub async fn export_result(&self, result_id: &str, format: ExportFormat) -> AppResult<Vec<u8>> {
        self.results.export(result_id, format).await
    }

    pub async fn create_approval(&self, data_source_id: &str, sql: &str, requester: &str) -> AppResult<ApprovalRequest> {
        self.approvals
            .create_approval(data_source_id, sql, requester)
            .await
    }

    pub async fn get_approval(&self, approval_id: &str) -> AppResult<ApprovalDetail> {
        self.approvals.get(approval_id).await
    }

    pub async fn review(
        &self,
        approval_id: &str,
        reviewer: &str,
        decision: ReviewDecision,
        comment: Option<String>,
    ) -> AppResult<ApprovalDetail> {
        self.approvals
            .review(approval_id, reviewer, decision, comment)
            .await
    }

    pub async fn start_transaction(&self, approval_id: &str, starter: &str) -> AppResult<QueryTransaction> {
        self.approvals.start_transaction(approval_id, starter).await
    }

    pub async fn commit_transaction(&self, transaction_id: &str) -> AppResult<QueryTransaction> {
        self.approvals.commit_transaction(transaction_id).await
    }

    pub async fn rollback_transaction(&self, transaction_id: &str) -> AppResult<QueryTransaction> {
        self.approvals.rollback_transaction(transaction_id).await
    }

    pub async fn get_transaction(&self, transaction_id: &str) -> AppResult<QueryTransaction> {
        self.transactions.get(transaction_id).await
    }

    async fn active_source(&self, data_source_id: &str) -> AppResult<DataSource> {
        let source = self.store.get_data_source(data_source_id).await?;
        if !source.is_active {
            return Err(AppError::Validation(format!(
                "data source {} is inactive",
                data_source_id
            )));
        }
        Ok(source)
    }
}
