//! Live preview transactions.
//!
//! A write under review runs inside an engine transaction that stays open
//! until a reviewer commits or rolls it back, or the idle sweep reclaims it.
//! At most one such transaction is active per data source; the registry
//! below is the only place that decides which one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{Mutex, OnceCell, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use common::errors::{AppError, AppResult};
use common::models::{
    ApprovalRequest, ApprovalStatus, QueryTransaction, TransactionPreview, TransactionStatus,
};
use common::utils::{IdGenerator, StatementClassifier};

use crate::approval::settle;
use crate::connector::{ConnectionProvider, EngineTransaction, RowSet};
use crate::hooks::StatsHook;
use crate::store::MetadataStore;

/// Rejection reason recorded when a reviewer rolls a preview back.
pub const ROLLBACK_REASON: &str = "rolled back by approver";

/// Rejection reason recorded when the idle sweep rolls a preview back.
pub const IDLE_ROLLBACK_REASON: &str = "rolled back automatically: transaction idle timeout";

/// Registry entry for one data source.
struct Slot {
    /// Set once by the caller that opens the transaction; joiners wait on it.
    outcome: OnceCell<AppResult<QueryTransaction>>,
    handle: Mutex<Option<Box<dyn EngineTransaction>>>,
    last_activity: std::sync::Mutex<Instant>,
    closing: AtomicBool,
    /// Cancelled once the slot has left the registry.
    released: CancellationToken,
}

impl Slot {
    fn new() -> Self {
        Self {
            outcome: OnceCell::new(),
            handle: Mutex::new(None),
            last_activity: std::sync::Mutex::new(Instant::now()),
            closing: AtomicBool::new(false),
            released: CancellationToken::new(),
        }
    }

    fn transaction(&self) -> Option<&QueryTransaction> {
        match self.outcome.get() {
            Some(Ok(tx)) => Some(tx),
            _ => None,
        }
    }

    fn touch(&self) {
        if let Ok(mut at) = self.last_activity.lock() {
            *at = Instant::now();
        }
    }

    fn idle_for(&self) -> Duration {
        self.last_activity
            .lock()
            .map(|at| at.elapsed())
            .unwrap_or_default()
    }

    fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// Takes the engine handle. Only one caller ever gets it.
    async fn take_handle(&self) -> Option<Box<dyn EngineTransaction>> {
        let handle = self.handle.lock().await.take();
        if handle.is_some() {
            self.closing.store(true, Ordering::Release);
        }
        handle
    }
}

/// Active transactions keyed by data source id.
#[derive(Default)]
struct TransactionRegistry {
    slots: RwLock<HashMap<String, Arc<Slot>>>,
}

impl TransactionRegistry {
    /// Returns the live slot for the data source, creating one if there is
    /// none. A slot that is committing or rolling back stays registered
    /// until its outcome is persisted; claimers wait for its release.
    async fn claim(&self, data_source_id: &str) -> Arc<Slot> {
        loop {
            let finishing = {
                let mut slots = self.slots.write().await;
                match slots.get(data_source_id) {
                    Some(slot) if slot.is_closing() => slot.released.clone(),
                    Some(slot) => return slot.clone(),
                    None => {
                        let slot = Arc::new(Slot::new());
                        slots.insert(data_source_id.to_string(), slot.clone());
                        return slot;
                    }
                }
            };
            finishing.cancelled().await;
        }
    }

    async fn get(&self, data_source_id: &str) -> Option<Arc<Slot>> {
        self.slots.read().await.get(data_source_id).cloned()
    }

    /// Removes the entry only if it is still `slot`, then wakes claimers
    /// waiting on it.
    async fn release(&self, data_source_id: &str, slot: &Arc<Slot>) {
        let mut slots = self.slots.write().await;
        if slots
            .get(data_source_id)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
        {
            slots.remove(data_source_id);
        }
        drop(slots);
        slot.released.cancel();
    }

    /// Ids of open transactions idle for longer than `idle_timeout`.
    async fn stale(&self, idle_timeout: Duration) -> Vec<String> {
        self.slots
            .read()
            .await
            .values()
            .filter(|slot| !slot.is_closing() && slot.idle_for() > idle_timeout)
            .filter_map(|slot| slot.transaction().map(|tx| tx.id.clone()))
            .collect()
    }

    async fn len(&self) -> usize {
        self.slots.read().await.len()
    }
}

#[derive(Clone, Copy)]
enum Finish {
    Commit,
    Rollback { reason: &'static str },
}

/// Opens, commits and rolls back preview transactions.
pub struct TransactionManager {
    store: Arc<dyn MetadataStore>,
    connections: ConnectionProvider,
    classifier: Arc<dyn StatementClassifier>,
    stats: Arc<dyn StatsHook>,
    registry: TransactionRegistry,
}

impl TransactionManager {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        connections: ConnectionProvider,
        classifier: Arc<dyn StatementClassifier>,
        stats: Arc<dyn StatsHook>,
    ) -> Self {
        Self {
            store,
            connections,
            classifier,
            stats,
            registry: TransactionRegistry::default(),
        }
    }

    /// Opens a transaction for the approval's statement and captures its
    /// preview without committing.
    ///
    /// When the data source already has an active transaction, that
    /// transaction is returned unchanged and nothing is executed. Callers
    /// racing on the same data source all receive the same outcome.
    pub async fn start(&self, approval: &ApprovalRequest, starter: &str) -> AppResult<QueryTransaction> {
        let slot = self.registry.claim(&approval.data_source_id).await;
        let outcome = slot
            .outcome
            .get_or_init(|| self.open(approval, starter, &slot))
            .await
            .clone();
        if let Ok(tx) = &outcome {
            slot.touch();
            if tx.approval_id != approval.id {
                tracing::debug!(
                    transaction_id = %tx.id,
                    approval_id = %approval.id,
                    "data source busy with another approval's transaction"
                );
            }
        }
        outcome
    }

    async fn open(&self, approval: &ApprovalRequest, starter: &str, slot: &Arc<Slot>) -> AppResult<QueryTransaction> {
        let mut record = QueryTransaction {
            id: IdGenerator::transaction_id(),
            approval_id: approval.id.clone(),
            data_source_id: approval.data_source_id.clone(),
            sql: approval.sql.clone(),
            started_by: starter.to_string(),
            status: TransactionStatus::Active,
            preview: TransactionPreview::default(),
            error_message: None,
            started_at: Utc::now(),
            completed_at: None,
        };

        let (handle, set) = match self.execute_preview(approval).await {
            Ok(opened) => opened,
            Err(e) => {
                record.status = TransactionStatus::Failed;
                record.error_message = Some(e.to_string());
                record.completed_at = Some(Utc::now());
                if let Err(store_err) = self.store.insert_transaction(&record).await {
                    tracing::warn!(transaction_id = %record.id, error = %store_err, "failed to record failed transaction");
                }
                self.registry.release(&approval.data_source_id, slot).await;
                tracing::warn!(
                    approval_id = %approval.id,
                    data_source_id = %approval.data_source_id,
                    error = %e,
                    "preview transaction failed to start"
                );
                return Err(e);
            }
        };

        record.preview = TransactionPreview {
            columns: set.columns,
            rows: set.rows,
            affected_rows: set.rows_affected,
        };
        *slot.handle.lock().await = Some(handle);

        if let Err(e) = self.store.insert_transaction(&record).await {
            if let Some(mut handle) = slot.take_handle().await {
                if let Err(rb) = handle.rollback().await {
                    tracing::warn!(transaction_id = %record.id, error = %rb, "rollback after store failure failed");
                }
            }
            self.registry.release(&approval.data_source_id, slot).await;
            return Err(e);
        }

        tracing::info!(
            transaction_id = %record.id,
            approval_id = %approval.id,
            data_source_id = %approval.data_source_id,
            affected_rows = record.preview.affected_rows,
            "preview transaction started"
        );
        Ok(record)
    }

    async fn execute_preview(&self, approval: &ApprovalRequest) -> AppResult<(Box<dyn EngineTransaction>, RowSet)> {
        let source = self.store.get_data_source(&approval.data_source_id).await?;
        let tables = self.classifier.referenced_tables(&approval.sql);
        let mut conn = self.connections.open_validated(&source, &tables).await?;
        let mut handle = match conn.begin().await {
            Ok(handle) => handle,
            Err(e) => {
                conn.close().await;
                return Err(e);
            }
        };
        drop(conn);

        match handle.execute(&approval.sql).await {
            Ok(set) => Ok((handle, set)),
            Err(e) => {
                if let Err(rb) = handle.rollback().await {
                    tracing::warn!(approval_id = %approval.id, error = %rb, "rollback after failed preview failed");
                }
                Err(e)
            }
        }
    }

    /// Commits an active transaction and approves its approval request.
    ///
    /// # Errors
    /// `TransactionState` when the id is unknown or not active. An engine
    /// failure marks the transaction `failed` and is returned as is.
    pub async fn commit(self: &Arc<Self>, transaction_id: &str) -> AppResult<QueryTransaction> {
        self.finish(transaction_id, Finish::Commit).await
    }

    /// Rolls back an active transaction and rejects its approval request.
    pub async fn rollback(self: &Arc<Self>, transaction_id: &str) -> AppResult<QueryTransaction> {
        self.finish(
            transaction_id,
            Finish::Rollback {
                reason: ROLLBACK_REASON,
            },
        )
        .await
    }

    /// Runs on its own task so a dropped caller cannot leave the data
    /// source registered as finishing.
    async fn finish(self: &Arc<Self>, transaction_id: &str, action: Finish) -> AppResult<QueryTransaction> {
        let manager = Arc::clone(self);
        let transaction_id = transaction_id.to_string();
        tokio::spawn(async move { manager.finish_inner(&transaction_id, action).await })
            .await
            .map_err(|e| AppError::Internal(format!("transaction finish task failed: {}", e)))?
    }

    async fn finish_inner(&self, transaction_id: &str, action: Finish) -> AppResult<QueryTransaction> {
        let not_active = || AppError::TransactionState(transaction_id.to_string());

        let mut record = match self.store.get_transaction(transaction_id).await {
            Ok(record) => record,
            Err(AppError::NotFound { .. }) => return Err(not_active()),
            Err(e) => return Err(e),
        };
        if record.status != TransactionStatus::Active {
            return Err(not_active());
        }

        let slot = self
            .registry
            .get(&record.data_source_id)
            .await
            .filter(|slot| slot.transaction().is_some_and(|tx| tx.id == transaction_id))
            .ok_or_else(not_active)?;
        let mut handle = slot.take_handle().await.ok_or_else(not_active)?;

        let io = match action {
            Finish::Commit => handle.commit().await,
            Finish::Rollback { .. } => handle.rollback().await,
        };

        record.completed_at = Some(Utc::now());
        record.status = match (&io, action) {
            (Ok(()), Finish::Commit) => TransactionStatus::Committed,
            (Ok(()), Finish::Rollback { .. }) => TransactionStatus::RolledBack,
            (Err(_), _) => TransactionStatus::Failed,
        };
        if let Err(e) = &io {
            record.error_message = Some(e.to_string());
        }
        let persisted = self.store.update_transaction(&record).await;

        // the engine outcome is final, so the approval follows it even when
        // the transaction record could not be updated
        let settled = match (&io, action) {
            (Err(_), _) => Ok(()),
            (Ok(()), Finish::Commit) => {
                settle(
                    self.store.as_ref(),
                    self.stats.as_ref(),
                    &record.approval_id,
                    ApprovalStatus::Approved,
                    None,
                )
                .await
            }
            (Ok(()), Finish::Rollback { reason }) => {
                settle(
                    self.store.as_ref(),
                    self.stats.as_ref(),
                    &record.approval_id,
                    ApprovalStatus::Rejected,
                    Some(reason),
                )
                .await
            }
        };
        self.registry.release(&record.data_source_id, &slot).await;

        if let Err(e) = io {
            tracing::error!(
                transaction_id,
                data_source_id = %record.data_source_id,
                error = %e,
                "preview transaction failed to finish"
            );
            return Err(e);
        }
        if let Err(e) = persisted {
            tracing::error!(transaction_id, error = %e, "transaction outcome not persisted");
            return Err(e);
        }
        settled?;

        tracing::info!(
            transaction_id,
            approval_id = %record.approval_id,
            status = %record.status,
            "preview transaction finished"
        );
        Ok(record)
    }

    /// Rolls back every active transaction idle for longer than `idle_timeout`.
    /// Returns the ids that were rolled back.
    pub async fn sweep(self: &Arc<Self>, idle_timeout: Duration) -> Vec<String> {
        let mut reclaimed = Vec::new();
        for transaction_id in self.registry.stale(idle_timeout).await {
            let outcome = self
                .finish(
                    &transaction_id,
                    Finish::Rollback {
                        reason: IDLE_ROLLBACK_REASON,
                    },
                )
                .await;
            match outcome {
                Ok(_) => {
                    tracing::info!(transaction_id = %transaction_id, "idle transaction rolled back");
                    reclaimed.push(transaction_id);
                }
                Err(AppError::TransactionState(_)) => {
                    tracing::debug!(transaction_id = %transaction_id, "transaction finished before sweep");
                }
                Err(e) => {
                    tracing::warn!(transaction_id = %transaction_id, error = %e, "idle rollback failed");
                }
            }
        }
        reclaimed
    }

    /// Loads a transaction. Reading an active transaction counts as activity.
    pub async fn get(&self, transaction_id: &str) -> AppResult<QueryTransaction> {
        let record = self.store.get_transaction(transaction_id).await?;
        if record.status == TransactionStatus::Active {
            if let Some(slot) = self.registry.get(&record.data_source_id).await {
                if slot.transaction().is_some_and(|tx| tx.id == transaction_id) {
                    slot.touch();
                }
            }
        }
        Ok(record)
    }

    /// The active transaction on a data source, if any.
    pub async fn active_for(&self, data_source_id: &str) -> Option<QueryTransaction> {
        let slot = self.registry.get(data_source_id).await?;
        if slot.is_closing() {
            return None;
        }
        slot.transaction().cloned()
    }

    /// Number of data sources with a registered transaction.
    pub async fn active_count(&self) -> usize {
        self.registry.len().await
    }

    /// Starts the periodic idle sweep. Expired query results are purged on
    /// the same schedule.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration, idle_timeout: Duration) -> SweeperHandle {
        let token = CancellationToken::new();
        let manager = Arc::clone(self);
        let cancelled = token.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = ticker.tick() => {
                        let reclaimed = manager.sweep(idle_timeout).await;
                        if !reclaimed.is_empty() {
                            tracing::info!(count = reclaimed.len(), "idle sweep finished");
                        }
                        match manager.store.purge_expired_results(Utc::now()).await {
                            Ok(0) => {}
                            Ok(n) => tracing::info!(count = n, "expired results purged"),
                            Err(e) => tracing::warn!(error = %e, "result purge failed"),
                        }
                    }
                }
            }
            tracing::info!("transaction sweeper stopped");
        });
        SweeperHandle { token, task }
    }
}

/// Handle to the background sweep task.
pub struct SweeperHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stops the sweep and waits for the task to exit.
    pub async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "sweeper task ended abnormally");
        }
    }
}
