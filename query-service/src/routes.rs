//! 路由模块

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/query", post(handlers::submit_query))
        .route("/api/query/classify", post(handlers::classify))
        .route("/api/query/explain", post(handlers::explain))
        .route("/api/query/dry-run", post(handlers::dry_run_delete))
        .route("/api/query/history", get(handlers::history))
        .route("/api/query/{id}", get(handlers::get_query))
        .route("/api/results/{id}", get(handlers::get_result_page))
        .route("/api/results/{id}/export", get(handlers::export_result))
        .route("/api/approvals", post(handlers::create_approval))
        .route("/api/approvals/{id}", get(handlers::get_approval))
        .route("/api/approvals/{id}/reviews", post(handlers::review))
        .route("/api/approvals/{id}/transaction", post(handlers::start_transaction))
        .route("/api/transactions/{id}", get(handlers::get_transaction))
        .route("/api/transactions/{id}/commit", post(handlers::commit_transaction))
        .route("/api/transactions/{id}/rollback", post(handlers::rollback_transaction))
        .route("/api/health", get(handlers::health_check))
}
