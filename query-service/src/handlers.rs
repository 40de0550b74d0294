//! Handler模块

use axum::{
    extract::{Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use common::errors::AppError;
use common::middleware::CurrentUser;
use common::models::{
    ApprovalDetail, ApprovalRequest, ExplainRequest, ExportFormat, OperationKind,
    QueryHistoryEntry, QueryRequest, QueryTransaction, ReviewRequest,
};
use common::response::ApiResponse;

use crate::executor::{DryRunReport, ExplainPlan};
use crate::result_store::{PageRequest, ResultPage};
use crate::service::Submission;
use crate::state::AppState;

const SERVICE: &str = "query-service";

type ApiResult<T> = Result<Json<ApiResponse<T>>, AppError>;

fn ok<T: Serialize>(data: T) -> ApiResult<T> {
    Ok(Json(ApiResponse::ok_with_service(data, SERVICE)))
}

fn validate<T: Validate>(req: &T) -> Result<(), AppError> {
    req.validate()
        .map_err(|e| AppError::Validation(e.to_string()))
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ClassifyRequest {
    #[validate(length(min = 1, message = "SQL statement is required"))]
    pub sql: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ClassifyResponse {
    pub operation: OperationKind,
    pub is_write: bool,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ExportParams {
    /// `csv` 或 `json`
    pub format: ExportFormat,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct HistoryParams {
    /// 最多返回条数，默认 50
    pub limit: Option<usize>,
}

/// 判断 SQL 语句类型
#[utoipa::path(
    post,
    path = "/api/query/classify",
    tag = "query",
    request_body = ClassifyRequest,
    responses(
        (status = 200, description = "分类结果", body = ApiResponse<ClassifyResponse>)
    )
)]
pub async fn classify(
    State(state): State<AppState>,
    Json(req): Json<ClassifyRequest>,
) -> ApiResult<ClassifyResponse> {
    validate(&req)?;
    let operation = state.service.classify(&req.sql);
    ok(ClassifyResponse {
        operation,
        is_write: operation.is_write(),
    })
}

/// 提交 SQL：读语句直接执行，写语句创建审批
#[utoipa::path(
    post,
    path = "/api/query",
    tag = "query",
    request_body = QueryRequest,
    responses(
        (status = 200, description = "查询完成或已进入审批", body = ApiResponse<Submission>),
        (status = 400, description = "SQL 无效、表不存在或执行失败"),
        (status = 404, description = "数据源未找到"),
        (status = 502, description = "无法连接目标数据库")
    )
)]
pub async fn submit_query(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<QueryRequest>,
) -> ApiResult<Submission> {
    validate(&req)?;
    let submission = state
        .service
        .submit(user.id(), &req.data_source_id, &req.sql)
        .await?;
    ok(submission)
}

/// 查看执行计划
#[utoipa::path(
    post,
    path = "/api/query/explain",
    tag = "query",
    request_body = ExplainRequest,
    responses(
        (status = 200, description = "执行计划", body = ApiResponse<ExplainPlan>)
    )
)]
pub async fn explain(
    State(state): State<AppState>,
    Json(req): Json<ExplainRequest>,
) -> ApiResult<ExplainPlan> {
    validate(&req)?;
    let plan = state
        .service
        .explain(&req.data_source_id, &req.sql, req.analyze)
        .await?;
    ok(plan)
}

/// 预演 DELETE，返回影响行数与样本行（事务回滚，不落库）
#[utoipa::path(
    post,
    path = "/api/query/dry-run",
    tag = "query",
    request_body = QueryRequest,
    responses(
        (status = 200, description = "预演结果", body = ApiResponse<DryRunReport>)
    )
)]
pub async fn dry_run_delete(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> ApiResult<DryRunReport> {
    validate(&req)?;
    let report = state
        .service
        .dry_run_delete(&req.data_source_id, &req.sql)
        .await?;
    ok(report)
}

/// 查询记录详情
#[utoipa::path(
    get,
    path = "/api/query/{id}",
    tag = "query",
    params(("id" = String, Path, description = "查询 ID")),
    responses(
        (status = 200, description = "查询记录", body = ApiResponse<common::models::Query>),
        (status = 404, description = "查询未找到")
    )
)]
pub async fn get_query(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<common::models::Query> {
    ok(state.service.get_query(&id).await?)
}

/// 当前用户的查询历史
#[utoipa::path(
    get,
    path = "/api/query/history",
    tag = "query",
    params(HistoryParams),
    responses(
        (status = 200, description = "查询历史", body = ApiResponse<Vec<QueryHistoryEntry>>)
    )
)]
pub async fn history(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(params): Query<HistoryParams>,
) -> ApiResult<Vec<QueryHistoryEntry>> {
    let limit = params.limit.unwrap_or(50).clamp(1, 500);
    ok(state.service.history(user.id(), limit).await?)
}

/// 分页查看查询结果
#[utoipa::path(
    get,
    path = "/api/results/{id}",
    tag = "results",
    params(("id" = String, Path, description = "结果 ID"), PageRequest),
    responses(
        (status = 200, description = "结果分页", body = ApiResponse<ResultPage>),
        (status = 404, description = "结果不存在或已过期")
    )
)]
pub async fn get_result_page(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(page): Query<PageRequest>,
) -> ApiResult<ResultPage> {
    ok(state.service.paginate_result(&id, &page).await?)
}

/// 导出查询结果
#[utoipa::path(
    get,
    path = "/api/results/{id}/export",
    tag = "results",
    params(("id" = String, Path, description = "结果 ID"), ExportParams),
    responses(
        (status = 200, description = "导出文件"),
        (status = 404, description = "结果不存在或已过期")
    )
)]
pub async fn export_result(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<ExportParams>,
) -> Result<Response, AppError> {
    let body = state.service.export_result(&id, params.format).await?;
    let disposition = format!(
        "attachment; filename=\"result-{}.{}\"",
        id,
        params.format.extension()
    );
    Ok((
        [
            (header::CONTENT_TYPE, params.format.content_type().to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}

/// 为写语句创建审批
#[utoipa::path(
    post,
    path = "/api/approvals",
    tag = "approvals",
    request_body = QueryRequest,
    responses(
        (status = 200, description = "审批已创建", body = ApiResponse<ApprovalRequest>)
    )
)]
pub async fn create_approval(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(req): Json<QueryRequest>,
) -> ApiResult<ApprovalRequest> {
    validate(&req)?;
    let approval = state
        .service
        .create_approval(&req.data_source_id, &req.sql, user.id())
        .await?;
    ok(approval)
}

/// 审批详情
#[utoipa::path(
    get,
    path = "/api/approvals/{id}",
    tag = "approvals",
    params(("id" = String, Path, description = "审批 ID")),
    responses(
        (status = 200, description = "审批详情", body = ApiResponse<ApprovalDetail>),
        (status = 404, description = "审批未找到")
    )
)]
pub async fn get_approval(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<ApprovalDetail> {
    ok(state.service.get_approval(&id).await?)
}

/// 提交审批意见
#[utoipa::path(
    post,
    path = "/api/approvals/{id}/reviews",
    tag = "approvals",
    params(("id" = String, Path, description = "审批 ID")),
    request_body = ReviewRequest,
    responses(
        (status = 200, description = "审批意见已记录", body = ApiResponse<ApprovalDetail>),
        (status = 409, description = "重复审批或审批已结束")
    )
)]
pub async fn review(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    Json(req): Json<ReviewRequest>,
) -> ApiResult<ApprovalDetail> {
    validate(&req)?;
    let detail = state
        .service
        .review(&id, user.id(), req.decision, req.comment)
        .await?;
    ok(detail)
}

/// 开启预览事务（同一数据源已有活动事务时直接返回该事务）
#[utoipa::path(
    post,
    path = "/api/approvals/{id}/transaction",
    tag = "transactions",
    params(("id" = String, Path, description = "审批 ID")),
    responses(
        (status = 200, description = "活动事务及预览", body = ApiResponse<QueryTransaction>),
        (status = 409, description = "审批已结束")
    )
)]
pub async fn start_transaction(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<QueryTransaction> {
    ok(state.service.start_transaction(&id, user.id()).await?)
}

/// 事务详情
#[utoipa::path(
    get,
    path = "/api/transactions/{id}",
    tag = "transactions",
    params(("id" = String, Path, description = "事务 ID")),
    responses(
        (status = 200, description = "事务详情", body = ApiResponse<QueryTransaction>),
        (status = 404, description = "事务未找到")
    )
)]
pub async fn get_transaction(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<QueryTransaction> {
    ok(state.service.get_transaction(&id).await?)
}

/// 提交事务，审批变为通过
#[utoipa::path(
    post,
    path = "/api/transactions/{id}/commit",
    tag = "transactions",
    params(("id" = String, Path, description = "事务 ID")),
    responses(
        (status = 200, description = "事务已提交", body = ApiResponse<QueryTransaction>),
        (status = 409, description = "事务不在活动状态")
    )
)]
pub async fn commit_transaction(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<QueryTransaction> {
    ok(state.service.commit_transaction(&id).await?)
}

/// 回滚事务，审批变为驳回
#[utoipa::path(
    post,
    path = "/api/transactions/{id}/rollback",
    tag = "transactions",
    params(("id" = String, Path, description = "事务 ID")),
    responses(
        (status = 200, description = "事务已回滚", body = ApiResponse<QueryTransaction>),
        (status = 409, description = "事务不在活动状态")
    )
)]
pub async fn rollback_transaction(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<QueryTransaction> {
    ok(state.service.rollback_transaction(&id).await?)
}

/// 健康检查端点
#[utoipa::path(
    get,
    path = "/api/health",
    tag = "health",
    responses(
        (status = 200, description = "服务运行正常", body = HealthResponse)
    )
)]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: state.config.service_name.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        active_transactions: state.service.transactions().active_count().await,
        timestamp: Utc::now(),
    })
}

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub active_transactions: usize,
    pub timestamp: DateTime<Utc>,
}
