//! SQL 查询执行服务
//!
//! 提供 SQL 查询执行与写操作审批功能，包括：
//! - 只读查询执行、结果分页与导出
//! - 写语句审批与事务预览
//! - 空闲事务自动回滚

use std::sync::Arc;

use anyhow::Context;
use axum::{middleware, routing::get, Json, Router};
use common::config::AppConfig;
use common::middleware::request_id::request_id_middleware;
use common::utils::CredentialCipher;
use query_service::connector::SqlxConnector;
use query_service::handlers;
use query_service::hooks::{
    LogNotifier, NoopStatsHook, Notifier, RedisStatsHook, StatsHook, WebhookNotifier,
};
use query_service::routes;
use query_service::state::AppState;
use query_service::store::{MemoryStore, MetadataStore, MySqlStore};
use query_service::QueryService;
use sqlx::mysql::MySqlPoolOptions;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;

const SERVICE_NAME: &str = "query-service";

#[derive(OpenApi)]
#[openapi(
    info(
        title = "查询服务 API",
        version = "0.1.0",
        description = "SQL 查询执行与写操作审批微服务"
    ),
    paths(
        handlers::classify,
        handlers::submit_query,
        handlers::explain,
        handlers::dry_run_delete,
        handlers::get_query,
        handlers::history,
        handlers::get_result_page,
        handlers::export_result,
        handlers::create_approval,
        handlers::get_approval,
        handlers::review,
        handlers::start_transaction,
        handlers::get_transaction,
        handlers::commit_transaction,
        handlers::rollback_transaction,
        handlers::health_check,
    ),
    components(schemas(
        common::models::QueryRequest,
        common::models::ExplainRequest,
        common::models::ReviewRequest,
        common::models::QueryResult,
        common::models::ColumnInfo,
        common::models::ApprovalRequest,
        common::models::ApprovalDetail,
        common::models::QueryTransaction,
        handlers::ClassifyRequest,
        handlers::ClassifyResponse,
        handlers::HealthResponse,
    )),
    tags(
        (name = "query", description = "查询执行端点"),
        (name = "results", description = "结果分页与导出端点"),
        (name = "approvals", description = "审批端点"),
        (name = "transactions", description = "预览事务端点"),
        (name = "health", description = "健康检查端点")
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志追踪
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // 加载配置
    let config = AppConfig::load_with_service(SERVICE_NAME);
    let key = config
        .credential_key
        .as_deref()
        .context("CREDENTIAL_KEY 未设置")?;
    let cipher = CredentialCipher::from_base64_key(key)?;

    // 元数据存储
    let store: Arc<dyn MetadataStore> = match &config.database_url {
        Some(url) => {
            let pool = MySqlPoolOptions::new()
                .max_connections(10)
                .acquire_timeout(config.connect_timeout())
                .connect(url)
                .await
                .context("连接元数据库失败")?;
            Arc::new(MySqlStore::new(pool).await?)
        }
        None => {
            warn!("DATABASE_URL 未设置，使用内存存储");
            Arc::new(MemoryStore::new())
        }
    };

    // 通知与统计钩子
    let notifier: Arc<dyn Notifier> = match &config.notify_webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(reqwest::Client::new(), url.clone())),
        None => Arc::new(LogNotifier),
    };
    let stats: Arc<dyn StatsHook> = match &config.redis_url {
        Some(url) => match RedisStatsHook::connect(url, config.stats_cache_keys.clone()).await {
            Ok(hook) => Arc::new(hook),
            Err(e) => {
                warn!(error = %e, "Redis 不可用，统计缓存不会失效");
                Arc::new(NoopStatsHook)
            }
        },
        None => Arc::new(NoopStatsHook),
    };

    let service = Arc::new(
        QueryService::builder(
            store,
            Arc::new(SqlxConnector::new(config.connect_timeout())),
            cipher,
        )
        .notifier(notifier)
        .stats_hook(stats)
        .result_ttl(config.result_ttl())
        .build(),
    );

    // 空闲事务回收
    let sweeper = service
        .transactions()
        .spawn_sweeper(config.tx_sweep_interval(), config.tx_idle_timeout());

    // 创建应用状态与路由
    let state = AppState::new(config.clone(), service);
    let app = create_router(state);

    // 启动服务
    let addr = format!("{}:{}", config.host, config.port);
    info!(service = SERVICE_NAME, address = %addr, "启动服务");

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("绑定地址失败: {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("服务运行失败")?;

    sweeper.stop().await;
    info!(service = SERVICE_NAME, "服务已停止");
    Ok(())
}

fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(routes::router())
        .route("/api-docs/openapi.json", get(openapi_json))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "无法监听退出信号");
        std::future::pending::<()>().await;
    }
    info!("收到退出信号，开始优雅停机");
}
