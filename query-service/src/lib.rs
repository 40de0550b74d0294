//! SQL 查询执行与写操作审批预览引擎
//!
//! - 读语句：分类、表存在性预校验、执行并缓存结果，支持分页与导出
//! - 写语句：创建审批，在可保持的事务中预览影响行，由审批人提交或回滚
//! - 空闲事务定时回收

pub mod approval;
pub mod connector;
pub mod executor;
pub mod handlers;
pub mod hooks;
pub mod result_store;
pub mod routes;
pub mod service;
pub mod state;
pub mod store;
pub mod transaction;

pub use service::{QueryService, QueryServiceBuilder, Submission};
