//! Shared building blocks for the query approval services.
//!
//! - `config`: environment-driven service configuration
//! - `errors`: the error taxonomy returned by every operation
//! - `models`: data sources, queries, results, approvals, transactions
//! - `response`: API envelope and pagination
//! - `middleware`: request id and caller identity
//! - `utils`: id generation, SQL classification, credential cipher

pub mod config;
pub mod errors;
pub mod middleware;
pub mod models;
pub mod response;
pub mod utils;
