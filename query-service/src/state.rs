//! Application state for query service.

use std::sync::Arc;

use common::config::AppConfig;

use crate::service::QueryService;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub service: Arc<QueryService>,
}

impl AppState {
    /// Creates a new application state.
    pub fn new(config: AppConfig, service: Arc<QueryService>) -> Self {
        Self { config, service }
    }
}
