//! Shared application state for request handlers.

use std::sync::Arc;

use crate::config::ServerConfig;

/// Read-only state shared by every connection.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(config: Arc<ServerConfig>) -> Self {
        Self { config }
    }
}
