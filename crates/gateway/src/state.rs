use std::sync::Arc;

use loom_domain::config::Config;
use loom_modules::ModuleClient;

use crate::runtime::RunLockMap;

/// Shared application state passed to all API handlers.
///
/// Deliberately small: per-run state lives on disk and is opened per
/// request; nothing here caches run data across requests.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Shared HTTP client for module services.
    pub modules: ModuleClient,
    /// Per-run request serialization.
    pub run_locks: Arc<RunLockMap>,
}

impl AppState {
    pub fn new(config: Arc<Config>, modules: ModuleClient) -> Self {
        Self {
            config,
            modules,
            run_locks: Arc::new(RunLockMap::new()),
        }
    }
}
