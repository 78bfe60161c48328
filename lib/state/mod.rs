use crate::query::QueryEngine;
use prometheus_client::registry::Registry;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

pub struct AppState {
    pub query: QueryEngine,
    pub registry: RwLock<Registry>,
    pub shutdown_token: CancellationToken,
    pub page_size: i64,
}

impl AppState {
    pub fn new(
        query: QueryEngine,
        registry: Registry,
        shutdown_token: CancellationToken,
        page_size: i64,
    ) -> Self {
        Self {
            query,
            registry: RwLock::new(registry),
            shutdown_token,
            page_size,
        }
    }
}
