//! Shared application state
//!
//! Built once at bootstrap in dependency order (config store → key manager →
//! connection pool); later layers hold immutable handles, so there are no
//! reference cycles. Handlers clone the state cheaply through `Arc`s.

use crate::limits::RateLimiter;
use flouds_config::GatewayConfig;
use flouds_security::{AuditLogger, KeyManager};
use flouds_storage::{ConfigStore, ConnectionPool};
use flouds_vector::{Provisioner, SchemaManager, VectorStoreEngine};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Instant;

/// Everything a request handler can reach
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub key_manager: Arc<KeyManager>,
    pub config_store: Arc<ConfigStore>,
    pub pool: Arc<ConnectionPool>,
    pub engine: Arc<VectorStoreEngine>,
    pub schema_manager: Arc<SchemaManager>,
    pub provisioner: Arc<Provisioner>,
    pub limiter: Arc<RateLimiter>,
    pub audit: Arc<AuditLogger>,
    pub metrics_handle: PrometheusHandle,
    pub started_at: Instant,
}

impl AppState {
    /// URI of the configured vector engine
    #[must_use]
    pub fn backend_uri(&self) -> String {
        self.config.database.uri()
    }
}
