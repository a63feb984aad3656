//! Startup wiring and the background maintenance task
//!
//! Construction order is fixed: master key → key manager → config store →
//! connection pool; later layers only hold immutable handles. An admin
//! client is seeded on first boot (empty client store) with its credential
//! written into the secrets directory, never logged.

use crate::limits::RateLimiter;
use crate::routes;
use crate::state::AppState;
use axum::Router;
use flouds_config::{list_overrides, GatewayConfig};
use flouds_core::error::{GatewayError, Result};
use flouds_core::traits::backend::BackendConnector;
use flouds_core::types::tenant::TenantCode;
use flouds_security::{AuditEvent, AuditLogger, KeyManager, MasterKey};
use flouds_storage::{ConfigStore, ConnectionPool};
use flouds_vector::provision::generate_password;
use flouds_vector::{Provisioner, SchemaManager, VectorStoreEngine};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Name of the bootstrap admin principal
pub const BOOTSTRAP_ADMIN: &str = "admin";
const ADMIN_SECRET_FILE: &str = "admin.secret";
const ADMIN_SECRET_ENV: &str = "FLOUDS_ADMIN_SECRET";

/// A fully-wired gateway ready to serve
pub struct Gateway {
    pub state: AppState,
    pub router: Router,
}

/// Build the application state and router from validated configuration
///
/// The backend connector is injected so tests can run against the mock
/// cluster while the binary wires up the Milvus HTTP connector.
///
/// # Errors
///
/// Returns `GatewayError::Configuration` for invalid settings and storage
/// or encryption errors from the persistence layer.
pub async fn build_gateway(
    config: GatewayConfig,
    connector: Arc<dyn BackendConnector>,
) -> Result<Gateway> {
    config.validate()?;
    let config = Arc::new(config);

    let secrets_dir = Path::new(&config.storage.secrets_dir).to_path_buf();
    let master_key = MasterKey::load_or_create(&secrets_dir)?;

    let audit = Arc::new(AuditLogger::new());

    let db_path = Path::new(&config.storage.clients_db_path);
    let key_manager = Arc::new(KeyManager::open(db_path, master_key.clone())?);
    seed_admin_client(&key_manager, &audit, &secrets_dir)?;

    // Same embedded store file, separate connection
    let config_store = Arc::new(ConfigStore::open(db_path, master_key)?);

    let pool = Arc::new(ConnectionPool::new(
        connector,
        config.pool.max_entries,
        Duration::from_secs(config.pool.max_idle_secs),
        config.pool.min_entries,
    ));
    let limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));

    let metrics_handle = PrometheusBuilder::new().install_recorder().map_or_else(
        |_| {
            // A recorder is already installed (tests); render through a
            // detached handle instead
            debug!("Prometheus recorder already installed, using detached handle");
            PrometheusBuilder::new().build_recorder().handle()
        },
        |handle| handle,
    );

    let state = AppState {
        engine: Arc::new(VectorStoreEngine::new(config.vector.auto_flush_min_batch)),
        schema_manager: Arc::new(SchemaManager::new()),
        provisioner: Arc::new(Provisioner::new()),
        started_at: Instant::now(),
        config,
        key_manager,
        config_store,
        pool,
        limiter,
        audit,
        metrics_handle,
    };

    let router = routes::router(state.clone());
    info!("Gateway state constructed");
    Ok(Gateway { state, router })
}

/// Seed the bootstrap admin client when the store is empty
///
/// The secret comes from `FLOUDS_ADMIN_SECRET` when set, otherwise it is
/// generated and written to `{secrets_dir}/admin.secret` (owner-read-only).
fn seed_admin_client(
    key_manager: &KeyManager,
    audit: &AuditLogger,
    secrets_dir: &Path,
) -> Result<()> {
    if key_manager.client_count()? > 0 {
        return Ok(());
    }
    let secret = match std::env::var(ADMIN_SECRET_ENV) {
        Ok(from_env) if from_env.len() >= 8 => from_env,
        Ok(_) => {
            return Err(GatewayError::configuration(format!(
                "{ADMIN_SECRET_ENV} must be at least 8 characters"
            )))
        }
        Err(_) => {
            let generated = generate_password();
            let path = secrets_dir.join(ADMIN_SECRET_FILE);
            std::fs::write(&path, &generated).map_err(|e| {
                GatewayError::configuration(format!("cannot write admin credential: {e}"))
            })?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let _ = std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600));
            }
            info!(
                "Seeded bootstrap admin; credential written to {}",
                path.display()
            );
            generated
        }
    };
    let record =
        key_manager.create_client(BOOTSTRAP_ADMIN, &secret, &TenantCode::global(), &["admin"])?;
    let _ = audit.log(AuditEvent::ClientCreated {
        username: record.username,
        fingerprint: record.fingerprint,
        tenant_code: record.tenant_code,
    });
    Ok(())
}

/// Handle to the background maintenance task
pub struct MaintenanceHandle {
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl MaintenanceHandle {
    /// Signal shutdown and wait for the task to drain
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }
}

/// Single cooperative worker: pool idle eviction plus inactive tenant
/// bucket cleanup, every sweep interval
#[must_use]
pub fn spawn_maintenance(state: &AppState) -> MaintenanceHandle {
    let (shutdown, mut shutdown_rx) = watch::channel(false);
    let pool = state.pool.clone();
    let limiter = state.limiter.clone();
    let interval = Duration::from_secs(state.config.pool.sweep_interval_secs);

    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it so startup stays quiet
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let evicted = pool.sweep().await;
                    let cleaned = limiter.cleanup_inactive();
                    if evicted > 0 || cleaned > 0 {
                        debug!(evicted, cleaned, "Maintenance pass completed");
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("Maintenance task stopped");
    });

    MaintenanceHandle { handle, shutdown }
}

/// Log a startup banner once tracing is live
pub fn log_startup(config: &GatewayConfig) {
    info!(
        host = %config.server.host,
        port = config.server.port,
        backend = %config.database.uri(),
        security_enabled = config.security.enabled,
        "Flouds vector gateway starting"
    );
    for (name, description, sensitive) in list_overrides() {
        debug!(var = %name, sensitive, "Recognised environment override: {description}");
    }
    if !config.security.enabled {
        warn!("Security middleware is DISABLED; all requests run as admin");
    }
}
