//! ABOUTME: Central configuration management for the Flouds vector gateway
//! ABOUTME: Handles TOML parsing, validation, and environment variable overrides

use flouds_core::error::{GatewayError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

pub mod env;
pub mod validation;

pub use env::{env_overrides, list_overrides, EnvOverride, EnvOverrideInfo};

/// Configuration file discovery order
const CONFIG_SEARCH_PATHS: &[&str] = &[
    "flouds.toml",
    ".flouds.toml",
    "config/flouds.toml",
];

/// Central gateway configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// HTTP listener settings
    pub server: ServerConfig,
    /// Remote vector database endpoint and admin credentials
    pub database: DatabaseConfig,
    /// Embedded relational store and secrets locations
    pub storage: StorageConfig,
    /// Log level and optional file path
    pub logging: LoggingConfig,
    /// Security toggles and global policy defaults
    pub security: SecurityConfig,
    /// Vector schema and ingestion defaults
    pub vector: VectorConfig,
    /// Two-tier rate limiting quotas
    pub rate_limit: RateLimitConfig,
    /// Backend connection pool sizing
    pub pool: PoolConfig,
    /// Request deadlines
    pub timeouts: TimeoutConfig,
}

/// HTTP listener settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 19680,
        }
    }
}

/// Remote vector database endpoint and admin credentials
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Host or URI of the vector engine
    pub endpoint: String,
    pub port: u16,
    /// Admin principal used by bootstrap and provisioning
    pub user: String,
    /// Admin password; prefer `password_file` outside development
    pub password: Option<String>,
    /// File containing the admin password, read at startup
    pub password_file: Option<String>,
    /// Default database admin clients bind to
    pub db_name: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            endpoint: "localhost".to_string(),
            port: 19530,
            user: "root".to_string(),
            password: None,
            password_file: None,
            db_name: "default".to_string(),
        }
    }
}

impl DatabaseConfig {
    /// Full URI of the engine endpoint
    #[must_use]
    pub fn uri(&self) -> String {
        if self.endpoint.contains("://") {
            self.endpoint.clone()
        } else {
            format!("http://{}:{}", self.endpoint, self.port)
        }
    }

    /// Resolve the admin password from the inline value or the password file
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Configuration` when neither source yields a value.
    pub fn resolve_password(&self) -> Result<String> {
        if let Some(password) = &self.password {
            return Ok(password.clone());
        }
        if let Some(path) = &self.password_file {
            let raw = std::fs::read_to_string(path).map_err(|e| {
                GatewayError::configuration(format!("cannot read database password file: {e}"))
            })?;
            return Ok(raw.trim().to_string());
        }
        Err(GatewayError::configuration(
            "no database password configured (set database.password or database.password_file)",
        ))
    }
}

/// Embedded relational store and secrets locations
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite file holding client and config tables
    pub clients_db_path: String,
    /// Directory holding the master encryption key
    pub secrets_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            clients_db_path: "data/flouds.db".to_string(),
            secrets_dir: "data/secrets".to_string(),
        }
    }
}

/// Log level and optional file path
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            path: None,
        }
    }
}

/// Security toggles and global policy defaults
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Master switch for auth + rate limiting middleware
    pub enabled: bool,
    /// Global CORS origin patterns (tenant entries in the config store win)
    pub cors_origins: Vec<String>,
    /// Global trusted host patterns
    pub trusted_hosts: Vec<String>,
    /// Request body cap enforced by the validation middleware
    pub max_request_bytes: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cors_origins: vec!["*".to_string()],
            trusted_hosts: vec!["*".to_string()],
            max_request_bytes: 16 * 1024 * 1024,
        }
    }
}

/// Vector schema and ingestion defaults
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct VectorConfig {
    pub default_dimension: usize,
    /// COSINE, L2 or IP
    pub default_metric: String,
    /// IVF_FLAT, IVF_SQ8, HNSW, FLAT or AUTOINDEX
    pub default_index: String,
    pub nlist: u32,
    /// VARCHAR capacity of chunk/meta columns
    pub metadata_length: u32,
    /// BM25 drop ratio for the sparse index build
    pub drop_ratio_build: f32,
    /// Batches at or above this size flush automatically
    pub auto_flush_min_batch: usize,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            default_dimension: 384,
            default_metric: "COSINE".to_string(),
            default_index: "IVF_FLAT".to_string(),
            nlist: 256,
            metadata_length: 4096,
            drop_ratio_build: 0.2,
            auto_flush_min_batch: 100,
        }
    }
}

/// Two-tier rate limiting quotas
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub ip_limit: u32,
    pub ip_period_secs: u64,
    pub tenant_default_limit: u32,
    pub tenant_premium_limit: u32,
    pub tenant_period_secs: u64,
    /// Tenant buckets idle longer than this are evicted by the sweeper
    pub max_inactive_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            ip_limit: 100,
            ip_period_secs: 60,
            tenant_default_limit: 200,
            tenant_premium_limit: 1000,
            tenant_period_secs: 60,
            max_inactive_secs: 3600,
        }
    }
}

/// Backend connection pool sizing
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    pub max_entries: usize,
    pub max_idle_secs: u64,
    pub sweep_interval_secs: u64,
    /// Entries below this count are never idle-evicted
    pub min_entries: usize,
    /// Close() waits this long for in-flight operations before force-closing
    pub shutdown_grace_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_entries: 64,
            max_idle_secs: 300,
            sweep_interval_secs: 60,
            min_entries: 0,
            shutdown_grace_secs: 10,
        }
    }
}

/// Request deadlines
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Default data-plane deadline
    pub request_secs: u64,
    /// Provisioning and other admin operations
    pub admin_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 30,
            admin_secs: 120,
        }
    }
}

impl GatewayConfig {
    /// Load configuration from a TOML file with env overrides and validation
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Configuration` when the file is unreadable,
    /// the TOML is malformed, or validation fails.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::configuration(format!(
                "failed to read config file {}: {e}",
                path.display()
            ))
        })?;
        Self::from_toml(&content)
    }

    /// Discover a config file in the standard search paths, falling back to
    /// defaults (plus env overrides) when none exists
    ///
    /// # Errors
    ///
    /// Propagates parse and validation failures from a discovered file.
    pub fn discover() -> Result<Self> {
        for candidate in CONFIG_SEARCH_PATHS {
            let path = Path::new(candidate);
            if path.is_file() {
                debug!("Loading configuration from {}", path.display());
                return Self::load_from_file(path);
            }
        }
        debug!("No configuration file found, using defaults");
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse TOML content with environment variable overrides and validation
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Configuration` on malformed TOML or invalid values.
    pub fn from_toml(content: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(content)
            .map_err(|e| GatewayError::configuration(format!("invalid TOML: {e}")))?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `FLOUDS_*` environment variables over the parsed values
    ///
    /// Applied overrides are logged with their registry description;
    /// sensitive values are masked.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Configuration` when a set variable fails its
    /// validator.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        for def in env_overrides() {
            if let Ok(raw) = std::env::var(def.name) {
                (def.apply)(self, &raw).map_err(|message| {
                    GatewayError::configuration(format!("{}: {message}", def.name))
                })?;
                let shown = if def.sensitive { "***" } else { raw.as_str() };
                debug!(
                    name = def.name,
                    value = shown,
                    description = def.description,
                    "Applied environment override"
                );
            }
        }
        Ok(())
    }

    /// Validate the full configuration tree
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Configuration` describing the first violation.
    pub fn validate(&self) -> Result<()> {
        validation::validate_config(self)
    }
}
