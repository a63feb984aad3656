//! ABOUTME: Configuration validation logic for the gateway
//! ABOUTME: Validates consistency and security requirements at startup

use crate::GatewayConfig;
use flouds_core::error::{GatewayError, Result};
use flouds_core::types::vector::{DistanceMetric, IndexKind, MAX_DIMENSION, MIN_DIMENSION};
use tracing::{debug, warn};

/// Validate the entire configuration
///
/// # Errors
///
/// Returns `GatewayError::Configuration` describing the first violation.
pub fn validate_config(config: &GatewayConfig) -> Result<()> {
    debug!("Starting configuration validation");

    validate_server(config)?;
    validate_vector(config)?;
    validate_rate_limit(config)?;
    validate_pool(config)?;
    validate_storage(config)?;

    debug!("Configuration validation completed successfully");
    Ok(())
}

fn validate_server(config: &GatewayConfig) -> Result<()> {
    if config.server.host.is_empty() {
        return Err(GatewayError::configuration("server.host cannot be empty"));
    }
    if config.server.port == 0 {
        return Err(GatewayError::configuration("server.port cannot be zero"));
    }
    if config.database.endpoint.is_empty() {
        return Err(GatewayError::configuration(
            "database.endpoint cannot be empty",
        ));
    }
    Ok(())
}

fn validate_vector(config: &GatewayConfig) -> Result<()> {
    let dim = config.vector.default_dimension;
    if !(MIN_DIMENSION..=MAX_DIMENSION).contains(&dim) {
        return Err(GatewayError::configuration(format!(
            "vector.default_dimension must be between {MIN_DIMENSION} and {MAX_DIMENSION}, got {dim}"
        )));
    }
    DistanceMetric::parse(&config.vector.default_metric)
        .map_err(|_| GatewayError::configuration(format!(
            "vector.default_metric '{}' is not one of COSINE, L2, IP",
            config.vector.default_metric
        )))?;
    IndexKind::parse(&config.vector.default_index).map_err(|_| {
        GatewayError::configuration(format!(
            "vector.default_index '{}' is not a supported index type",
            config.vector.default_index
        ))
    })?;
    if config.vector.nlist == 0 {
        return Err(GatewayError::configuration("vector.nlist cannot be zero"));
    }
    if !(0.0..=1.0).contains(&config.vector.drop_ratio_build) {
        return Err(GatewayError::configuration(
            "vector.drop_ratio_build must be within [0.0, 1.0]",
        ));
    }
    if config.vector.auto_flush_min_batch == 0 {
        warn!("vector.auto_flush_min_batch is 0; every insert will flush");
    }
    Ok(())
}

fn validate_rate_limit(config: &GatewayConfig) -> Result<()> {
    let rl = &config.rate_limit;
    if rl.ip_limit == 0 || rl.tenant_default_limit == 0 || rl.tenant_premium_limit == 0 {
        return Err(GatewayError::configuration(
            "rate limits must be greater than zero",
        ));
    }
    if rl.ip_period_secs == 0 || rl.tenant_period_secs == 0 {
        return Err(GatewayError::configuration(
            "rate limit periods must be greater than zero",
        ));
    }
    if rl.tenant_premium_limit < rl.tenant_default_limit {
        warn!(
            "premium tenant limit ({}) is below the default tier ({})",
            rl.tenant_premium_limit, rl.tenant_default_limit
        );
    }
    Ok(())
}

fn validate_pool(config: &GatewayConfig) -> Result<()> {
    let pool = &config.pool;
    if pool.max_entries == 0 {
        return Err(GatewayError::configuration(
            "pool.max_entries cannot be zero",
        ));
    }
    if pool.min_entries > pool.max_entries {
        return Err(GatewayError::configuration(
            "pool.min_entries cannot exceed pool.max_entries",
        ));
    }
    if pool.sweep_interval_secs == 0 {
        return Err(GatewayError::configuration(
            "pool.sweep_interval_secs cannot be zero",
        ));
    }
    Ok(())
}

fn validate_storage(config: &GatewayConfig) -> Result<()> {
    if config.storage.clients_db_path.is_empty() {
        return Err(GatewayError::configuration(
            "storage.clients_db_path cannot be empty",
        ));
    }
    if config.storage.secrets_dir.is_empty() {
        return Err(GatewayError::configuration(
            "storage.secrets_dir cannot be empty",
        ));
    }
    Ok(())
}
