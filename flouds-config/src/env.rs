//! ABOUTME: Environment variable overrides for gateway configuration
//! ABOUTME: Single source of truth for all FLOUDS_* variable handling

use crate::GatewayConfig;

/// Apply function: parses the raw value into its config slot
pub type ApplyFn = fn(&mut GatewayConfig, &str) -> Result<(), String>;

/// Definition of one recognised environment variable
pub struct EnvOverride {
    /// Variable name, always `FLOUDS_` prefixed
    pub name: &'static str,
    /// Human-readable description
    pub description: &'static str,
    /// Whether the value is masked in diagnostics
    pub sensitive: bool,
    /// Parser writing the value into the config tree
    pub apply: ApplyFn,
}

/// (Name, Description, IsSensitive) — listing row for diagnostics surfaces
pub type EnvOverrideInfo = (String, String, bool);

/// List all recognised variables with their masking flag
///
/// Used by startup diagnostics; sensitive entries must have their values
/// masked wherever this listing is rendered.
#[must_use]
pub fn list_overrides() -> Vec<EnvOverrideInfo> {
    env_overrides()
        .iter()
        .map(|def| {
            (
                def.name.to_string(),
                def.description.to_string(),
                def.sensitive,
            )
        })
        .collect()
}

fn parse<T: std::str::FromStr>(raw: &str, what: &str) -> Result<T, String> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| format!("cannot parse '{raw}' as {what}"))
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// All recognised environment variables, in documentation order
#[must_use]
pub fn env_overrides() -> Vec<EnvOverride> {
    vec![
        EnvOverride {
            name: "FLOUDS_SERVER_HOST",
            description: "HTTP listener bind address",
            sensitive: false,
            apply: |c, v| {
                c.server.host = v.trim().to_string();
                Ok(())
            },
        },
        EnvOverride {
            name: "FLOUDS_SERVER_PORT",
            description: "HTTP listener port",
            sensitive: false,
            apply: |c, v| {
                c.server.port = parse(v, "a port number")?;
                Ok(())
            },
        },
        EnvOverride {
            name: "FLOUDS_DB_ENDPOINT",
            description: "Vector database host or URI",
            sensitive: false,
            apply: |c, v| {
                c.database.endpoint = v.trim().to_string();
                Ok(())
            },
        },
        EnvOverride {
            name: "FLOUDS_DB_PORT",
            description: "Vector database port",
            sensitive: false,
            apply: |c, v| {
                c.database.port = parse(v, "a port number")?;
                Ok(())
            },
        },
        EnvOverride {
            name: "FLOUDS_DB_USER",
            description: "Vector database admin user",
            sensitive: false,
            apply: |c, v| {
                c.database.user = v.trim().to_string();
                Ok(())
            },
        },
        EnvOverride {
            name: "FLOUDS_DB_PASSWORD",
            description: "Vector database admin password",
            sensitive: true,
            apply: |c, v| {
                c.database.password = Some(v.to_string());
                Ok(())
            },
        },
        EnvOverride {
            name: "FLOUDS_DB_PASSWORD_FILE",
            description: "File containing the admin password",
            sensitive: false,
            apply: |c, v| {
                c.database.password_file = Some(v.trim().to_string());
                Ok(())
            },
        },
        EnvOverride {
            name: "FLOUDS_DB_NAME",
            description: "Default database admin clients bind to",
            sensitive: false,
            apply: |c, v| {
                c.database.db_name = v.trim().to_string();
                Ok(())
            },
        },
        EnvOverride {
            name: "FLOUDS_CLIENTS_DB_PATH",
            description: "SQLite file for client and config tables",
            sensitive: false,
            apply: |c, v| {
                c.storage.clients_db_path = v.trim().to_string();
                Ok(())
            },
        },
        EnvOverride {
            name: "FLOUDS_SECRETS_DIR",
            description: "Directory holding the master encryption key",
            sensitive: false,
            apply: |c, v| {
                c.storage.secrets_dir = v.trim().to_string();
                Ok(())
            },
        },
        EnvOverride {
            name: "FLOUDS_LOG_LEVEL",
            description: "Log level filter (trace..error)",
            sensitive: false,
            apply: |c, v| {
                c.logging.level = v.trim().to_string();
                Ok(())
            },
        },
        EnvOverride {
            name: "FLOUDS_LOG_PATH",
            description: "Log file path (stdout when unset)",
            sensitive: false,
            apply: |c, v| {
                c.logging.path = Some(v.trim().to_string());
                Ok(())
            },
        },
        EnvOverride {
            name: "FLOUDS_SECURITY_ENABLED",
            description: "Master switch for auth and rate limiting",
            sensitive: false,
            apply: |c, v| {
                c.security.enabled = parse(v, "a boolean")?;
                Ok(())
            },
        },
        EnvOverride {
            name: "FLOUDS_CORS_ORIGINS",
            description: "Comma-separated global CORS origin patterns",
            sensitive: false,
            apply: |c, v| {
                c.security.cors_origins = parse_list(v);
                Ok(())
            },
        },
        EnvOverride {
            name: "FLOUDS_TRUSTED_HOSTS",
            description: "Comma-separated global trusted host patterns",
            sensitive: false,
            apply: |c, v| {
                c.security.trusted_hosts = parse_list(v);
                Ok(())
            },
        },
        EnvOverride {
            name: "FLOUDS_DEFAULT_DIMENSION",
            description: "Default dense vector dimension (1-4096)",
            sensitive: false,
            apply: |c, v| {
                c.vector.default_dimension = parse(v, "a dimension")?;
                Ok(())
            },
        },
        EnvOverride {
            name: "FLOUDS_DEFAULT_METRIC",
            description: "Default distance metric (COSINE, L2, IP)",
            sensitive: false,
            apply: |c, v| {
                c.vector.default_metric = v.trim().to_uppercase();
                Ok(())
            },
        },
        EnvOverride {
            name: "FLOUDS_DEFAULT_INDEX",
            description: "Default dense index type",
            sensitive: false,
            apply: |c, v| {
                c.vector.default_index = v.trim().to_uppercase();
                Ok(())
            },
        },
        EnvOverride {
            name: "FLOUDS_NLIST",
            description: "IVF partition count",
            sensitive: false,
            apply: |c, v| {
                c.vector.nlist = parse(v, "an integer")?;
                Ok(())
            },
        },
        EnvOverride {
            name: "FLOUDS_AUTO_FLUSH_MIN_BATCH",
            description: "Batches at or above this size flush automatically",
            sensitive: false,
            apply: |c, v| {
                c.vector.auto_flush_min_batch = parse(v, "an integer")?;
                Ok(())
            },
        },
        EnvOverride {
            name: "FLOUDS_RATE_LIMIT_IP",
            description: "Per-IP request limit per window",
            sensitive: false,
            apply: |c, v| {
                c.rate_limit.ip_limit = parse(v, "an integer")?;
                Ok(())
            },
        },
        EnvOverride {
            name: "FLOUDS_RATE_LIMIT_TENANT_DEFAULT",
            description: "Default-tier tenant limit per window",
            sensitive: false,
            apply: |c, v| {
                c.rate_limit.tenant_default_limit = parse(v, "an integer")?;
                Ok(())
            },
        },
        EnvOverride {
            name: "FLOUDS_RATE_LIMIT_TENANT_PREMIUM",
            description: "Premium-tier tenant limit per window",
            sensitive: false,
            apply: |c, v| {
                c.rate_limit.tenant_premium_limit = parse(v, "an integer")?;
                Ok(())
            },
        },
        EnvOverride {
            name: "FLOUDS_POOL_MAX_ENTRIES",
            description: "Connection pool hard ceiling",
            sensitive: false,
            apply: |c, v| {
                c.pool.max_entries = parse(v, "an integer")?;
                Ok(())
            },
        },
        EnvOverride {
            name: "FLOUDS_POOL_MAX_IDLE_SECS",
            description: "Idle seconds before a pool entry is evictable",
            sensitive: false,
            apply: |c, v| {
                c.pool.max_idle_secs = parse(v, "seconds")?;
                Ok(())
            },
        },
        EnvOverride {
            name: "FLOUDS_POOL_SWEEP_INTERVAL_SECS",
            description: "Background sweeper interval",
            sensitive: false,
            apply: |c, v| {
                c.pool.sweep_interval_secs = parse(v, "seconds")?;
                Ok(())
            },
        },
    ]
}
