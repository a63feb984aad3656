//! Client identity records and credential validation
//!
//! A client is a principal with a hashed secret, a stable fingerprint, an
//! optional tenant binding, and an action list. Records persist in the
//! embedded relational store; verification is hash-only (SHA-256 over
//! secret + per-client salt). The AES-GCM copy of the secret exists for
//! operator re-issuance and is never used for validation.

use crate::master_key::MasterKey;
use chrono::{DateTime, Utc};
use flouds_core::error::{GatewayError, Result};
use flouds_core::types::tenant::TenantCode;
use rand::RngCore;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

/// Public view of a client record; carries no secret material
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientRecord {
    pub username: String,
    pub fingerprint: String,
    /// Empty string means a global (admin-capable) principal
    pub tenant_code: String,
    pub allowed_actions: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl ClientRecord {
    /// Whether the client may perform `action`
    ///
    /// The `admin` action implies everything.
    #[must_use]
    pub fn allows(&self, action: &str) -> bool {
        self.allowed_actions
            .iter()
            .any(|a| a == action || a == "admin")
    }

    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.allows("admin")
    }
}

/// Fingerprint listing entry for audit surfaces
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FingerprintEntry {
    pub username: String,
    pub fingerprint: String,
    pub tenant_code: String,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

/// Client store over the embedded relational database
pub struct KeyManager {
    conn: Mutex<Connection>,
    master_key: MasterKey,
}

impl std::fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyManager").finish_non_exhaustive()
    }
}

fn db_err(e: &rusqlite::Error) -> GatewayError {
    GatewayError::internal(format!("client store failure: {e}"))
}

fn hash_secret(secret: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(salt.as_bytes());
    hex::encode(hasher.finalize())
}

fn fingerprint_of(username: &str, hashed_secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(username.as_bytes());
    hasher.update(b":");
    hasher.update(hashed_secret.as_bytes());
    hex::encode(hasher.finalize())[..16].to_string()
}

impl KeyManager {
    /// Open (creating on first use) the clients table at `path`
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Internal` when the store cannot be opened.
    pub fn open(path: &Path, master_key: MasterKey) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| GatewayError::internal(format!("cannot create data dir: {e}")))?;
        }
        let conn = Connection::open(path).map_err(|e| db_err(&e))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS clients (
                 username       TEXT PRIMARY KEY,
                 salt           TEXT NOT NULL,
                 hashed_secret  TEXT NOT NULL,
                 encrypted_secret TEXT,
                 fingerprint    TEXT NOT NULL,
                 tenant_code    TEXT NOT NULL DEFAULT '',
                 actions        TEXT NOT NULL DEFAULT '',
                 created_at     TEXT NOT NULL,
                 last_used_at   TEXT
             );",
        )
        .map_err(|e| db_err(&e))?;
        debug!("Client store ready at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
            master_key,
        })
    }

    /// In-memory store for tests
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Internal` when SQLite refuses the connection.
    pub fn open_in_memory(master_key: MasterKey) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| db_err(&e))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS clients (
                 username       TEXT PRIMARY KEY,
                 salt           TEXT NOT NULL,
                 hashed_secret  TEXT NOT NULL,
                 encrypted_secret TEXT,
                 fingerprint    TEXT NOT NULL,
                 tenant_code    TEXT NOT NULL DEFAULT '',
                 actions        TEXT NOT NULL DEFAULT '',
                 created_at     TEXT NOT NULL,
                 last_used_at   TEXT
             );",
        )
        .map_err(|e| db_err(&e))?;
        Ok(Self {
            conn: Mutex::new(conn),
            master_key,
        })
    }

    /// Number of stored clients; bootstrap seeds an admin when zero
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Internal` on store failure.
    pub fn client_count(&self) -> Result<usize> {
        let conn = self.conn.lock().expect("client store lock poisoned");
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM clients", [], |row| row.get(0))
            .map_err(|e| db_err(&e))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Create a client bound to `tenant` with the given actions
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Operation` when the username is taken and
    /// `GatewayError::Validation` for an empty username or secret.
    pub fn create_client(
        &self,
        username: &str,
        secret: &str,
        tenant: &TenantCode,
        actions: &[&str],
    ) -> Result<ClientRecord> {
        if username.is_empty() {
            return Err(GatewayError::validation("username must not be empty"));
        }
        if secret.len() < 8 {
            return Err(GatewayError::validation(
                "client secret must be at least 8 characters",
            ));
        }

        let mut salt_bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut salt_bytes);
        let salt = hex::encode(salt_bytes);
        let hashed = hash_secret(secret, &salt);
        let fingerprint = fingerprint_of(username, &hashed);
        let encrypted = self.master_key.encrypt(secret)?;
        let created_at = Utc::now();
        let actions_joined = actions.join(",");

        let conn = self.conn.lock().expect("client store lock poisoned");
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO clients
                   (username, salt, hashed_secret, encrypted_secret, fingerprint,
                    tenant_code, actions, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    username,
                    salt,
                    hashed,
                    encrypted,
                    fingerprint,
                    tenant.as_str(),
                    actions_joined,
                    created_at.to_rfc3339(),
                ],
            )
            .map_err(|e| db_err(&e))?;
        if inserted == 0 {
            return Err(GatewayError::operation(format!(
                "client {username} already exists"
            )));
        }
        info!(username, tenant = %tenant, "Created client");
        Ok(ClientRecord {
            username: username.to_string(),
            fingerprint,
            tenant_code: tenant.as_str().to_string(),
            allowed_actions: actions.iter().map(|s| (*s).to_string()).collect(),
            created_at,
            last_used_at: None,
        })
    }

    /// Validate presented credentials and the tenant binding
    ///
    /// Unknown usernames and wrong secrets produce the same
    /// `Authentication` error so probing cannot distinguish them. A bound
    /// tenant must equal `expected_tenant`; globally-bound clients pass any
    /// tenant check.
    ///
    /// # Errors
    ///
    /// `GatewayError::Authentication` for bad credentials,
    /// `GatewayError::Tenant` for a binding mismatch.
    pub fn validate(
        &self,
        username: &str,
        presented_secret: &str,
        expected_tenant: Option<&TenantCode>,
    ) -> Result<ClientRecord> {
        let row = {
            let conn = self.conn.lock().expect("client store lock poisoned");
            conn.query_row(
                "SELECT salt, hashed_secret, fingerprint, tenant_code, actions,
                        created_at, last_used_at
                   FROM clients WHERE username = ?1",
                params![username],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, Option<String>>(6)?,
                    ))
                },
            )
            .optional()
            .map_err(|e| db_err(&e))?
        };

        let Some((salt, hashed, fingerprint, tenant_code, actions, created_at, last_used_at)) = row
        else {
            return Err(GatewayError::authentication("invalid credentials"));
        };

        if hash_secret(presented_secret, &salt) != hashed {
            return Err(GatewayError::authentication("invalid credentials"));
        }

        if let Some(expected) = expected_tenant {
            if !tenant_code.is_empty() && tenant_code != expected.as_str() {
                return Err(GatewayError::tenant(format!(
                    "client {username} is not bound to the requested tenant"
                )));
            }
        }

        self.touch(username)?;

        Ok(ClientRecord {
            username: username.to_string(),
            fingerprint,
            tenant_code,
            allowed_actions: actions
                .split(',')
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
            created_at: created_at
                .parse()
                .unwrap_or_else(|_| Utc::now()),
            last_used_at: last_used_at.and_then(|t| t.parse().ok()),
        })
    }

    fn touch(&self, username: &str) -> Result<()> {
        let conn = self.conn.lock().expect("client store lock poisoned");
        conn.execute(
            "UPDATE clients SET last_used_at = ?1 WHERE username = ?2",
            params![Utc::now().to_rfc3339(), username],
        )
        .map_err(|e| db_err(&e))?;
        Ok(())
    }

    /// All fingerprints, for the admin audit surface
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Internal` on store failure.
    pub fn list_fingerprints(&self) -> Result<Vec<FingerprintEntry>> {
        let conn = self.conn.lock().expect("client store lock poisoned");
        let mut stmt = conn
            .prepare(
                "SELECT username, fingerprint, tenant_code, created_at, last_used_at
                   FROM clients ORDER BY username",
            )
            .map_err(|e| db_err(&e))?;
        let entries = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                ))
            })
            .map_err(|e| db_err(&e))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| db_err(&e))?;

        Ok(entries
            .into_iter()
            .map(
                |(username, fingerprint, tenant_code, created_at, last_used_at)| FingerprintEntry {
                    username,
                    fingerprint,
                    tenant_code,
                    created_at: created_at.parse().unwrap_or_else(|_| Utc::now()),
                    last_used_at: last_used_at.and_then(|t| t.parse().ok()),
                },
            )
            .collect())
    }
}
