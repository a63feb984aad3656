//! Tenant-scoped configuration store
//!
//! Rows live in `config_kv(key, tenant_code, value, encrypted)` with the
//! composite primary key `(key, tenant_code)`; the empty tenant code is the
//! global scope. Values flagged `encrypted` are AES-GCM ciphertexts under the
//! process master key and are never returned by the public `get` — callers
//! see the `"<encrypted>"` sentinel and internal consumers use
//! `get_decrypted`.
//!
//! Hot policy keys are served from an in-process cache. Correctness rule:
//! every mutation invalidates the exact `(key, tenant)` cache entry before
//! returning, so a read that follows a write always observes the write.
//! Cross-process invalidation is out of scope; multi-process deployments get
//! per-process freshness.

use dashmap::DashMap;
use flouds_core::error::{GatewayError, Result};
use flouds_core::types::tenant::TenantCode;
use flouds_security::MasterKey;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

/// Placeholder returned instead of ciphertext or plaintext for encrypted rows
pub const ENCRYPTED_SENTINEL: &str = "<encrypted>";

/// Keys cached in process memory
const HOT_KEYS: &[&str] = &["cors_origins", "trusted_hosts", "rate_limit_tier"];

/// One configuration row as seen by the API surface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub key: String,
    pub tenant_code: String,
    /// Sentinel when `encrypted` is set
    pub value: String,
    pub encrypted: bool,
}

/// Persisted tenant-scoped K/V with write-invalidated cache
pub struct ConfigStore {
    conn: Mutex<Connection>,
    master_key: MasterKey,
    cache: DashMap<(String, String), String>,
}

impl std::fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigStore")
            .field("cached_entries", &self.cache.len())
            .finish_non_exhaustive()
    }
}

fn db_err(e: &rusqlite::Error) -> GatewayError {
    GatewayError::internal(format!("config store failure: {e}"))
}

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS config_kv (
     key          TEXT NOT NULL,
     tenant_code  TEXT NOT NULL DEFAULT '',
     value        TEXT NOT NULL,
     encrypted    INTEGER NOT NULL DEFAULT 0,
     PRIMARY KEY (key, tenant_code)
 );";

impl ConfigStore {
    /// Open (creating on first use) the config table at `path`
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
        conn.execute_batch(SCHEMA).map_err(|e| db_err(&e))?;
        Ok(Self {
            conn: Mutex::new(conn),
            master_key,
            cache: DashMap::new(),
        })
    }

    /// In-memory store for tests
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Internal` when SQLite refuses the connection.
    pub fn open_in_memory(master_key: MasterKey) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| db_err(&e))?;
        conn.execute_batch(SCHEMA).map_err(|e| db_err(&e))?;
        Ok(Self {
            conn: Mutex::new(conn),
            master_key,
            cache: DashMap::new(),
        })
    }

    fn invalidate(&self, key: &str, tenant: &TenantCode) {
        self.cache
            .remove(&(key.to_string(), tenant.as_str().to_string()));
    }

    /// Create a new entry; the composite key must not exist yet
    ///
    /// # Errors
    ///
    /// `GatewayError::Operation` on a duplicate `(key, tenant)` pair,
    /// `GatewayError::Encryption` when encryption fails.
    pub fn add(&self, key: &str, tenant: &TenantCode, value: &str, encrypted: bool) -> Result<()> {
        if key.is_empty() {
            return Err(GatewayError::validation("config key must not be empty"));
        }
        let stored = if encrypted {
            self.master_key.encrypt(value)?
        } else {
            value.to_string()
        };
        let inserted = {
            let conn = self.conn.lock().expect("config store lock poisoned");
            conn.execute(
                "INSERT OR IGNORE INTO config_kv (key, tenant_code, value, encrypted)
                 VALUES (?1, ?2, ?3, ?4)",
                params![key, tenant.as_str(), stored, i32::from(encrypted)],
            )
            .map_err(|e| db_err(&e))?
        };
        if inserted == 0 {
            return Err(GatewayError::operation(format!(
                "config entry '{key}' already exists for this tenant"
            )));
        }
        self.invalidate(key, tenant);
        debug!(key, tenant = %tenant, encrypted, "Config entry added");
        Ok(())
    }

    /// Fetch an entry for the API surface; encrypted values are masked
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Internal` on store failure.
    pub fn get(&self, key: &str, tenant: &TenantCode) -> Result<Option<ConfigEntry>> {
        let row = self.fetch(key, tenant)?;
        Ok(row.map(|(value, encrypted)| ConfigEntry {
            key: key.to_string(),
            tenant_code: tenant.as_str().to_string(),
            value: if encrypted {
                ENCRYPTED_SENTINEL.to_string()
            } else {
                value
            },
            encrypted,
        }))
    }

    /// Fetch and decrypt an entry for internal consumers
    ///
    /// # Errors
    ///
    /// `GatewayError::Encryption` when the ciphertext cannot be decrypted.
    pub fn get_decrypted(&self, key: &str, tenant: &TenantCode) -> Result<Option<String>> {
        match self.fetch(key, tenant)? {
            None => Ok(None),
            Some((value, false)) => Ok(Some(value)),
            Some((ciphertext, true)) => Ok(Some(self.master_key.decrypt(&ciphertext)?)),
        }
    }

    /// Cached read used by per-request policy resolution
    ///
    /// Only plaintext hot keys are cached; the cache is filled on miss and
    /// invalidated synchronously by every mutation of the same pair.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Internal` on store failure.
    pub fn get_policy(&self, key: &str, tenant: &TenantCode) -> Result<Option<String>> {
        let cache_key = (key.to_string(), tenant.as_str().to_string());
        if let Some(hit) = self.cache.get(&cache_key) {
            return Ok(Some(hit.clone()));
        }
        let value = match self.fetch(key, tenant)? {
            Some((value, false)) => Some(value),
            // Encrypted rows never enter the policy cache
            Some((_, true)) => None,
            None => None,
        };
        if let Some(value) = &value {
            if HOT_KEYS.contains(&key) {
                self.cache.insert(cache_key, value.clone());
            }
        }
        Ok(value)
    }

    /// Partial update; `encrypted` keeps its stored value when `None`
    ///
    /// # Errors
    ///
    /// `GatewayError::Operation` when the entry does not exist.
    pub fn update(
        &self,
        key: &str,
        tenant: &TenantCode,
        value: &str,
        encrypted: Option<bool>,
    ) -> Result<()> {
        let target_encrypted = match encrypted {
            Some(flag) => flag,
            None => match self.fetch(key, tenant)? {
                Some((_, stored_flag)) => stored_flag,
                None => {
                    return Err(GatewayError::operation(format!(
                        "config entry '{key}' not found for this tenant"
                    )))
                }
            },
        };
        let stored = if target_encrypted {
            self.master_key.encrypt(value)?
        } else {
            value.to_string()
        };
        let updated = {
            let conn = self.conn.lock().expect("config store lock poisoned");
            conn.execute(
                "UPDATE config_kv SET value = ?1, encrypted = ?2
                 WHERE key = ?3 AND tenant_code = ?4",
                params![stored, i32::from(target_encrypted), key, tenant.as_str()],
            )
            .map_err(|e| db_err(&e))?
        };
        if updated == 0 {
            return Err(GatewayError::operation(format!(
                "config entry '{key}' not found for this tenant"
            )));
        }
        self.invalidate(key, tenant);
        debug!(key, tenant = %tenant, "Config entry updated");
        Ok(())
    }

    /// Delete an entry
    ///
    /// # Errors
    ///
    /// `GatewayError::Operation` when the entry does not exist.
    pub fn delete(&self, key: &str, tenant: &TenantCode) -> Result<()> {
        let deleted = {
            let conn = self.conn.lock().expect("config store lock poisoned");
            conn.execute(
                "DELETE FROM config_kv WHERE key = ?1 AND tenant_code = ?2",
                params![key, tenant.as_str()],
            )
            .map_err(|e| db_err(&e))?
        };
        if deleted == 0 {
            return Err(GatewayError::operation(format!(
                "config entry '{key}' not found for this tenant"
            )));
        }
        self.invalidate(key, tenant);
        debug!(key, tenant = %tenant, "Config entry deleted");
        Ok(())
    }

    /// Enumerate all entries of one tenant scope, encrypted values masked
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Internal` on store failure.
    pub fn list(&self, tenant: &TenantCode) -> Result<Vec<ConfigEntry>> {
        let conn = self.conn.lock().expect("config store lock poisoned");
        let mut stmt = conn
            .prepare(
                "SELECT key, value, encrypted FROM config_kv
                 WHERE tenant_code = ?1 ORDER BY key",
            )
            .map_err(|e| db_err(&e))?;
        let rows = stmt
            .query_map(params![tenant.as_str()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i32>(2)? != 0,
                ))
            })
            .map_err(|e| db_err(&e))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| db_err(&e))?;

        Ok(rows
            .into_iter()
            .map(|(key, value, encrypted)| ConfigEntry {
                key,
                tenant_code: tenant.as_str().to_string(),
                value: if encrypted {
                    ENCRYPTED_SENTINEL.to_string()
                } else {
                    value
                },
                encrypted,
            })
            .collect())
    }

    fn fetch(&self, key: &str, tenant: &TenantCode) -> Result<Option<(String, bool)>> {
        let conn = self.conn.lock().expect("config store lock poisoned");
        conn.query_row(
            "SELECT value, encrypted FROM config_kv WHERE key = ?1 AND tenant_code = ?2",
            params![key, tenant.as_str()],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, i32>(1)? != 0)),
        )
        .optional()
        .map_err(|e| db_err(&e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ConfigStore {
        let dir = tempfile::tempdir().unwrap();
        let key = MasterKey::load_or_create(dir.path()).unwrap();
        ConfigStore::open_in_memory(key).unwrap()
    }

    fn tenant(code: &str) -> TenantCode {
        TenantCode::parse(code).unwrap()
    }

    #[test]
    fn test_add_get_roundtrip() {
        let cs = store();
        let t1 = tenant("t1");
        cs.add("cors_origins", &t1, "https://a.example", false).unwrap();
        let entry = cs.get("cors_origins", &t1).unwrap().unwrap();
        assert_eq!(entry.value, "https://a.example");
        assert!(!entry.encrypted);
    }

    #[test]
    fn test_add_conflicts_on_duplicate_pair() {
        let cs = store();
        let t1 = tenant("t1");
        cs.add("k", &t1, "v1", false).unwrap();
        assert!(cs.add("k", &t1, "v2", false).is_err());
        // Same key under a different tenant is a separate row
        cs.add("k", &tenant("t2"), "v2", false).unwrap();
        // And under the global scope as well
        cs.add("k", &TenantCode::global(), "v3", false).unwrap();
    }

    #[test]
    fn test_encrypted_value_is_masked_and_decryptable() {
        let cs = store();
        let t1 = tenant("t1");
        cs.add("api_credential", &t1, "super-secret", true).unwrap();

        let masked = cs.get("api_credential", &t1).unwrap().unwrap();
        assert_eq!(masked.value, ENCRYPTED_SENTINEL);
        assert!(masked.encrypted);

        let decrypted = cs.get_decrypted("api_credential", &t1).unwrap().unwrap();
        assert_eq!(decrypted, "super-secret");
    }

    #[test]
    fn test_update_invalidates_cache_before_returning() {
        let cs = store();
        let t1 = tenant("t1");
        cs.add("cors_origins", &t1, "https://v1.example", false).unwrap();

        // Prime the cache
        assert_eq!(
            cs.get_policy("cors_origins", &t1).unwrap().unwrap(),
            "https://v1.example"
        );

        cs.update("cors_origins", &t1, "https://v2.example", None).unwrap();

        // The very next read observes the write, no stale value
        assert_eq!(
            cs.get_policy("cors_origins", &t1).unwrap().unwrap(),
            "https://v2.example"
        );
    }

    #[test]
    fn test_delete_invalidates_cache() {
        let cs = store();
        let t1 = tenant("t1");
        cs.add("trusted_hosts", &t1, "api.example.com", false).unwrap();
        assert!(cs.get_policy("trusted_hosts", &t1).unwrap().is_some());
        cs.delete("trusted_hosts", &t1).unwrap();
        assert!(cs.get_policy("trusted_hosts", &t1).unwrap().is_none());
        assert!(cs.delete("trusted_hosts", &t1).is_err());
    }

    #[test]
    fn test_update_missing_entry_fails() {
        let cs = store();
        assert!(cs.update("ghost", &tenant("t1"), "v", None).is_err());
    }

    #[test]
    fn test_list_scoped_to_tenant() {
        let cs = store();
        let t1 = tenant("t1");
        cs.add("a", &t1, "1", false).unwrap();
        cs.add("b", &t1, "2", true).unwrap();
        cs.add("a", &tenant("t2"), "other", false).unwrap();

        let entries = cs.list(&t1).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].key, "a");
        assert_eq!(entries[1].value, ENCRYPTED_SENTINEL);
    }

    #[test]
    fn test_encrypted_rows_never_enter_policy_cache() {
        let cs = store();
        let t1 = tenant("t1");
        cs.add("cors_origins", &t1, "ciphertext-only", true).unwrap();
        assert!(cs.get_policy("cors_origins", &t1).unwrap().is_none());
    }
}
