//! Two-tier rate limiter
//!
//! Fixed-window buckets, one limiter per source IP and one per tenant.
//! Tenant quotas are tier-based (`default` or `premium`), resolved from the
//! config store key `rate_limit_tier` with a short-lived cache so the hot
//! path stays off SQLite. Tenant buckets idle beyond `max_inactive_secs`
//! are removed by the background maintenance task.

use dashmap::DashMap;
use flouds_config::RateLimitConfig;
use flouds_core::error::{GatewayError, RateScope};
use flouds_core::types::tenant::TenantCode;
use flouds_storage::ConfigStore;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Tier names and how long a resolved tier stays cached
pub const TIER_DEFAULT: &str = "default";
pub const TIER_PREMIUM: &str = "premium";
const TIER_CACHE_TTL: Duration = Duration::from_secs(30);

#[derive(Debug)]
struct Bucket {
    window_start: Instant,
    count: u32,
    last_seen: Instant,
}

impl Bucket {
    fn new(now: Instant) -> Self {
        Self {
            window_start: now,
            count: 0,
            last_seen: now,
        }
    }
}

/// Outcome of a limiter check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: u32 },
    Denied {
        limit: u32,
        period_secs: u64,
        retry_after_secs: u64,
        scope: RateScope,
        tier: Option<String>,
    },
}

impl RateDecision {
    /// Convert a denial into the canonical error
    #[must_use]
    pub fn into_error(self) -> Option<GatewayError> {
        match self {
            Self::Allowed { .. } => None,
            Self::Denied {
                limit,
                period_secs,
                retry_after_secs,
                scope,
                tier,
            } => Some(GatewayError::RateLimited {
                limit,
                period_secs,
                retry_after_secs,
                scope,
                tier,
            }),
        }
    }
}

/// IP + tenant fixed-window rate limiter
pub struct RateLimiter {
    config: RateLimitConfig,
    ip_buckets: DashMap<String, Bucket>,
    tenant_buckets: DashMap<String, Bucket>,
    tier_cache: DashMap<String, (String, Instant)>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("ip_buckets", &self.ip_buckets.len())
            .field("tenant_buckets", &self.tenant_buckets.len())
            .finish_non_exhaustive()
    }
}

/// Shared fixed-window step: reset the window if elapsed, then count
fn on_request(
    bucket: &mut Bucket,
    limit: u32,
    period: Duration,
    scope: RateScope,
    tier: Option<String>,
    now: Instant,
) -> RateDecision {
    if now.duration_since(bucket.window_start) >= period {
        bucket.window_start = now;
        bucket.count = 0;
    }
    bucket.count += 1;
    bucket.last_seen = now;
    if bucket.count > limit {
        let elapsed = now.duration_since(bucket.window_start);
        let retry_after = period.saturating_sub(elapsed).as_secs().clamp(0, period.as_secs());
        RateDecision::Denied {
            limit,
            period_secs: period.as_secs(),
            // Clients should wait at least one second before retrying
            retry_after_secs: retry_after.max(1),
            scope,
            tier,
        }
    } else {
        RateDecision::Allowed {
            remaining: limit - bucket.count,
        }
    }
}

impl RateLimiter {
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            ip_buckets: DashMap::new(),
            tenant_buckets: DashMap::new(),
            tier_cache: DashMap::new(),
        }
    }

    /// Check the per-IP window
    pub fn check_ip(&self, ip: &str) -> RateDecision {
        let now = Instant::now();
        let mut bucket = self
            .ip_buckets
            .entry(ip.to_string())
            .or_insert_with(|| Bucket::new(now));
        on_request(
            bucket.value_mut(),
            self.config.ip_limit,
            Duration::from_secs(self.config.ip_period_secs),
            RateScope::Ip,
            None,
            now,
        )
    }

    /// Check the per-tenant window with its tier quota
    pub fn check_tenant(&self, tenant: &TenantCode, config_store: &ConfigStore) -> RateDecision {
        let tier = self.resolve_tier(tenant, config_store);
        let limit = if tier == TIER_PREMIUM {
            self.config.tenant_premium_limit
        } else {
            self.config.tenant_default_limit
        };
        let now = Instant::now();
        let mut bucket = self
            .tenant_buckets
            .entry(tenant.as_str().to_string())
            .or_insert_with(|| Bucket::new(now));
        on_request(
            bucket.value_mut(),
            limit,
            Duration::from_secs(self.config.tenant_period_secs),
            RateScope::Tenant,
            Some(tier),
            now,
        )
    }

    /// Tier lookup with a short-lived cache
    fn resolve_tier(&self, tenant: &TenantCode, config_store: &ConfigStore) -> String {
        let key = tenant.as_str().to_string();
        if let Some(cached) = self.tier_cache.get(&key) {
            let (tier, fetched_at) = cached.value();
            if fetched_at.elapsed() < TIER_CACHE_TTL {
                return tier.clone();
            }
        }
        let tier = match config_store.get_policy("rate_limit_tier", tenant) {
            Ok(Some(stored)) if stored == TIER_PREMIUM => TIER_PREMIUM.to_string(),
            Ok(_) => TIER_DEFAULT.to_string(),
            Err(e) => {
                warn!(tenant = %tenant, error = %e, "Tier lookup failed, using default tier");
                TIER_DEFAULT.to_string()
            }
        };
        self.tier_cache.insert(key, (tier.clone(), Instant::now()));
        tier
    }

    /// Remove tenant buckets idle beyond the configured maximum
    ///
    /// Returns the number of buckets removed. IP buckets recycle the same
    /// way to keep the map bounded.
    pub fn cleanup_inactive(&self) -> usize {
        let max_inactive = Duration::from_secs(self.config.max_inactive_secs);
        let before = self.tenant_buckets.len() + self.ip_buckets.len();
        self.tenant_buckets
            .retain(|_, bucket| bucket.last_seen.elapsed() < max_inactive);
        self.ip_buckets
            .retain(|_, bucket| bucket.last_seen.elapsed() < max_inactive);
        self.tier_cache
            .retain(|_, (_, fetched_at)| fetched_at.elapsed() < max_inactive);
        let removed = before - (self.tenant_buckets.len() + self.ip_buckets.len());
        if removed > 0 {
            debug!(removed, "Evicted inactive rate buckets");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flouds_security::MasterKey;

    fn limiter(ip_limit: u32, tenant_default: u32) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            ip_limit,
            ip_period_secs: 60,
            tenant_default_limit: tenant_default,
            tenant_premium_limit: 1000,
            tenant_period_secs: 60,
            max_inactive_secs: 3600,
        })
    }

    fn store() -> ConfigStore {
        let dir = tempfile::tempdir().unwrap();
        let key = MasterKey::load_or_create(dir.path()).unwrap();
        ConfigStore::open_in_memory(key).unwrap()
    }

    #[test]
    fn test_ip_limit_denies_after_quota() {
        let limiter = limiter(100, 200);
        for i in 0..100 {
            match limiter.check_ip("10.1.1.1") {
                RateDecision::Allowed { remaining } => assert_eq!(remaining, 100 - i - 1),
                RateDecision::Denied { .. } => panic!("request {i} should pass"),
            }
        }
        match limiter.check_ip("10.1.1.1") {
            RateDecision::Denied {
                limit,
                period_secs,
                retry_after_secs,
                scope,
                tier,
            } => {
                assert_eq!(limit, 100);
                assert_eq!(period_secs, 60);
                assert!((1..=60).contains(&retry_after_secs));
                assert_eq!(scope, RateScope::Ip);
                assert!(tier.is_none());
            }
            RateDecision::Allowed { .. } => panic!("101st request must be denied"),
        }
        // A different address is unaffected
        assert!(matches!(
            limiter.check_ip("10.1.1.2"),
            RateDecision::Allowed { .. }
        ));
    }

    #[test]
    fn test_tenant_tier_quota_from_config_store() {
        let limiter = limiter(1000, 2);
        let cs = store();
        let basic = TenantCode::parse("basic").unwrap();
        let premium = TenantCode::parse("premium-t").unwrap();
        cs.add("rate_limit_tier", &premium, TIER_PREMIUM, false).unwrap();

        // Default tier: third request denied
        assert!(matches!(
            limiter.check_tenant(&basic, &cs),
            RateDecision::Allowed { .. }
        ));
        assert!(matches!(
            limiter.check_tenant(&basic, &cs),
            RateDecision::Allowed { .. }
        ));
        match limiter.check_tenant(&basic, &cs) {
            RateDecision::Denied { tier, limit, .. } => {
                assert_eq!(tier.as_deref(), Some(TIER_DEFAULT));
                assert_eq!(limit, 2);
            }
            RateDecision::Allowed { .. } => panic!("default tier exhausted"),
        }

        // Premium tier gets the large quota
        for _ in 0..10 {
            assert!(matches!(
                limiter.check_tenant(&premium, &cs),
                RateDecision::Allowed { .. }
            ));
        }
    }

    #[test]
    fn test_window_resets_after_period() {
        let limiter = RateLimiter::new(RateLimitConfig {
            ip_limit: 1,
            ip_period_secs: 1,
            tenant_default_limit: 200,
            tenant_premium_limit: 1000,
            tenant_period_secs: 60,
            max_inactive_secs: 3600,
        });
        assert!(matches!(
            limiter.check_ip("10.0.0.9"),
            RateDecision::Allowed { .. }
        ));
        assert!(matches!(
            limiter.check_ip("10.0.0.9"),
            RateDecision::Denied { .. }
        ));
        std::thread::sleep(Duration::from_millis(1100));
        assert!(matches!(
            limiter.check_ip("10.0.0.9"),
            RateDecision::Allowed { .. }
        ));
    }

    #[test]
    fn test_cleanup_removes_idle_buckets() {
        let limiter = RateLimiter::new(RateLimitConfig {
            max_inactive_secs: 0,
            ..RateLimitConfig::default()
        });
        let cs = store();
        let tenant = TenantCode::parse("sleepy").unwrap();
        limiter.check_tenant(&tenant, &cs);
        limiter.check_ip("10.0.0.1");
        assert_eq!(limiter.cleanup_inactive(), 2);
        assert_eq!(limiter.tenant_buckets.len(), 0);
    }

    #[test]
    fn test_denial_converts_to_rate_limited_error() {
        let limiter = limiter(1, 200);
        limiter.check_ip("10.9.9.9");
        let denial = limiter.check_ip("10.9.9.9");
        let err = denial.into_error().expect("denied");
        assert_eq!(err.kind_code(), "rate_limit_error");
        assert_eq!(err.http_status(), 429);
    }
}
