//! Admission control.
//!
//! Token-bucket gate in front of the dispatch core. Every submission is
//! checked against one bucket per relevant dimension and passes only if all
//! of them pass, short-circuiting on the first dry bucket:
//!
//! - traditional path: IP -> user+tier -> job kind
//! - identity path (app-server and api-key both present): app-server ->
//!   api-key -> job kind
//!
//! The controller is a pure gate: it never touches job or retry state, and
//! a rejection carries the minimum remaining-token count across everything
//! it checked as a client back-off hint.
//!
//! # Example
//!
//! ```rust,ignore
//! use foreman_core::admission::{AdmissionController, SubmissionContext};
//! use foreman_core::jobs::JobKind;
//!
//! let controller = AdmissionController::new(config.admission.clone());
//! let ctx = SubmissionContext::default().with_ip("10.0.0.9");
//! let decision = controller.check(&ctx, "report-generation", JobKind::OneTime);
//! if !decision.allowed {
//!     // reject with 429 and decision.remaining as the hint
//! }
//! ```

pub mod bucket;

pub use bucket::TokenBucket;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use metrics::counter;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::config::{AdmissionConfig, RateLimitSpec};
use crate::error::{ForemanError, Result};
use crate::jobs::JobKind;

// ═══════════════════════════════════════════════════════════════════════════════
// Submission Context
// ═══════════════════════════════════════════════════════════════════════════════

/// Caller identity attached to a submission.
///
/// Every field is optional; absent fields simply skip their dimension.
#[derive(Debug, Clone, Default)]
pub struct SubmissionContext {
    /// Client IP, from the connection or forwarded headers
    pub ip: Option<String>,
    /// End-user id
    pub user_id: Option<String>,
    /// End-user tier name, resolved against the configured tier presets
    pub user_tier: Option<String>,
    /// Submitting application server id
    pub app_server_id: Option<String>,
    /// API key id used by the application server
    pub api_key_id: Option<String>,
}

impl SubmissionContext {
    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>, tier: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self.user_tier = Some(tier.into());
        self
    }

    pub fn with_app_identity(
        mut self,
        app_server_id: impl Into<String>,
        api_key_id: impl Into<String>,
    ) -> Self {
        self.app_server_id = Some(app_server_id.into());
        self.api_key_id = Some(api_key_id.into());
        self
    }

    /// Both halves of the app identity are present.
    pub fn has_app_identity(&self) -> bool {
        self.app_server_id.is_some() && self.api_key_id.is_some()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Decision
// ═══════════════════════════════════════════════════════════════════════════════

/// Bucket partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Ip,
    User,
    AppServer,
    ApiKey,
    JobKind,
}

impl Dimension {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Ip => "ip",
            Self::User => "user",
            Self::AppServer => "app-server",
            Self::ApiKey => "api-key",
            Self::JobKind => "job-kind",
        }
    }
}

impl std::fmt::Display for Dimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone)]
pub struct AdmissionDecision {
    /// Whether the submission may proceed
    pub allowed: bool,
    /// The dimension that ran dry, when denied
    pub denied_dimension: Option<Dimension>,
    /// Minimum remaining tokens across the dimensions checked
    pub remaining: u64,
}

impl AdmissionDecision {
    fn pass(remaining: u64) -> Self {
        Self {
            allowed: true,
            denied_dimension: None,
            remaining,
        }
    }

    fn pass_unlimited() -> Self {
        Self::pass(u64::MAX)
    }

    fn deny(dimension: Dimension, remaining: u64) -> Self {
        Self {
            allowed: false,
            denied_dimension: Some(dimension),
            remaining,
        }
    }

    /// Convert a denial into the error the API surfaces as 429.
    pub fn into_result(self) -> Result<()> {
        match self.denied_dimension {
            None => Ok(()),
            Some(dimension) => Err(ForemanError::admission_denied(
                dimension.label(),
                self.remaining,
            )),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Dimension Cache
// ═══════════════════════════════════════════════════════════════════════════════

/// Bounded bucket cache for one dimension.
struct DimensionCache {
    buckets: DashMap<String, RwLock<TokenBucket>>,
}

impl DimensionCache {
    fn new() -> Self {
        Self {
            buckets: DashMap::new(),
        }
    }

    /// Consume one token from the bucket for `key`, creating it full on
    /// first sight. Returns the verdict and the remaining whole tokens.
    fn acquire(&self, key: &str, spec: RateLimitSpec, max_entries: usize) -> (bool, u64) {
        if !self.buckets.contains_key(key) && self.buckets.len() >= max_entries {
            self.evict_stalest();
        }

        let entry = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| RwLock::new(TokenBucket::new(spec)));
        let mut bucket = entry.write();
        let allowed = bucket.try_acquire();
        (allowed, bucket.remaining())
    }

    /// Remaining tokens for `key` without consuming.
    fn remaining(&self, key: &str) -> Option<u64> {
        self.buckets.get(key).map(|entry| entry.write().remaining())
    }

    /// Drop buckets idle past `max_idle`. Returns how many were dropped.
    fn evict_idle(&self, max_idle: std::time::Duration) -> usize {
        let now = Instant::now();
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| bucket.read().idle_for(now) < max_idle);
        before - self.buckets.len()
    }

    /// Cache is full and the key is new: drop the longest-idle bucket.
    fn evict_stalest(&self) {
        let now = Instant::now();
        let stalest = self
            .buckets
            .iter()
            .max_by_key(|item| item.value().read().idle_for(now))
            .map(|item| item.key().clone());

        if let Some(key) = stalest {
            self.buckets.remove(&key);
        }
    }

    fn len(&self) -> usize {
        self.buckets.len()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Controller
// ═══════════════════════════════════════════════════════════════════════════════

/// Admission statistics snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct AdmissionStats {
    pub enabled: bool,
    pub checks_total: u64,
    pub allowed_total: u64,
    pub denied_total: u64,
    pub ip_buckets: usize,
    pub user_buckets: usize,
    pub app_server_buckets: usize,
    pub api_key_buckets: usize,
    pub job_kind_buckets: usize,
}

/// Token-bucket admission gate, one bucket cache per dimension.
pub struct AdmissionController {
    config: AdmissionConfig,
    ips: DimensionCache,
    users: DimensionCache,
    app_servers: DimensionCache,
    api_keys: DimensionCache,
    job_kinds: DimensionCache,
    checks: AtomicU64,
    allowed: AtomicU64,
    denied: AtomicU64,
}

impl AdmissionController {
    /// Create a controller from configuration.
    pub fn new(config: AdmissionConfig) -> Self {
        tracing::info!(
            enabled = config.enabled,
            tiers = config.tiers.len(),
            cache_max_entries = config.cache_max_entries,
            "Admission controller created"
        );

        Self {
            config,
            ips: DimensionCache::new(),
            users: DimensionCache::new(),
            app_servers: DimensionCache::new(),
            api_keys: DimensionCache::new(),
            job_kinds: DimensionCache::new(),
            checks: AtomicU64::new(0),
            allowed: AtomicU64::new(0),
            denied: AtomicU64::new(0),
        }
    }

    /// Whether the gate is active.
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Run the combined check for one submission.
    ///
    /// Consumes one token from each dimension in path order and denies on
    /// the first dry bucket. Dimensions already charged are not refunded;
    /// the request they admitted never happened, and the drip refills them.
    pub fn check(&self, ctx: &SubmissionContext, job_type: &str, kind: JobKind) -> AdmissionDecision {
        if !self.config.enabled {
            return AdmissionDecision::pass_unlimited();
        }

        self.checks.fetch_add(1, Ordering::Relaxed);
        counter!("foreman_admission_checks_total").increment(1);

        let mut min_remaining = u64::MAX;
        let steps = self.plan(ctx, job_type, kind);

        for (dimension, key, spec) in steps {
            let cache = self.cache_for(dimension);
            let (ok, remaining) = cache.acquire(&key, spec, self.config.cache_max_entries);
            min_remaining = min_remaining.min(remaining);

            if !ok {
                self.denied.fetch_add(1, Ordering::Relaxed);
                counter!(
                    "foreman_admission_rejected_total",
                    "dimension" => dimension.label(),
                )
                .increment(1);
                tracing::warn!(
                    dimension = dimension.label(),
                    key = %key,
                    remaining = min_remaining,
                    job_type,
                    "Submission rejected by admission control"
                );
                return AdmissionDecision::deny(dimension, min_remaining);
            }
        }

        self.allowed.fetch_add(1, Ordering::Relaxed);
        AdmissionDecision::pass(min_remaining)
    }

    /// Remaining tokens for one key, for the stats endpoints.
    pub fn remaining(&self, dimension: Dimension, key: &str) -> Option<u64> {
        self.cache_for(dimension).remaining(key)
    }

    /// Snapshot counters and cache sizes.
    pub fn stats(&self) -> AdmissionStats {
        AdmissionStats {
            enabled: self.config.enabled,
            checks_total: self.checks.load(Ordering::Relaxed),
            allowed_total: self.allowed.load(Ordering::Relaxed),
            denied_total: self.denied.load(Ordering::Relaxed),
            ip_buckets: self.ips.len(),
            user_buckets: self.users.len(),
            app_server_buckets: self.app_servers.len(),
            api_key_buckets: self.api_keys.len(),
            job_kind_buckets: self.job_kinds.len(),
        }
    }

    /// Evict idle buckets across every dimension. Returns the total dropped.
    pub fn evict_idle(&self) -> usize {
        let max_idle = self.config.idle_eviction;
        self.ips.evict_idle(max_idle)
            + self.users.evict_idle(max_idle)
            + self.app_servers.evict_idle(max_idle)
            + self.api_keys.evict_idle(max_idle)
            + self.job_kinds.evict_idle(max_idle)
    }

    /// Build the ordered (dimension, key, spec) steps for this submission.
    fn plan(
        &self,
        ctx: &SubmissionContext,
        job_type: &str,
        kind: JobKind,
    ) -> Vec<(Dimension, String, RateLimitSpec)> {
        let kind_spec = match kind {
            JobKind::OneTime => self.config.one_time,
            JobKind::Repetitive => self.config.repetitive,
        };
        let mut steps = Vec::with_capacity(3);

        if ctx.has_app_identity() {
            if let (Some(app), Some(key)) = (&ctx.app_server_id, &ctx.api_key_id) {
                steps.push((Dimension::AppServer, app.clone(), self.config.default));
                steps.push((Dimension::ApiKey, key.clone(), self.config.default));
            }
        } else {
            if let Some(ip) = &ctx.ip {
                steps.push((Dimension::Ip, ip.clone(), self.config.default));
            }
            if let Some(user_id) = &ctx.user_id {
                let tier = ctx.user_tier.as_deref();
                let key = format!("{}:{}", user_id, tier.unwrap_or("unknown"));
                steps.push((Dimension::User, key, self.tier_spec(tier)));
            }
        }

        steps.push((Dimension::JobKind, job_type.to_string(), kind_spec));
        steps
    }

    /// Tier preset lookup; unknown tiers get the most restrictive preset.
    fn tier_spec(&self, tier: Option<&str>) -> RateLimitSpec {
        if let Some(spec) = tier.and_then(|t| self.config.tiers.get(t)) {
            return *spec;
        }

        self.config
            .tiers
            .values()
            .copied()
            .min_by(|a, b| a.capacity.total_cmp(&b.capacity))
            .unwrap_or(self.config.default)
    }

    fn cache_for(&self, dimension: Dimension) -> &DimensionCache {
        match dimension {
            Dimension::Ip => &self.ips,
            Dimension::User => &self.users,
            Dimension::AppServer => &self.app_servers,
            Dimension::ApiKey => &self.api_keys,
            Dimension::JobKind => &self.job_kinds,
        }
    }
}

/// Start the periodic idle-bucket eviction task.
pub fn start_cleanup_task(controller: Arc<AdmissionController>) -> JoinHandle<()> {
    let interval = controller.config.cleanup_interval;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let evicted = controller.evict_idle();
            if evicted > 0 {
                tracing::debug!(evicted, "Evicted idle admission buckets");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    fn test_config() -> AdmissionConfig {
        let mut tiers = HashMap::new();
        tiers.insert("free".to_string(), RateLimitSpec::per_minute(2.0));
        tiers.insert("premium".to_string(), RateLimitSpec::per_minute(50.0));

        AdmissionConfig {
            enabled: true,
            default: RateLimitSpec::per_minute(60.0),
            one_time: RateLimitSpec::per_minute(30.0),
            repetitive: RateLimitSpec::per_minute(20.0),
            tiers,
            cache_max_entries: 4,
            idle_eviction: Duration::from_secs(600),
            cleanup_interval: Duration::from_secs(60),
        }
    }

    #[test]
    fn test_disabled_controller_passes_everything() {
        let mut config = test_config();
        config.enabled = false;
        let controller = AdmissionController::new(config);

        let ctx = SubmissionContext::default();
        for _ in 0..1000 {
            assert!(controller.check(&ctx, "any", JobKind::OneTime).allowed);
        }
        assert_eq!(controller.stats().checks_total, 0);
    }

    #[test]
    fn test_job_kind_bucket_drains() {
        let mut config = test_config();
        config.one_time = RateLimitSpec::per_minute(2.0);
        let controller = AdmissionController::new(config);
        let ctx = SubmissionContext::default();

        assert!(controller.check(&ctx, "report", JobKind::OneTime).allowed);
        assert!(controller.check(&ctx, "report", JobKind::OneTime).allowed);

        let decision = controller.check(&ctx, "report", JobKind::OneTime);
        assert!(!decision.allowed);
        assert_eq!(decision.denied_dimension, Some(Dimension::JobKind));

        // Other job types hold their own buckets.
        assert!(controller.check(&ctx, "cleanup", JobKind::OneTime).allowed);
    }

    #[test]
    fn test_traditional_path_short_circuits_on_ip() {
        let mut config = test_config();
        config.default = RateLimitSpec::per_minute(1.0);
        let controller = AdmissionController::new(config);
        let ctx = SubmissionContext::default().with_ip("10.0.0.1");

        assert!(controller.check(&ctx, "report", JobKind::OneTime).allowed);

        let decision = controller.check(&ctx, "report", JobKind::OneTime);
        assert!(!decision.allowed);
        assert_eq!(decision.denied_dimension, Some(Dimension::Ip));
        // The job-kind bucket was never charged on the denied check.
        assert_eq!(
            controller.remaining(Dimension::JobKind, "report"),
            Some(29)
        );
    }

    #[test]
    fn test_user_tier_presets() {
        let controller = AdmissionController::new(test_config());
        let ctx = SubmissionContext::default().with_user("u1", "free");

        assert!(controller.check(&ctx, "report", JobKind::OneTime).allowed);
        assert!(controller.check(&ctx, "report", JobKind::OneTime).allowed);

        let decision = controller.check(&ctx, "report", JobKind::OneTime);
        assert!(!decision.allowed);
        assert_eq!(decision.denied_dimension, Some(Dimension::User));
    }

    #[test]
    fn test_unknown_tier_uses_most_restrictive_preset() {
        let controller = AdmissionController::new(test_config());
        let ctx = SubmissionContext::default().with_user("u2", "platinum");

        // "platinum" is not configured; the free preset (capacity 2) applies.
        assert!(controller.check(&ctx, "report", JobKind::OneTime).allowed);
        assert!(controller.check(&ctx, "report", JobKind::OneTime).allowed);
        assert!(!controller.check(&ctx, "report", JobKind::OneTime).allowed);
    }

    #[test]
    fn test_app_identity_path_skips_ip_and_user() {
        let mut config = test_config();
        config.default = RateLimitSpec::per_minute(1.0);
        let controller = AdmissionController::new(config);

        let ctx = SubmissionContext::default()
            .with_ip("10.0.0.2")
            .with_user("u3", "free")
            .with_app_identity("app-1", "key-1");

        assert!(controller.check(&ctx, "report", JobKind::OneTime).allowed);

        let decision = controller.check(&ctx, "report", JobKind::OneTime);
        assert!(!decision.allowed);
        assert_eq!(decision.denied_dimension, Some(Dimension::AppServer));

        let stats = controller.stats();
        assert_eq!(stats.ip_buckets, 0);
        assert_eq!(stats.user_buckets, 0);
        assert_eq!(stats.app_server_buckets, 1);
    }

    #[test]
    fn test_rejection_reports_minimum_remaining() {
        let mut config = test_config();
        config.default = RateLimitSpec {
            capacity: 5.0,
            refill_per_minute: 0.0,
        };
        config.one_time = RateLimitSpec {
            capacity: 2.0,
            refill_per_minute: 0.0,
        };
        let controller = AdmissionController::new(config);
        let ctx = SubmissionContext::default().with_ip("10.0.0.3");

        assert!(controller.check(&ctx, "report", JobKind::OneTime).allowed);
        assert!(controller.check(&ctx, "report", JobKind::OneTime).allowed);

        // IP still has 3 tokens but the job-kind bucket is dry; the hint is
        // the minimum across both.
        let decision = controller.check(&ctx, "report", JobKind::OneTime);
        assert!(!decision.allowed);
        assert_eq!(decision.denied_dimension, Some(Dimension::JobKind));
        assert_eq!(decision.remaining, 0);
    }

    #[test]
    fn test_cache_bound_evicts_stalest() {
        let controller = AdmissionController::new(test_config());

        for i in 0..6 {
            let ctx = SubmissionContext::default().with_ip(format!("10.0.0.{}", i));
            controller.check(&ctx, "report", JobKind::OneTime);
        }

        assert!(controller.stats().ip_buckets <= 4);
    }

    #[test]
    fn test_evict_idle_respects_threshold() {
        let mut config = test_config();
        config.idle_eviction = Duration::from_secs(0);
        let controller = AdmissionController::new(config);

        let ctx = SubmissionContext::default().with_ip("10.0.0.9");
        controller.check(&ctx, "report", JobKind::OneTime);
        assert!(controller.stats().ip_buckets > 0);

        let evicted = controller.evict_idle();
        assert!(evicted >= 1);
        assert_eq!(controller.stats().ip_buckets, 0);
    }

    #[test]
    fn test_denied_decision_into_result() {
        let decision = AdmissionDecision::deny(Dimension::Ip, 0);
        let err = decision.into_result().unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::AdmissionDenied);

        assert!(AdmissionDecision::pass(3).into_result().is_ok());
    }
}
