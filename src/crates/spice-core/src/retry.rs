//! Retry policies and the policy resolver — exponential backoff for transient node failures
//!
//! This module provides configurable retry policies with exponential backoff and jitter,
//! plus a [`RetryPolicyResolver`] that picks the right policy for a given failure. Retry
//! policies exist to automatically recover from transient failures during graph execution:
//!
//! - Network timeouts and connection failures
//! - Rate limit errors from external APIs
//! - Temporary service unavailability
//!
//! **Don't retry when:** errors are permanent (validation, routing), operations have
//! side effects that aren't idempotent, or the error requires human intervention.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  Graph Runner: node execution fails with a SpiceError     │
//! └─────────────┬──────────────────────────────────────────────┘
//!               │
//!               ↓ RetryPolicyResolver::resolve(error, node_id, tenant_id)
//! ┌──────────────────────────────────────────────────────────┐
//! │  1. error-embedded RetryHint (skip_retry / max_attempts)  │
//! │  2. custom resolvers, in registration order               │
//! │  3. policy keyed by error.code()                          │
//! │  4. policy keyed by node_id                                │
//! │  5. policy keyed by message.metadata.tenantId              │
//! │  6. provided default                                       │
//! └─────────────┬──────────────────────────────────────────────┘
//!               │
//!               ↓ RetryPolicy::backoff_for_attempt(k)
//! ┌──────────────────────────────────────────────────────────┐
//! │  delay = min(max_backoff, initial_backoff * multiplier^(k-1))│
//! │  delay += uniform(0, jitter * delay)                       │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```rust
//! use spice_core::retry::RetryPolicy;
//!
//! let policy = RetryPolicy::default_profile();
//! assert_eq!(policy.max_attempts, 3);
//!
//! for attempt in 1..=policy.max_attempts {
//!     let delay = policy.backoff_for_attempt(attempt);
//!     println!("attempt {attempt}: would wait {delay:?}");
//! }
//! ```
//!
//! # Resolver
//!
//! ```rust
//! use spice_core::retry::{RetryPolicy, RetryPolicyResolver};
//! use spice_core::error::SpiceError;
//!
//! let mut resolver = RetryPolicyResolver::new(RetryPolicy::default_profile());
//! resolver.set_for_error_code("RATE_LIMIT", RetryPolicy::aggressive_profile());
//!
//! let err = SpiceError::RateLimit("429".into());
//! let policy = resolver.resolve(&err, None, None, None);
//! assert_eq!(policy.max_attempts, RetryPolicy::aggressive_profile().max_attempts);
//! ```

use rand::Rng;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{RetryableError, SpiceError};

/// Configuration for retrying a failed node execution (§3, §4.3).
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: usize,
    /// Initial backoff before the first retry.
    pub initial_backoff: Duration,
    /// Multiplier applied to the backoff after each retry.
    pub multiplier: f64,
    /// Upper bound on any single backoff, regardless of attempt count.
    pub max_backoff: Duration,
    /// Fraction of the capped backoff added as uniform jitter, e.g. `0.25` for ±25%.
    pub jitter: f64,
    /// Error codes this policy considers retryable. Empty means "use the
    /// error's own [`SpiceError::is_retryable_by_default`]".
    pub retryable_error_codes: Vec<String>,
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retry_profile() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            multiplier: 1.0,
            max_backoff: Duration::ZERO,
            jitter: 0.0,
            retryable_error_codes: Vec::new(),
        }
    }

    /// The default profile named in §4.3: 3 attempts, 500ms base, ×2, capped at
    /// 30s, 25% jitter.
    pub fn default_profile() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            multiplier: 2.0,
            max_backoff: Duration::from_secs(30),
            jitter: 0.25,
            retryable_error_codes: vec![
                "NETWORK_ERROR".into(),
                "RATE_LIMIT".into(),
                "NODE_EXECUTION".into(),
                "TIMEOUT".into(),
            ],
        }
    }

    /// More attempts, shorter base delay — for low-latency collaborators
    /// expected to recover quickly (e.g. an in-cluster tool).
    pub fn aggressive_profile() -> Self {
        Self {
            max_attempts: 6,
            initial_backoff: Duration::from_millis(100),
            multiplier: 2.0,
            max_backoff: Duration::from_secs(10),
            jitter: 0.25,
            retryable_error_codes: RetryPolicy::default_profile().retryable_error_codes,
        }
    }

    /// Fewer attempts, longer base delay — for expensive or rate-limited
    /// upstreams where hammering makes things worse.
    pub fn conservative_profile() -> Self {
        Self {
            max_attempts: 2,
            initial_backoff: Duration::from_secs(2),
            multiplier: 3.0,
            max_backoff: Duration::from_secs(60),
            jitter: 0.1,
            retryable_error_codes: RetryPolicy::default_profile().retryable_error_codes,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_retryable_error_codes(mut self, codes: Vec<String>) -> Self {
        self.retryable_error_codes = codes;
        self
    }

    /// Whether `attempt` (1-indexed, the attempt *about to be made*) is still
    /// within `max_attempts`.
    pub fn should_retry(&self, attempt: usize) -> bool {
        attempt <= self.max_attempts
    }

    /// Backoff for attempt `k` (1-indexed), per §4.3:
    /// `min(max_backoff, initial_backoff * multiplier^(k-1))` plus uniform
    /// jitter in `[0, jitter * backoff]`.
    pub fn backoff_for_attempt(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let base = self.initial_backoff.as_secs_f64() * self.multiplier.powi(attempt as i32 - 1);
        let capped = base.min(self.max_backoff.as_secs_f64());
        let jittered = if self.jitter > 0.0 {
            let mut rng = rand::thread_rng();
            capped + rng.gen_range(0.0..=capped * self.jitter)
        } else {
            capped
        };
        Duration::from_secs_f64(jittered.max(0.0))
    }

    /// Whether `code` is retryable under this policy.
    pub fn is_code_retryable(&self, code: &str) -> bool {
        self.retryable_error_codes.iter().any(|c| c == code)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::default_profile()
    }
}

/// A host-registered function that may resolve a policy for a given failure,
/// consulted in registration order as step 2 of §4.3's resolution order.
pub type CustomResolver = Box<dyn Fn(&SpiceError, Option<&str>, Option<&str>) -> Option<RetryPolicy> + Send + Sync>;

/// Resolves a [`RetryPolicy`] for a failure, following the six-step order in
/// SPEC_FULL.md §4.3: error-embedded hint, custom resolvers, error code table,
/// node-id table, tenant-id table, provided default.
pub struct RetryPolicyResolver {
    default_policy: RetryPolicy,
    custom_resolvers: Vec<CustomResolver>,
    by_error_code: HashMap<String, RetryPolicy>,
    by_node_id: HashMap<String, RetryPolicy>,
    by_tenant_id: HashMap<String, RetryPolicy>,
}

impl RetryPolicyResolver {
    pub fn new(default_policy: RetryPolicy) -> Self {
        Self {
            default_policy,
            custom_resolvers: Vec::new(),
            by_error_code: HashMap::new(),
            by_node_id: HashMap::new(),
            by_tenant_id: HashMap::new(),
        }
    }

    /// Register a custom resolver; later registrations are consulted after
    /// earlier ones, and the first `Some` wins.
    pub fn add_custom_resolver(&mut self, resolver: CustomResolver) {
        self.custom_resolvers.push(resolver);
    }

    pub fn set_for_error_code(&mut self, code: impl Into<String>, policy: RetryPolicy) {
        self.by_error_code.insert(code.into(), policy);
    }

    pub fn set_for_node(&mut self, node_id: impl Into<String>, policy: RetryPolicy) {
        self.by_node_id.insert(node_id.into(), policy);
    }

    pub fn set_for_tenant(&mut self, tenant_id: impl Into<String>, policy: RetryPolicy) {
        self.by_tenant_id.insert(tenant_id.into(), policy);
    }

    /// Resolve the policy to use for `error`, optionally scoped to `node_id`
    /// and `tenant_id`. `retry_hint`, when present, is consulted first.
    pub fn resolve(
        &self,
        error: &SpiceError,
        node_id: Option<&str>,
        tenant_id: Option<&str>,
        retry_hint: Option<&crate::error::RetryHint>,
    ) -> RetryPolicy {
        // 1. error-embedded hint.
        if let Some(hint) = retry_hint {
            if hint.skip_retry {
                return RetryPolicy::no_retry_profile();
            }
            if let Some(max_attempts) = hint.max_attempts {
                return self.default_policy.clone().with_max_attempts(max_attempts);
            }
        }

        // 2. custom resolvers, in registration order.
        for resolver in &self.custom_resolvers {
            if let Some(policy) = resolver(error, node_id, tenant_id) {
                return policy;
            }
        }

        // 3. policy keyed by error code.
        if let Some(policy) = self.by_error_code.get(error.code()) {
            return policy.clone();
        }

        // 4. policy keyed by node id.
        if let Some(node_id) = node_id {
            if let Some(policy) = self.by_node_id.get(node_id) {
                return policy.clone();
            }
        }

        // 5. policy keyed by tenant id.
        if let Some(tenant_id) = tenant_id {
            if let Some(policy) = self.by_tenant_id.get(tenant_id) {
                return policy.clone();
            }
        }

        // 6. provided default.
        self.default_policy.clone()
    }

    /// Resolve directly from a [`RetryableError`], reading its embedded hint.
    pub fn resolve_for(
        &self,
        error: &RetryableError,
        node_id: Option<&str>,
        tenant_id: Option<&str>,
    ) -> RetryPolicy {
        self.resolve(&error.error, node_id, tenant_id, error.retry_hint.as_ref())
    }
}

impl Default for RetryPolicyResolver {
    fn default() -> Self {
        Self::new(RetryPolicy::default_profile())
    }
}
