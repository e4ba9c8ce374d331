//! Kernel configuration.
//!
//! ## Environment Variables
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `OBLIGATION_BIND_ACTOR` | `true` | Include actor text in Core Identity |
//! | `OBLIGATION_BIND_ACTION` | `true` | Include action/object text in Core Identity |
//! | `OBLIGATION_LOCK_TIMEOUT_MS` | `250` | Max wait for a document write lock |
//! | `OBLIGATION_RETRY_MAX_ATTEMPTS` | `5` | Append attempts under contention |
//! | `OBLIGATION_RETRY_BASE_MS` | `10` | First retry delay |
//! | `OBLIGATION_RETRY_MAX_MS` | `500` | Largest retry delay |
//!
//! Configuration is read once by the host and passed down explicitly. The
//! identity flags in particular are never read from ambient state by the
//! identity engine.

use std::time::Duration;

use crate::ledger::RetryPolicy;
use crate::types::IdentityFlags;

/// Ledger tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    /// How long an append waits for the per-document lock.
    pub lock_timeout: Duration,
    /// Retry policy for contended appends.
    pub retry: RetryPolicy,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_millis(250),
            retry: RetryPolicy::default(),
        }
    }
}

/// Complete kernel configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KernelConfig {
    /// Flags used when identifying atoms at ingestion.
    pub identity: IdentityFlags,
    /// Ledger tuning.
    pub ledger: LedgerConfig,
}

impl KernelConfig {
    /// Create configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let flag = |key: &str, default: bool| {
            lookup(key)
                .and_then(|v| parse_bool(&v))
                .unwrap_or(default)
        };
        let millis = |key: &str, default: Duration| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(default)
        };

        Self {
            identity: IdentityFlags::new(
                flag("OBLIGATION_BIND_ACTOR", defaults.identity.bind_actor),
                flag("OBLIGATION_BIND_ACTION", defaults.identity.bind_action),
            ),
            ledger: LedgerConfig {
                lock_timeout: millis("OBLIGATION_LOCK_TIMEOUT_MS", defaults.ledger.lock_timeout),
                retry: RetryPolicy {
                    max_attempts: lookup("OBLIGATION_RETRY_MAX_ATTEMPTS")
                        .and_then(|v| v.trim().parse().ok())
                        .unwrap_or(defaults.ledger.retry.max_attempts),
                    base_backoff: millis("OBLIGATION_RETRY_BASE_MS", defaults.ledger.retry.base_backoff),
                    max_backoff: millis("OBLIGATION_RETRY_MAX_MS", defaults.ledger.retry.max_backoff),
                },
            },
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
