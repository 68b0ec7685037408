//! BackoffConfig - Reconnection delay policy
//!
//! Exponential growth capped at a ceiling, with *full jitter*: the delay for
//! attempt `n` (0-indexed) is drawn uniformly from
//! `[0, min(max_delay, base_delay * 2^n))`.
//!
//! ```text
//! Attempt    Ceiling (base=1s, cap=30s)    Drawn from
//! ───────────────────────────────────────────────────
//!    0                1s                    [0, 1s)
//!    1                2s                    [0, 2s)
//!    2                4s                    [0, 4s)
//!    3                8s                    [0, 8s)
//!    4               16s                    [0, 16s)
//!   >=5              30s                    [0, 30s)
//! ```

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Default base delay in milliseconds
pub const DEFAULT_BASE_DELAY_MS: u64 = 1_000;

/// Default delay cap in milliseconds
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;

/// Reconnection backoff policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Ceiling for attempt 0, doubled per attempt (default: 1000)
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    /// Upper bound for any ceiling (default: 30000)
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Failed attempts tolerated before giving up (default: unbounded)
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

fn default_base_delay() -> u64 {
    DEFAULT_BASE_DELAY_MS
}

fn default_max_delay() -> u64 {
    DEFAULT_MAX_DELAY_MS
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            max_attempts: None,
        }
    }
}

impl fmt::Display for BackoffConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max_attempts {
            Some(max) => write!(
                f,
                "BackoffConfig(base_delay={}ms, max_delay={}ms, max_attempts={})",
                self.base_delay_ms, self.max_delay_ms, max
            ),
            None => write!(
                f,
                "BackoffConfig(base_delay={}ms, max_delay={}ms, max_attempts=unbounded)",
                self.base_delay_ms, self.max_delay_ms
            ),
        }
    }
}

impl BackoffConfig {
    pub fn new(base_delay_ms: u64, max_delay_ms: u64, max_attempts: Option<u32>) -> Self {
        Self {
            base_delay_ms,
            max_delay_ms,
            max_attempts,
        }
    }

    /// Exclusive upper bound of the delay for `attempt`:
    /// `min(max_delay, base_delay * 2^attempt)`.
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let growth = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let raw = self.base_delay_ms.saturating_mul(growth);
        Duration::from_millis(raw.min(self.max_delay_ms))
    }

    /// Random delay for `attempt`, uniform in `[0, ceiling(attempt))`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let ceiling_ms = self.ceiling(attempt).as_millis() as u64;
        if ceiling_ms == 0 {
            return Duration::ZERO;
        }
        let mut rng = rand::thread_rng();
        Duration::from_millis(rng.gen_range(0..ceiling_ms))
    }

    /// Whether another attempt may be scheduled after `failed_attempts` failures.
    pub fn can_retry(&self, failed_attempts: u32) -> bool {
        self.max_attempts.is_none_or(|max| failed_attempts < max)
    }
}
