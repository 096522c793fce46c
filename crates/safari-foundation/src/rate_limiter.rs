//! Fixed-window rate limiting per logical operation.
//!
//! The first call for an operation opens a window; calls are counted until
//! the window elapses, then counting restarts from zero. A rejected call is
//! not counted.

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use safari_kernel::config::{RateLimitRule, RateLimitSettings};
use safari_kernel::{Clock, DetectResult, DetectionError, SystemClock};

struct RateWindow {
    count: u32,
    window_start_ms: u64,
    rule: RateLimitRule,
}

impl RateWindow {
    fn period_ms(&self) -> u64 {
        self.rule.period.saturating_mul(1000)
    }

    fn elapsed(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.window_start_ms) >= self.period_ms()
    }

    fn resets_in_ms(&self, now_ms: u64) -> u64 {
        (self.window_start_ms + self.period_ms()).saturating_sub(now_ms)
    }
}

/// Rate limit check result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitResult {
    Allowed {
        /// Remaining calls in the current window
        remaining: u32,
        resets_in_ms: u64,
    },
    Exceeded {
        limit: u32,
        period_secs: u64,
        retry_after_ms: u64,
    },
}

impl RateLimitResult {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitResult::Allowed { .. })
    }

    pub fn remaining(&self) -> Option<u32> {
        match self {
            RateLimitResult::Allowed { remaining, .. } => Some(*remaining),
            RateLimitResult::Exceeded { .. } => None,
        }
    }
}

/// Non-mutating view of an operation's window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitStatus {
    pub operation: String,
    pub limit: u32,
    pub remaining: u32,
    pub resets_in_ms: u64,
}

/// Process-wide limiter; one window per operation name.
pub struct RateLimiter {
    windows: DashMap<String, RateWindow>,
    settings: RateLimitSettings,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(settings: RateLimitSettings) -> Self {
        Self::with_clock(settings, Arc::new(SystemClock))
    }

    pub fn with_clock(settings: RateLimitSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: DashMap::new(),
            settings,
            clock,
        }
    }

    pub fn rule_for(&self, operation: &str) -> RateLimitRule {
        self.settings.rule_for(operation)
    }

    /// Count one call against `operation` if the window has room.
    pub fn check(&self, operation: &str) -> RateLimitResult {
        let now = self.clock.now_millis();
        let rule = self.settings.rule_for(operation);

        let mut window = self
            .windows
            .entry(operation.to_string())
            .or_insert_with(|| RateWindow {
                count: 0,
                window_start_ms: now,
                rule,
            });

        if window.elapsed(now) {
            window.count = 0;
            window.window_start_ms = now;
            window.rule = rule;
        }

        if window.count >= window.rule.requests {
            debug!(operation, limit = window.rule.requests, "rate limit exceeded");
            return RateLimitResult::Exceeded {
                limit: window.rule.requests,
                period_secs: window.rule.period,
                retry_after_ms: window.resets_in_ms(now),
            };
        }

        window.count += 1;
        RateLimitResult::Allowed {
            remaining: window.rule.requests - window.count,
            resets_in_ms: window.resets_in_ms(now),
        }
    }

    /// [`check`](Self::check) mapped onto the error taxonomy.
    pub fn acquire(&self, operation: &str) -> DetectResult<u32> {
        match self.check(operation) {
            RateLimitResult::Allowed { remaining, .. } => Ok(remaining),
            RateLimitResult::Exceeded {
                limit,
                period_secs,
                retry_after_ms,
            } => Err(DetectionError::RateLimitExceeded {
                operation: operation.to_string(),
                limit,
                period_secs,
                retry_after_ms,
            }),
        }
    }

    /// Current window state without counting a call.
    pub fn status(&self, operation: &str) -> RateLimitStatus {
        self.prune_stale();
        let now = self.clock.now_millis();
        let rule = self.settings.rule_for(operation);
        match self.windows.get(operation) {
            Some(window) if !window.elapsed(now) => RateLimitStatus {
                operation: operation.to_string(),
                limit: window.rule.requests,
                remaining: window.rule.requests.saturating_sub(window.count),
                resets_in_ms: window.resets_in_ms(now),
            },
            _ => RateLimitStatus {
                operation: operation.to_string(),
                limit: rule.requests,
                remaining: rule.requests,
                resets_in_ms: rule.period.saturating_mul(1000),
            },
        }
    }

    /// Forget the window of `operation` (admin operation).
    pub fn reset(&self, operation: &str) -> bool {
        let removed = self.windows.remove(operation).is_some();
        self.prune_stale();
        removed
    }

    /// Operations with a live window; stale windows are dropped first.
    pub fn tracked_operations(&self) -> Vec<String> {
        self.prune_stale();
        self.windows.iter().map(|e| e.key().clone()).collect()
    }

    /// Drop windows idle for more than two periods.
    fn prune_stale(&self) {
        let now = self.clock.now_millis();
        let before = self.windows.len();
        self.windows
            .retain(|_, w| now.saturating_sub(w.window_start_ms) < w.period_ms().saturating_mul(2));
        let pruned = before.saturating_sub(self.windows.len());
        if pruned > 0 {
            debug!(pruned, "dropped stale rate windows");
        }
    }
}
