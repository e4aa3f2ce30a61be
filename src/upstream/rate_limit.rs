// =============================================================================
// Request Budget: keeps the provider client under its per-minute quota
// =============================================================================
//
// Public market-data tiers allow a fixed number of calls per minute and answer
// 429 with a `Retry-After` header once exceeded. The tracker counts requests in
// a rolling one-minute window and, after a 429, blocks every call until the
// cooldown elapses. Blocked calls fail fast instead of waiting: retry policy
// belongs to the caller.
//
// All counters are atomics so any task may query them lock-free.
// =============================================================================

use serde::Serialize;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use tracing::{debug, warn};

/// Length of the counting window.
const WINDOW_MS: i64 = 60_000;
/// Cooldown applied after a 429 that carries no usable `Retry-After`.
const DEFAULT_COOLDOWN_MS: i64 = 60_000;

/// Why a request was refused locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetDenied {
    /// The provider asked us to back off; `wait_ms` remain.
    CoolingDown { wait_ms: i64 },
    /// The per-minute budget is spent; the window rolls over in `wait_ms`.
    Exhausted { wait_ms: i64 },
}

/// Immutable snapshot of the budget state.
#[derive(Debug, Clone, Serialize)]
pub struct BudgetSnapshot {
    pub requests_in_window: u32,
    pub budget_per_minute: u32,
    pub cooldown_until_ms: i64,
}

pub struct RequestBudget {
    /// Zero disables the per-minute cap (cooldowns still apply).
    budget_per_minute: u32,
    window_start_ms: AtomicI64,
    requests_in_window: AtomicU32,
    cooldown_until_ms: AtomicI64,
}

impl RequestBudget {
    pub fn new(budget_per_minute: u32) -> Self {
        Self {
            budget_per_minute,
            window_start_ms: AtomicI64::new(0),
            requests_in_window: AtomicU32::new(0),
            cooldown_until_ms: AtomicI64::new(0),
        }
    }

    // -------------------------------------------------------------------------
    // Pre-flight
    // -------------------------------------------------------------------------

    /// Reserve one request slot at `now_ms`.
    pub fn try_acquire(&self, now_ms: i64) -> Result<(), BudgetDenied> {
        let cooldown_until = self.cooldown_until_ms.load(Ordering::Relaxed);
        if now_ms < cooldown_until {
            return Err(BudgetDenied::CoolingDown {
                wait_ms: cooldown_until - now_ms,
            });
        }

        let window_start = self.window_start_ms.load(Ordering::Relaxed);
        if now_ms - window_start >= WINDOW_MS
            && self
                .window_start_ms
                .compare_exchange(window_start, now_ms, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
        {
            self.requests_in_window.store(0, Ordering::Relaxed);
            debug!(window_start_ms = now_ms, "request budget window rolled over");
        }

        if self.budget_per_minute == 0 {
            self.requests_in_window.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        let used = self.requests_in_window.fetch_add(1, Ordering::Relaxed) + 1;
        if used > self.budget_per_minute {
            self.requests_in_window.fetch_sub(1, Ordering::Relaxed);
            let window_start = self.window_start_ms.load(Ordering::Relaxed);
            let wait_ms = (window_start + WINDOW_MS - now_ms).max(0);
            warn!(
                used = used - 1,
                budget = self.budget_per_minute,
                wait_ms,
                "request blocked: per-minute budget spent"
            );
            return Err(BudgetDenied::Exhausted { wait_ms });
        }

        Ok(())
    }

    // -------------------------------------------------------------------------
    // Provider feedback
    // -------------------------------------------------------------------------

    /// Record a 429 answer. `retry_after` is the raw `Retry-After` header, in
    /// seconds.
    pub fn record_rate_limited(&self, retry_after: Option<&str>, now_ms: i64) {
        let cooldown_ms = retry_after
            .and_then(|s| s.trim().parse::<i64>().ok())
            .filter(|secs| *secs >= 0)
            .map(|secs| secs * 1000)
            .unwrap_or(DEFAULT_COOLDOWN_MS);

        let until = now_ms + cooldown_ms;
        self.cooldown_until_ms.fetch_max(until, Ordering::Relaxed);
        warn!(cooldown_ms, until_ms = until, "provider rate limit hit, cooling down");
    }

    pub fn snapshot(&self) -> BudgetSnapshot {
        BudgetSnapshot {
            requests_in_window: self.requests_in_window.load(Ordering::Relaxed),
            budget_per_minute: self.budget_per_minute,
            cooldown_until_ms: self.cooldown_until_ms.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for RequestBudget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestBudget")
            .field("budget_per_minute", &self.budget_per_minute)
            .field(
                "requests_in_window",
                &self.requests_in_window.load(Ordering::Relaxed),
            )
            .field(
                "cooldown_until_ms",
                &self.cooldown_until_ms.load(Ordering::Relaxed),
            )
            .finish()
    }
}
