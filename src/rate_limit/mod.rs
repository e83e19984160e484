//! Per-caller request throttling.
//!
//! Fixed-window counting: time is cut into epoch-aligned windows `[start, start + W)`
//! and each caller key may be admitted at most `limit` times per window. An optional
//! burst window (shorter, tighter) runs alongside the primary one and both must have
//! room for a request to be admitted. A throttled request consumes nothing.
//!
//! # Concurrency
//!
//! State is a map from caller key to a per-key `Mutex<KeyState>`, itself behind a
//! `RwLock`. Admission for a known key holds the map lock shared and the key's mutex
//! exclusively, so the read/compare/increment is atomic per key while unrelated keys
//! proceed in parallel. Only first-sight insertion and eviction take the map lock
//! exclusively, which also means eviction can never race an in-flight admission.
//!
//! # Memory
//!
//! Every `cleanup_interval` checks the limiter drops keys whose windows have fully
//! elapsed and that have been idle for `idle_windows` primary windows. A key in the
//! middle of a window is never dropped, so eviction cannot reset a live counter.

pub mod middleware;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;

pub use middleware::RateLimit;

/// One counting window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPolicy {
    /// Requests admitted per window.
    pub limit: u32,
    /// Window length.
    pub window: Duration,
}

/// Configuration for the rate limiter.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub primary: WindowPolicy,
    /// Optional short window that catches bursts the primary window averages away.
    pub burst: Option<WindowPolicy>,
    /// Idle primary windows after which a key may be evicted.
    pub idle_windows: u32,
    /// Run eviction every N checks.
    pub cleanup_interval: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            primary: WindowPolicy {
                limit: 60,
                window: Duration::from_secs(60),
            },
            burst: None,
            idle_windows: 3,
            cleanup_interval: 100,
        }
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted {
        limit: u32,
        /// Requests left in the current primary window.
        remaining: u32,
        /// Time until the primary window rolls over.
        reset_after: Duration,
        /// Unix time, in whole seconds, at which the primary window rolls over.
        reset_at: i64,
    },
    Throttled {
        retry_after: Duration,
    },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted { .. })
    }
}

/// Whole seconds, rounded up, never zero. Used for `Retry-After` style hints.
pub fn whole_seconds_ceil(d: Duration) -> u64 {
    let millis = d.as_millis() as u64;
    ((millis + 999) / 1000).max(1)
}

/// Exposed to the routing layer: admit or throttle a caller at the current time.
pub trait Throttle: Send + Sync {
    fn check_and_admit(&self, caller_key: &str) -> Admission;
}

#[derive(Debug, Clone, Copy)]
struct WindowState {
    start_ms: i64,
    count: u32,
}

impl WindowState {
    fn open(now_ms: i64, window_ms: i64) -> Self {
        Self {
            start_ms: now_ms.div_euclid(window_ms) * window_ms,
            count: 0,
        }
    }

    /// Moves to the window containing `now_ms` if `now_ms` is outside the current one.
    /// A clock that stepped backwards reopens the window too, so a wait never exceeds
    /// one window length.
    fn roll(&mut self, now_ms: i64, window_ms: i64) {
        if now_ms < self.start_ms || now_ms >= self.start_ms + window_ms {
            *self = Self::open(now_ms, window_ms);
        }
    }

    fn end_ms(&self, window_ms: i64) -> i64 {
        self.start_ms + window_ms
    }
}

#[derive(Debug)]
struct KeyState {
    primary: WindowState,
    burst: Option<WindowState>,
    last_seen_ms: i64,
}

fn window_ms(policy: &WindowPolicy) -> i64 {
    (policy.window.as_millis() as i64).max(1)
}

/// In-memory fixed-window rate limiter keyed by caller identity.
pub struct RateLimiter {
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
    entries: RwLock<HashMap<String, Mutex<KeyState>>>,
    checks: AtomicU64,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            entries: RwLock::new(HashMap::new()),
            checks: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Admits or throttles `caller_key` at time `now`.
    pub fn admit(&self, caller_key: &str, now: DateTime<Utc>) -> Admission {
        let checks = self.checks.fetch_add(1, Ordering::Relaxed);
        let interval = self.config.cleanup_interval;
        if checks > 0 && interval > 0 && checks % interval == 0 {
            let evicted = self.evict_idle(now);
            if evicted > 0 {
                log::debug!("rate limiter evicted {} idle keys", evicted);
            }
        }

        let now_ms = now.timestamp_millis();
        {
            let entries = self.entries.read();
            if let Some(state) = entries.get(caller_key) {
                return self.decide(caller_key, &mut state.lock(), now_ms);
            }
        }

        let mut entries = self.entries.write();
        let state = entries
            .entry(caller_key.to_owned())
            .or_insert_with(|| Mutex::new(self.fresh_state(now_ms)));
        self.decide(caller_key, state.get_mut(), now_ms)
    }

    fn fresh_state(&self, now_ms: i64) -> KeyState {
        KeyState {
            primary: WindowState::open(now_ms, window_ms(&self.config.primary)),
            burst: self
                .config
                .burst
                .as_ref()
                .map(|policy| WindowState::open(now_ms, window_ms(policy))),
            last_seen_ms: now_ms,
        }
    }

    fn decide(&self, caller_key: &str, state: &mut KeyState, now_ms: i64) -> Admission {
        let primary = &self.config.primary;
        let primary_ms = window_ms(primary);
        state.last_seen_ms = state.last_seen_ms.max(now_ms);
        state.primary.roll(now_ms, primary_ms);

        let mut wait_ms: Option<i64> = None;
        if state.primary.count >= primary.limit {
            wait_ms = Some(state.primary.end_ms(primary_ms) - now_ms);
        }

        if let (Some(policy), Some(burst)) = (self.config.burst.as_ref(), state.burst.as_mut()) {
            let burst_ms = window_ms(policy);
            burst.roll(now_ms, burst_ms);
            if burst.count >= policy.limit {
                let wait = burst.end_ms(burst_ms) - now_ms;
                wait_ms = Some(wait_ms.map_or(wait, |w| w.max(wait)));
            }
        }

        if let Some(wait) = wait_ms {
            log::warn!("rate limit exceeded for {}", caller_key);
            return Admission::Throttled {
                retry_after: Duration::from_millis(wait.max(0) as u64),
            };
        }

        state.primary.count += 1;
        if let Some(burst) = state.burst.as_mut() {
            burst.count += 1;
        }

        Admission::Admitted {
            limit: primary.limit,
            remaining: primary.limit - state.primary.count,
            reset_after: Duration::from_millis(
                (state.primary.end_ms(primary_ms) - now_ms).max(0) as u64,
            ),
            reset_at: (state.primary.end_ms(primary_ms) + 999).div_euclid(1000),
        }
    }

    /// Drops keys whose windows have all closed and that have been idle for
    /// `idle_windows` primary windows. Returns how many were removed.
    pub fn evict_idle(&self, now: DateTime<Utc>) -> usize {
        let now_ms = now.timestamp_millis();
        let primary_ms = window_ms(&self.config.primary);
        let idle_ms = primary_ms.saturating_mul(i64::from(self.config.idle_windows.max(1)));
        let burst_ms = self.config.burst.as_ref().map(window_ms);

        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, state| {
            let state = state.get_mut();
            let primary_closed = now_ms >= state.primary.end_ms(primary_ms);
            let burst_closed = match (state.burst.as_ref(), burst_ms) {
                (Some(burst), Some(ms)) => now_ms >= burst.end_ms(ms),
                _ => true,
            };
            let idle = now_ms - state.last_seen_ms >= idle_ms;
            !(primary_closed && burst_closed && idle)
        });
        before - entries.len()
    }

    /// Number of caller keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.entries.read().len()
    }
}

impl Throttle for RateLimiter {
    fn check_and_admit(&self, caller_key: &str) -> Admission {
        self.admit(caller_key, self.clock.now())
    }
}
