//! In-process fixed-window rate limiter keyed by an opaque client identifier.

use std::{
    sync::{
        Arc,
        atomic::{AtomicI64, Ordering},
    },
    time::Duration,
};

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::{DashMap, mapref::entry::Entry};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::interval;
use tracing::{debug, info};
use ts_rs::TS;

/// Replaced by the number of seconds until the window resets
pub const RETRY_AFTER_PLACEHOLDER: &str = "{retry_after}";

pub const DEFAULT_MESSAGE: &str = "Rate limit exceeded. Try again in {retry_after} seconds.";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RateLimitConfigError {
    #[error("rate limit window must be positive")]
    ZeroWindow,
    #[error("rate limit max_requests must be positive")]
    ZeroMaxRequests,
    #[error("rate limit window out of range: {0:?}")]
    WindowOutOfRange(Duration),
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub window: Duration,
    pub max_requests: u32,
    /// Rejection message, may contain [`RETRY_AFTER_PLACEHOLDER`]
    pub message: String,
}

impl RateLimitConfig {
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Self {
            window,
            max_requests,
            message: DEFAULT_MESSAGE.to_string(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// 100 requests per 15 minutes, applied to every route
    pub fn general() -> Self {
        Self::new(Duration::from_secs(15 * 60), 100).with_message(
            "Rate limit exceeded. Please slow down your requests and try again in {retry_after} seconds.",
        )
    }

    /// 30 requests per minute, applied to mutating routes
    pub fn api() -> Self {
        Self::new(Duration::from_secs(60), 30).with_message(
            "API rate limit exceeded. Please try again in {retry_after} seconds.",
        )
    }
}

/// Outcome of a single [`RateLimiter::check`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
    pub error: Option<String>,
}

impl RateLimitDecision {
    /// Whole seconds until the window resets, rounded up
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> u64 {
        retry_after_secs(self.reset_at, now)
    }
}

/// Read-only view of an identifier's live window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
pub struct RateLimitStatus {
    pub count: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
struct WindowEntry {
    count: u32,
    reset_at: DateTime<Utc>,
}

impl WindowEntry {
    fn open(now: DateTime<Utc>, window: TimeDelta) -> Self {
        Self {
            count: 1,
            reset_at: now
                .checked_add_signed(window)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.reset_at
    }
}

/// A rejected request is still inside its window, so this is never below 1
fn retry_after_secs(reset_at: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let millis = (reset_at - now).num_milliseconds().max(0) as u64;
    millis.div_ceil(1000).max(1)
}

/// Shared rate limiter. Cloning is cheap and clones share the same counters.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    inner: Arc<RateLimiterInner>,
}

#[derive(Debug)]
struct RateLimiterInner {
    window: TimeDelta,
    max_requests: u32,
    message: String,
    entries: DashMap<String, WindowEntry>,
    /// Unix millis after which the next `check` sweeps expired entries
    next_sweep_ms: AtomicI64,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Result<Self, RateLimitConfigError> {
        if config.window.is_zero() {
            return Err(RateLimitConfigError::ZeroWindow);
        }
        if config.max_requests == 0 {
            return Err(RateLimitConfigError::ZeroMaxRequests);
        }
        let window = TimeDelta::from_std(config.window)
            .map_err(|_| RateLimitConfigError::WindowOutOfRange(config.window))?;
        if window.num_milliseconds() < 1 {
            return Err(RateLimitConfigError::ZeroWindow);
        }
        // Every reset_at must stay a representable timestamp
        if Utc::now().checked_add_signed(window).is_none() {
            return Err(RateLimitConfigError::WindowOutOfRange(config.window));
        }

        Ok(Self {
            inner: Arc::new(RateLimiterInner {
                window,
                max_requests: config.max_requests,
                message: config.message,
                entries: DashMap::new(),
                next_sweep_ms: AtomicI64::new(i64::MIN),
            }),
        })
    }

    pub fn limit(&self) -> u32 {
        self.inner.max_requests
    }

    pub fn window(&self) -> TimeDelta {
        self.inner.window
    }

    /// Number of identifiers currently holding an entry (live or not yet swept)
    pub fn tracked_identifiers(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn check(&self, identifier: &str) -> RateLimitDecision {
        self.check_at(identifier, Utc::now())
    }

    /// [`check`](Self::check) against an explicit clock.
    ///
    /// The whole read-modify-write happens while holding the entry's shard
    /// lock, so concurrent callers can never admit more than `max_requests`.
    pub fn check_at(&self, identifier: &str, now: DateTime<Utc>) -> RateLimitDecision {
        self.maybe_sweep(now);

        let inner = &self.inner;
        match inner.entries.entry(identifier.to_owned()) {
            Entry::Vacant(vacant) => {
                let entry = WindowEntry::open(now, inner.window);
                vacant.insert(entry);
                self.admitted(entry)
            }
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if entry.is_expired(now) {
                    *entry = WindowEntry::open(now, inner.window);
                    self.admitted(*entry)
                } else if entry.count >= inner.max_requests {
                    let reset_at = entry.reset_at;
                    drop(occupied);
                    self.rejected(identifier, reset_at, now)
                } else {
                    entry.count += 1;
                    self.admitted(*entry)
                }
            }
        }
    }

    /// Drop the identifier's window (administrative override)
    pub fn reset(&self, identifier: &str) {
        if self.inner.entries.remove(identifier).is_some() {
            info!(identifier = %identifier, "Rate limiter: window reset");
        }
    }

    pub fn status(&self, identifier: &str) -> Option<RateLimitStatus> {
        self.status_at(identifier, Utc::now())
    }

    /// Snapshot of the identifier's window; expired windows read as absent
    pub fn status_at(&self, identifier: &str, now: DateTime<Utc>) -> Option<RateLimitStatus> {
        let entry = *self.inner.entries.get(identifier)?;
        if entry.is_expired(now) {
            return None;
        }
        Some(RateLimitStatus {
            count: entry.count,
            remaining: self.inner.max_requests.saturating_sub(entry.count),
            reset_at: entry.reset_at,
        })
    }

    /// Remove every expired window, returning how many were dropped
    pub fn cleanup_at(&self, now: DateTime<Utc>) -> usize {
        let before = self.inner.entries.len();
        self.inner.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before.saturating_sub(self.inner.entries.len());
        if removed > 0 {
            debug!(removed, "Rate limiter: swept expired windows");
        }
        removed
    }

    /// Spawn a background sweeper bounding memory under many distinct identifiers
    pub fn spawn_cleanup(&self, period: Duration) -> tokio::task::JoinHandle<()> {
        let limiter = self.clone();
        tokio::spawn(async move {
            info!("Starting rate limit sweeper with interval {:?}", period);
            let mut interval = interval(period);
            loop {
                interval.tick().await;
                limiter.cleanup_at(Utc::now());
            }
        })
    }

    /// Lazy sweep, at most once per window across all callers
    fn maybe_sweep(&self, now: DateTime<Utc>) {
        let now_ms = now.timestamp_millis();
        let due = self.inner.next_sweep_ms.load(Ordering::Acquire);
        if now_ms < due {
            return;
        }
        let next = now_ms.saturating_add(self.inner.window.num_milliseconds());
        if self
            .inner
            .next_sweep_ms
            .compare_exchange(due, next, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.cleanup_at(now);
        }
    }

    fn admitted(&self, entry: WindowEntry) -> RateLimitDecision {
        RateLimitDecision {
            allowed: true,
            limit: self.inner.max_requests,
            remaining: self.inner.max_requests - entry.count,
            reset_at: entry.reset_at,
            error: None,
        }
    }

    fn rejected(
        &self,
        identifier: &str,
        reset_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> RateLimitDecision {
        let retry_after = retry_after_secs(reset_at, now);
        debug!(
            identifier = %identifier,
            retry_after,
            "Rate limiter: request rejected"
        );
        RateLimitDecision {
            allowed: false,
            limit: self.inner.max_requests,
            remaining: 0,
            reset_at,
            error: Some(
                self.inner
                    .message
                    .replace(RETRY_AFTER_PLACEHOLDER, &retry_after.to_string()),
            ),
        }
    }
}
