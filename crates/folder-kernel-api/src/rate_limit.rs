//! Sliding-window quotas for expensive operations.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::RateLimitConfig;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Upload,
    FolderOperation,
    Export,
    Import,
}

impl OperationKind {
    pub const ALL: [OperationKind; 4] =
        [OperationKind::Upload, OperationKind::FolderOperation, OperationKind::Export, OperationKind::Import];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Upload => "upload",
            Self::FolderOperation => "folder_operation",
            Self::Export => "export",
            Self::Import => "import",
        }
    }
}

/// At most `max_requests` calls within any `window_seconds` window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
pub struct Quota {
    pub max_requests: usize,
    pub window_seconds: u64,
}

impl Quota {
    #[must_use]
    pub const fn new(max_requests: usize, window_seconds: u64) -> Self {
        Self { max_requests, window_seconds }
    }

    #[must_use]
    pub fn window(self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }
}

#[derive(Debug, Clone, Copy, thiserror::Error, Eq, PartialEq)]
#[error("rate limit exceeded for {}; retry after {}s", .kind.as_str(), .retry_after.as_secs().max(1))]
pub struct RateLimited {
    pub kind: OperationKind,
    pub retry_after: Duration,
}

#[derive(Debug)]
pub struct RateLimiter {
    quotas: HashMap<OperationKind, Quota>,
    calls: Mutex<HashMap<OperationKind, VecDeque<Instant>>>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(config: &RateLimitConfig) -> Self {
        let quotas = OperationKind::ALL.into_iter().map(|kind| (kind, config.quota(kind))).collect();
        Self { quotas, calls: Mutex::new(HashMap::new()) }
    }

    /// Admit and record one call of `kind`, or refuse with a retry hint.
    ///
    /// # Errors
    /// Returns [`RateLimited`] when the quota for `kind` is used up.
    pub fn check(&self, kind: OperationKind) -> Result<(), RateLimited> {
        self.check_at(kind, Instant::now())
    }

    /// [`Self::check`] against an explicit clock reading.
    ///
    /// # Errors
    /// Returns [`RateLimited`] when the quota for `kind` is used up at `now`.
    pub fn check_at(&self, kind: OperationKind, now: Instant) -> Result<(), RateLimited> {
        let Some(quota) = self.quotas.get(&kind).copied() else {
            return Ok(());
        };
        let mut calls = self.calls.lock();
        let window = calls.entry(kind).or_default();
        evict_expired(window, quota.window(), now);

        if window.len() >= quota.max_requests {
            let retry_after = window
                .front()
                .map_or(quota.window(), |oldest| (*oldest + quota.window()).saturating_duration_since(now));
            tracing::warn!(kind = kind.as_str(), retry_after_secs = retry_after.as_secs(), "rate limit tripped");
            return Err(RateLimited { kind, retry_after });
        }
        window.push_back(now);
        Ok(())
    }

    /// Calls of `kind` still inside the current window.
    #[must_use]
    pub fn in_window(&self, kind: OperationKind) -> usize {
        self.calls.lock().get(&kind).map_or(0, VecDeque::len)
    }

    /// Drop expired call timestamps for every kind.
    pub fn cleanup(&self) {
        self.cleanup_at(Instant::now());
    }

    pub fn cleanup_at(&self, now: Instant) {
        let mut calls = self.calls.lock();
        for (kind, window) in calls.iter_mut() {
            if let Some(quota) = self.quotas.get(kind) {
                evict_expired(window, quota.window(), now);
            }
        }
        calls.retain(|_, window| !window.is_empty());
    }
}

fn evict_expired(window: &mut VecDeque<Instant>, span: Duration, now: Instant) {
    while window.front().is_some_and(|oldest| now.saturating_duration_since(*oldest) >= span) {
        window.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refuses_beyond_quota_with_retry_hint() {
        let limiter = RateLimiter::new(&RateLimitConfig::default());
        let start = Instant::now();
        for offset in 0..3 {
            assert!(limiter.check_at(OperationKind::Import, start + Duration::from_secs(offset)).is_ok());
        }
        let refused = limiter.check_at(OperationKind::Import, start + Duration::from_secs(10));
        assert_eq!(
            refused,
            Err(RateLimited { kind: OperationKind::Import, retry_after: Duration::from_secs(590) })
        );
        assert!(limiter.check_at(OperationKind::Export, start).is_ok());
    }

    #[test]
    fn window_slides_and_cleanup_forgets_old_calls() {
        let limiter = RateLimiter::new(&RateLimitConfig::default());
        let start = Instant::now();
        for _ in 0..5 {
            assert!(limiter.check_at(OperationKind::Export, start).is_ok());
        }
        assert!(limiter.check_at(OperationKind::Export, start + Duration::from_secs(299)).is_err());
        assert!(limiter.check_at(OperationKind::Export, start + Duration::from_secs(300)).is_ok());

        limiter.cleanup_at(start + Duration::from_secs(10_000));
        assert_eq!(limiter.in_window(OperationKind::Export), 0);
    }
}
