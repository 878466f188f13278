use std::time::{Duration, Instant};

use opentelemetry::metrics::Counter;
use opentelemetry::{global, KeyValue};

use super::store::{RateWindow, WindowStore};
use crate::auth::UserId;

/// Limits for one rate limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Requests accepted per window. Zero disables the limiter.
    pub max_requests: u64,
    pub window: Duration,
}

impl RateLimitConfig {
    pub const DEFAULT_WINDOW: Duration = Duration::from_secs(15 * 60);

    /// 50 requests per 15 minutes, applied to chat routes.
    pub fn chat() -> Self {
        Self {
            max_requests: 50,
            window: Self::DEFAULT_WINDOW,
        }
    }

    /// 100 requests per 15 minutes, for other authenticated route groups.
    pub fn api() -> Self {
        Self {
            max_requests: 100,
            window: Self::DEFAULT_WINDOW,
        }
    }
}

/// Outcome of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accepted,
    Rejected { retry_after_secs: u64 },
}

impl Decision {
    #[cfg(test)]
    pub fn is_accepted(&self) -> bool {
        matches!(self, Decision::Accepted)
    }
}

/// Per-user fixed-window rate limiter.
///
/// Each user gets `max_requests` accepted requests per window. The window
/// starts with the user's first request and is reset by the first request
/// arriving after it expires; rejected requests are not counted.
#[derive(Clone)]
pub struct RateLimiter {
    name: &'static str,
    config: RateLimitConfig,
    store: WindowStore,
    decisions: Counter<u64>,
}

impl RateLimiter {
    pub fn new(name: &'static str, config: RateLimitConfig) -> Self {
        let decisions = global::meter("colloquy-server")
            .u64_counter("rate_limit.decisions")
            .with_description("Rate limit checks by limiter and outcome")
            .build();

        Self {
            name,
            config,
            store: WindowStore::new(),
            decisions,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The store holding this limiter's windows, for the reaper and metrics.
    pub fn store(&self) -> &WindowStore {
        &self.store
    }

    pub fn check(&self, user: &UserId) -> Decision {
        self.check_at(user, Instant::now())
    }

    /// Check and record a request from `user` arriving at `now`.
    pub fn check_at(&self, user: &UserId, now: Instant) -> Decision {
        let RateLimitConfig {
            max_requests,
            window,
        } = self.config;

        if max_requests == 0 {
            return Decision::Accepted;
        }

        let decision = self.store.update(
            user,
            || RateWindow::fresh(now, window),
            |entry| {
                if entry.is_expired(now) {
                    *entry = RateWindow::fresh(now, window);
                }

                if entry.count >= max_requests {
                    let wait = entry.reset_at.saturating_duration_since(now);
                    Decision::Rejected {
                        retry_after_secs: retry_after_secs(wait),
                    }
                } else {
                    entry.count += 1;
                    Decision::Accepted
                }
            },
        );

        let outcome = match decision {
            Decision::Accepted => "accepted",
            Decision::Rejected { retry_after_secs } => {
                tracing::debug!(
                    limiter = self.name,
                    user_id = %user,
                    retry_after_secs,
                    "rate limit exceeded"
                );
                "rejected"
            }
        };
        self.decisions.add(
            1,
            &[
                KeyValue::new("limiter", self.name),
                KeyValue::new("outcome", outcome),
            ],
        );

        decision
    }
}

/// Whole seconds until `wait` has elapsed, rounded up.
fn retry_after_secs(wait: Duration) -> u64 {
    let millis = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX);
    millis.div_ceil(1000)
}
