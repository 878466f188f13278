//! Per-user fixed-window rate limiting.
//!
//! [`RateLimiter`] makes the accept/reject decision against its own
//! window store; [`Reaper`] periodically drops windows that have expired.
//! The axum adapter lives in [`crate::middleware::rate_limit`].

mod limiter;
mod reaper;
mod store;

pub use limiter::{Decision, RateLimitConfig, RateLimiter};
pub use reaper::Reaper;
