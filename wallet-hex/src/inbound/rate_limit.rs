//! Rate limiting middleware using Governor.
//!
//! Implements per-caller rate limiting with a token bucket algorithm.

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use governor::{
    Quota, RateLimiter,
    clock::{Clock, DefaultClock},
    state::{InMemoryState, NotKeyed},
};
use std::{num::NonZeroU32, sync::Arc, time::Duration};

use wallet_types::AppError;

use super::handlers::ApiError;

/// Paths that are never throttled.
const EXEMPT_PATHS: [&str; 2] = ["/health", "/api/gateway/callback"];

/// Rate limiter state shared across requests.
pub struct RateLimiterState {
    /// Per-caller rate limiters
    limiters: DashMap<String, Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>>,
    /// Default quota for new callers
    quota: Quota,
    clock: DefaultClock,
}

impl Default for RateLimiterState {
    fn default() -> Self {
        Self::new(100, Duration::from_secs(60))
    }
}

impl RateLimiterState {
    /// Creates a new rate limiter state.
    ///
    /// # Arguments
    /// * `requests` - Number of requests allowed per period (at least 1)
    /// * `period` - Time period for the quota
    pub fn new(requests: u32, period: Duration) -> Self {
        let burst = NonZeroU32::new(requests).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::with_period(period / burst.get())
            .map(|q| q.allow_burst(burst))
            .unwrap_or_else(|| Quota::per_minute(burst));

        Self {
            limiters: DashMap::new(),
            quota,
            clock: DefaultClock::default(),
        }
    }

    /// Takes one token for `key`.
    ///
    /// Returns the wait until the next token when the caller is throttled.
    pub fn check(&self, key: &str) -> Result<(), Duration> {
        let limiter = self
            .limiters
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(RateLimiter::direct(self.quota)))
            .clone();

        limiter
            .check()
            .map_err(|not_until| not_until.wait_time_from(self.clock.now()))
    }
}

/// Identifies the caller: first forwarded address, then the bearer token.
fn caller_key(request: &Request<Body>) -> String {
    let headers = request.headers();
    if let Some(forwarded) = headers
        .get("X-Forwarded-For")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        return forwarded.to_string();
    }

    headers
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.trim_start_matches("Bearer ").to_string())
        .unwrap_or_else(|| "anonymous".to_string())
}

/// Rate limiting middleware.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiterState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if EXEMPT_PATHS.contains(&request.uri().path()) {
        return next.run(request).await;
    }

    let key = caller_key(&request);
    if let Err(wait) = limiter.check(&key) {
        tracing::warn!(caller = %key, "Rate limit exceeded");
        let retry_after = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
        return ApiError(AppError::RateLimited {
            retry_after: retry_after.max(1),
        })
        .into_response();
    }

    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_then_throttled() {
        let state = RateLimiterState::new(3, Duration::from_secs(60));
        for _ in 0..3 {
            assert!(state.check("caller").is_ok());
        }
        let wait = state.check("caller").unwrap_err();
        assert!(wait <= Duration::from_secs(20));

        assert!(state.check("someone-else").is_ok());
    }

    #[test]
    fn test_zero_requests_still_allows_one() {
        let state = RateLimiterState::new(0, Duration::from_secs(60));
        assert!(state.check("caller").is_ok());
        assert!(state.check("caller").is_err());
    }
}
