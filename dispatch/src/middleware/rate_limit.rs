//! Sliding-window rate limiting per caller.
//!
//! Callers are bucketed by [`TaskContext::caller_key`]. A request is admitted
//! while fewer than `max_requests` admitted requests fall inside the trailing
//! window; otherwise it is rejected immediately with a non-retryable
//! `RateLimit` error (retrying inside the same request would not help).
//!
//! Fallback invocations are not counted: the request already took its slot
//! when the primary agent was invoked.
//!
//! [`TaskContext::caller_key`]: crate::types::TaskContext::caller_key

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::warn;

use super::{BeforeOutcome, Invocation, Middleware};
use crate::error::{DispatchError, DispatchResult};

pub struct RateLimitMiddleware {
    max_requests: u32,
    window: Duration,
    windows: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimitMiddleware {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Record a request for `key` if the window has room.
    pub fn try_acquire(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        // Drop idle buckets so one-off callers do not accumulate.
        windows.retain(|_, stamps| {
            while stamps
                .front()
                .is_some_and(|t| now.duration_since(*t) >= self.window)
            {
                stamps.pop_front();
            }
            !stamps.is_empty()
        });
        let stamps = windows.entry(key.to_string()).or_default();
        if stamps.len() < self.max_requests as usize {
            stamps.push_back(now);
            true
        } else {
            false
        }
    }

    /// Admitted requests currently inside the window for `key`.
    pub fn in_window(&self, key: &str) -> usize {
        let now = Instant::now();
        let windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        windows
            .get(key)
            .map(|stamps| {
                stamps
                    .iter()
                    .filter(|t| now.duration_since(**t) < self.window)
                    .count()
            })
            .unwrap_or(0)
    }
}

#[async_trait]
impl Middleware for RateLimitMiddleware {
    fn name(&self) -> &str {
        "rate_limit"
    }

    fn priority(&self) -> i32 {
        20
    }

    async fn before(&self, invocation: &mut Invocation) -> DispatchResult<BeforeOutcome> {
        if invocation.fallback {
            return Ok(BeforeOutcome::Continue);
        }
        let key = invocation.task.context.caller_key();
        if self.try_acquire(&key) {
            return Ok(BeforeOutcome::Continue);
        }
        warn!(caller = %key, limit = self.max_requests, "Rate limit exceeded");
        Err(DispatchError::rate_limit(format!(
            "more than {} requests per {}s for '{key}'",
            self.max_requests,
            self.window.as_secs()
        ))
        .with_retryable(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::types::{Task, TaskContext};

    #[tokio::test(start_paused = true)]
    async fn test_window_slides() {
        let limiter = RateLimitMiddleware::new(2, Duration::from_secs(10));
        assert!(limiter.try_acquire("u"));
        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(limiter.try_acquire("u"));
        assert!(!limiter.try_acquire("u"));
        assert!(limiter.try_acquire("other"));

        // First stamp leaves the window; the second is still inside.
        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(limiter.in_window("u"), 1);
        assert!(limiter.try_acquire("u"));
        assert!(!limiter.try_acquire("u"));
    }

    #[tokio::test]
    async fn test_rejection_is_not_retryable() {
        let limiter = RateLimitMiddleware::new(1, Duration::from_secs(60));
        let ctx = TaskContext::new().user("u1").channel("web");
        let mut first = Invocation::new("a", Task::new("chat", "hi", ctx.clone()));
        let mut second = Invocation::new("a", Task::new("chat", "hi", ctx));
        assert!(limiter.before(&mut first).await.is_ok());

        let err = limiter.before(&mut second).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RateLimit);
        assert!(!err.is_retryable());
        assert!(err.message().contains("web:u1"));
    }

    #[tokio::test]
    async fn test_fallback_does_not_take_a_slot() {
        let limiter = RateLimitMiddleware::new(1, Duration::from_secs(60));
        let ctx = TaskContext::new().user("u1").channel("web");
        let mut primary = Invocation::new("qa", Task::new("question", "hi", ctx.clone()));
        let mut fallback =
            Invocation::new("general", Task::new("question", "hi", ctx.clone())).as_fallback();
        assert!(limiter.before(&mut primary).await.is_ok());
        assert_eq!(
            limiter.before(&mut fallback).await.unwrap(),
            BeforeOutcome::Continue
        );
        assert_eq!(limiter.in_window("web:u1"), 1);

        let mut next = Invocation::new("qa", Task::new("question", "again", ctx));
        assert!(limiter.before(&mut next).await.is_err());
    }
}
