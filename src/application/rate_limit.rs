//! Admission control for outbound calls to the chat platform and the wallet.
//!
//! Two token buckets gate every call: one bot-wide, one per conversation.
//! `check_limit` blocks until both have a token instead of rejecting, since
//! most callers are background notifications that can afford a short delay.

use crate::config::{BucketSettings, RateLimitSettings};
use crate::error::{GuardError, Result};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Which per-scope bucket a call is charged to, besides the global one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    Global,
    Conversation(String),
}

impl Scope {
    pub fn for_recipient(recipient: &str) -> Self {
        Scope::Conversation(recipient.to_string())
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Global => write!(f, "global"),
            Scope::Conversation(id) => write!(f, "conversation:{id}"),
        }
    }
}

/// Fixed-window token bucket: refilled to capacity at every interval boundary
/// counted from its creation.
#[derive(Debug)]
struct TokenBucket {
    capacity: u32,
    interval: Duration,
    tokens: u32,
    window_start: Instant,
}

impl TokenBucket {
    fn new(settings: BucketSettings, now: Instant) -> Self {
        let capacity = settings.capacity.max(1);
        Self {
            capacity,
            interval: settings.interval(),
            tokens: capacity,
            window_start: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed >= self.interval {
            let into_window = elapsed.as_nanos() % self.interval.as_nanos();
            self.window_start = now - Duration::from_nanos(into_window as u64);
            self.tokens = self.capacity;
        }
    }

    fn has_token(&mut self, now: Instant) -> bool {
        self.refill(now);
        self.tokens > 0
    }

    fn next_refill(&self) -> Instant {
        self.window_start + self.interval
    }
}

struct Buckets {
    global: TokenBucket,
    scopes: HashMap<String, TokenBucket>,
}

/// Dual-scope blocking rate limiter.
pub struct RateLimiter {
    settings: RateLimitSettings,
    buckets: Mutex<Buckets>,
}

impl RateLimiter {
    pub fn new(settings: RateLimitSettings) -> Self {
        Self {
            settings,
            buckets: Mutex::new(Buckets {
                global: TokenBucket::new(settings.global, Instant::now()),
                scopes: HashMap::new(),
            }),
        }
    }

    /// Takes one token from every bucket charged for `scope`, or none of them.
    ///
    /// On failure returns the instant at which a retry can succeed.
    async fn try_take(&self, scope: &Scope) -> std::result::Result<(), Instant> {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().await;
        let Buckets { global, scopes } = &mut *buckets;

        if !global.has_token(now) {
            return Err(global.next_refill());
        }

        match scope {
            Scope::Global => global.tokens -= 1,
            Scope::Conversation(id) => {
                let bucket = scopes
                    .entry(id.clone())
                    .or_insert_with(|| TokenBucket::new(self.settings.per_scope, now));
                if !bucket.has_token(now) {
                    return Err(bucket.next_refill());
                }
                bucket.tokens -= 1;
                global.tokens -= 1;
            }
        }
        Ok(())
    }

    /// Non-blocking check: admits the call if tokens are available right now.
    pub async fn try_check(&self, scope: &Scope) -> bool {
        self.try_take(scope).await.is_ok()
    }

    /// Blocks until the call is admitted by both buckets.
    pub async fn check_limit(&self, scope: &Scope) {
        loop {
            match self.try_take(scope).await {
                Ok(()) => return,
                Err(retry_at) => self.wait(scope, retry_at).await,
            }
        }
    }

    /// [`RateLimiter::check_limit`] giving up with `RateLimited` at `deadline`.
    pub async fn check_limit_until(&self, scope: &Scope, deadline: Instant) -> Result<()> {
        loop {
            match self.try_take(scope).await {
                Ok(()) => return Ok(()),
                Err(retry_at) if retry_at > deadline => {
                    tracing::debug!(scope = %scope, "Admission deadline before next refill");
                    tokio::time::sleep_until(deadline).await;
                    return Err(GuardError::RateLimited);
                }
                Err(retry_at) => self.wait(scope, retry_at).await,
            }
        }
    }

    async fn wait(&self, scope: &Scope, retry_at: Instant) {
        let floor = Instant::now() + self.settings.backoff();
        let wake = retry_at.max(floor);
        tracing::trace!(scope = %scope, "Rate limited, waiting for refill");
        tokio::time::sleep_until(wake).await;
    }
}
