use async_trait::async_trait;
use axum::{http::StatusCode, Json};
use serde_json::json;

use crate::models::user::normalize_email;

/// A fixed window: at most `max_attempts` per `window_secs` per caller.
#[derive(Debug, Clone, Copy)]
pub struct RateLimit {
    pub scope: &'static str,
    pub max_attempts: u64,
    pub window_secs: u64,
}

pub const SIGN_IN: RateLimit = RateLimit { scope: "sign_in", max_attempts: 10, window_secs: 900 };
pub const SIGN_UP: RateLimit = RateLimit { scope: "sign_up", max_attempts: 5, window_secs: 3600 };
pub const PASSWORD_RESET: RateLimit =
    RateLimit { scope: "password_reset", max_attempts: 5, window_secs: 3600 };
pub const ASSISTANT: RateLimit = RateLimit { scope: "assistant", max_attempts: 30, window_secs: 600 };

impl RateLimit {
    pub fn key(&self, caller: &str) -> String {
        format!("rate_limit:{}:{}", self.scope, normalize_email(caller))
    }
}

/// Attempt counters backing [`check_rate_limit`].
#[async_trait]
pub trait AttemptCounter: Send + Sync {
    /// Count one attempt on `key`. The first attempt opens a window of
    /// `window_secs`; returns the attempts seen in the current window.
    async fn hit(&self, key: &str, window_secs: u64) -> anyhow::Result<u64>;
}

/// Uses the INCR + EXPIRE strategy:
/// - Increments a counter for the caller's key
/// - On first increment, sets TTL to the window
#[derive(Clone)]
pub struct RedisAttemptCounter {
    redis: redis::aio::MultiplexedConnection,
}

impl RedisAttemptCounter {
    pub fn new(redis: redis::aio::MultiplexedConnection) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl AttemptCounter for RedisAttemptCounter {
    async fn hit(&self, key: &str, window_secs: u64) -> anyhow::Result<u64> {
        let mut conn = self.redis.clone();
        let count: u64 = redis::cmd("INCR").arg(key).query_async(&mut conn).await?;
        if count == 1 {
            let _: Result<(), _> = redis::cmd("EXPIRE")
                .arg(key)
                .arg(window_secs)
                .query_async(&mut conn)
                .await;
        }
        Ok(count)
    }
}

/// Checks `limit` for `caller`; 429 once the window's attempts exceed the
/// maximum. A counter failure lets the request through.
pub async fn check_rate_limit(
    counter: &dyn AttemptCounter,
    limit: RateLimit,
    caller: &str,
) -> Result<(), (StatusCode, Json<serde_json::Value>)> {
    let key = limit.key(caller);
    let count = counter.hit(&key, limit.window_secs).await.unwrap_or_else(|e| {
        tracing::warn!("rate limit counter unavailable for {key}: {e}");
        0
    });

    if count > limit.max_attempts {
        tracing::warn!("rate limit hit: {key}");
        return Err((
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({ "error": "Muitas tentativas. Tente novamente em alguns minutos." })),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::memory::InMemoryAttemptCounter;

    #[test]
    fn keys_are_scoped_and_normalised() {
        assert_eq!(SIGN_IN.key(" Ana@Icone.com "), "rate_limit:sign_in:ana@icone.com");
        assert_ne!(SIGN_IN.key("a@b.c"), SIGN_UP.key("a@b.c"));
    }

    #[tokio::test]
    async fn attempts_over_the_maximum_are_rejected() {
        let counter = InMemoryAttemptCounter::new();
        let limit = RateLimit { scope: "t", max_attempts: 2, window_secs: 60 };

        assert!(check_rate_limit(&counter, limit, "a@b.c").await.is_ok());
        assert!(check_rate_limit(&counter, limit, "A@B.C").await.is_ok());
        let (status, _) = check_rate_limit(&counter, limit, "a@b.c").await.unwrap_err();
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

        // Other callers have their own window.
        assert!(check_rate_limit(&counter, limit, "x@y.z").await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn window_expiry_resets_the_count() {
        let counter = InMemoryAttemptCounter::new();
        let limit = RateLimit { scope: "t", max_attempts: 1, window_secs: 60 };

        assert!(check_rate_limit(&counter, limit, "a@b.c").await.is_ok());
        assert!(check_rate_limit(&counter, limit, "a@b.c").await.is_err());
        tokio::time::advance(std::time::Duration::from_secs(61)).await;
        assert!(check_rate_limit(&counter, limit, "a@b.c").await.is_ok());
    }
}
