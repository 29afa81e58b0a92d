//! Login lockout tracking backed by Redis.
//!
//! Counts failed login attempts per email and locks the account for a
//! configured window once the threshold is crossed. Without a broker
//! configured, lockout is disabled (login still requires valid credentials).

use deadpool_redis::Pool;
use redis::AsyncCommands;
use tracing::{debug, warn};

const ATTEMPTS_PREFIX: &str = "recast:lockout:attempts:";
const LOCKED_PREFIX: &str = "recast:lockout:locked:";

#[derive(Clone)]
pub struct LoginLockout {
    pool: Option<Pool>,
    max_attempts: u32,
    lockout_secs: u64,
}

impl LoginLockout {
    pub fn new(pool: Option<Pool>, max_attempts: u32, lockout_duration_mins: u32) -> Self {
        Self {
            pool,
            max_attempts,
            lockout_secs: lockout_duration_mins as u64 * 60,
        }
    }

    fn attempts_key(email: &str) -> String {
        format!("{}{}", ATTEMPTS_PREFIX, email.to_lowercase())
    }

    fn locked_key(email: &str) -> String {
        format!("{}{}", LOCKED_PREFIX, email.to_lowercase())
    }

    /// Returns the remaining lockout in seconds, or `None` when the account
    /// is not locked.
    pub async fn locked_for(&self, email: &str) -> Option<u64> {
        let pool = self.pool.as_ref()?;
        let mut conn = pool.get().await.ok()?;

        let ttl: i64 = conn.ttl(Self::locked_key(email)).await.ok()?;
        (ttl > 0).then_some(ttl as u64)
    }

    /// Records a failed attempt; returns true if this attempt locked the
    /// account. Failures to reach Redis are swallowed: lockout is additive
    /// protection, not a login dependency.
    pub async fn record_failure(&self, email: &str) -> bool {
        let Some(pool) = &self.pool else {
            return false;
        };
        let Ok(mut conn) = pool.get().await else {
            return false;
        };

        let attempts_key = Self::attempts_key(email);
        let attempts: u32 = match conn.incr(&attempts_key, 1).await {
            Ok(n) => n,
            Err(_) => return false,
        };

        if attempts == 1 {
            let _ = conn
                .expire::<_, ()>(&attempts_key, self.lockout_secs as i64)
                .await;
        }

        debug!(email = %email, attempts, max = self.max_attempts, "Failed login attempt");

        if attempts >= self.max_attempts {
            let locked: Result<(), _> = conn
                .set_ex(Self::locked_key(email), "1", self.lockout_secs)
                .await;
            let _: Result<(), _> = conn.del(&attempts_key).await;

            if locked.is_ok() {
                warn!(email = %email, lockout_secs = self.lockout_secs, "Account locked");
                return true;
            }
        }

        false
    }

    pub async fn clear(&self, email: &str) {
        let Some(pool) = &self.pool else { return };
        let Ok(mut conn) = pool.get().await else {
            return;
        };

        let _: Result<(), _> = conn.del(Self::attempts_key(email)).await;
    }

    pub fn is_available(&self) -> bool {
        self.pool.is_some()
    }
}
