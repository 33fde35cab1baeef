use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{Client, FromRedisValue};
use std::time::Duration;

use crate::error::{DemoError, Result};
use crate::store::CounterStore;

/// INCR, arming the expiry only on the first hit so the window is fixed.
const INCREMENT_WINDOW: &str = r"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return count
";

/// Compare-and-increment: admits only while the live count is below ARGV[1].
const TRY_ACQUIRE_WINDOW: &str = r"
local current = tonumber(redis.call('GET', KEYS[1]) or '0')
if current >= tonumber(ARGV[1]) then
    return 0
end
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[2])
end
return 1
";

const DECREMENT_CLAMPED: &str = r"
local current = tonumber(redis.call('GET', KEYS[1]) or '0')
if current <= 0 then
    redis.call('SET', KEYS[1], 0)
    return 0
end
return redis.call('DECR', KEYS[1])
";

/// Counters shared by every worker through Redis.
pub struct RedisStore {
    connection: MultiplexedConnection,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)
            .map_err(|e| DemoError::Store(format!("Failed to create Redis client: {}", e)))?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| DemoError::Store(format!("Failed to connect to Redis: {}", e)))?;

        tracing::info!(redis_url = %redis_url, "Connected shared counter store");

        Ok(Self { connection })
    }

    async fn eval_script<T>(&self, script: &str, key: &str, args: &[u64]) -> Result<T>
    where
        T: FromRedisValue,
    {
        let mut conn = self.connection.clone();
        let mut cmd = redis::cmd("EVAL");
        cmd.arg(script).arg(1).arg(key);
        for arg in args {
            cmd.arg(*arg);
        }

        cmd.query_async::<_, T>(&mut conn)
            .await
            .map_err(|e| DemoError::Store(format!("Script execution failed: {}", e)))
    }

    async fn get_count(&self, key: &str) -> Result<u64> {
        let mut conn = self.connection.clone();
        let value: Option<u64> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| DemoError::Store(format!("GET failed: {}", e)))?;
        Ok(value.unwrap_or(0))
    }
}

fn window_millis(window: Duration) -> u64 {
    (window.as_millis() as u64).max(1)
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn window_count(&self, key: &str) -> Result<u64> {
        // Expired windows are evicted by Redis itself.
        self.get_count(key).await
    }

    async fn increment_window(&self, key: &str, window: Duration) -> Result<u64> {
        self.eval_script(INCREMENT_WINDOW, key, &[window_millis(window)])
            .await
    }

    async fn try_acquire_window(&self, key: &str, max: u64, window: Duration) -> Result<bool> {
        let admitted: i64 = self
            .eval_script(TRY_ACQUIRE_WINDOW, key, &[max, window_millis(window)])
            .await?;
        Ok(admitted == 1)
    }

    async fn slot_count(&self, key: &str) -> Result<u64> {
        self.get_count(key).await
    }

    async fn increment_slot(&self, key: &str) -> Result<u64> {
        let mut conn = self.connection.clone();
        redis::cmd("INCR")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| DemoError::Store(format!("INCR failed: {}", e)))
    }

    async fn decrement_slot(&self, key: &str) -> Result<u64> {
        self.eval_script(DECREMENT_CLAMPED, key, &[]).await
    }

    async fn reset(&self, key: &str) -> Result<()> {
        let mut conn = self.connection.clone();
        redis::cmd("DEL")
            .arg(key)
            .query_async::<_, i64>(&mut conn)
            .await
            .map(|_| ())
            .map_err(|e| DemoError::Store(format!("DEL failed: {}", e)))
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(|e| DemoError::Store(format!("Ping failed: {}", e)))
    }
}
