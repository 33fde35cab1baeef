//! Window-based admission control over shared counters.
//!
//! Windowed policies are fixed windows: the first admitted call arms the
//! window and later calls count against it until it expires. The parser
//! policy has no window and is tracked as a best-effort gauge of in-flight
//! jobs. Nothing decrements it when a worker crashes, so it can overshoot
//! until it is reset.

use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{DemoError, Result};
use crate::rate_limit_config::RateLimitPolicy;
use crate::redis_store::RedisStore;
use crate::store::{CounterStore, MemoryStore};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
const KEY_PREFIX: &str = "demofetch";

#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    poll_interval: Duration,
}

/// Snapshot of one policy's counter.
#[derive(Debug, Clone, Serialize)]
pub struct LimitStatus {
    pub service: String,
    pub max: u64,
    #[serde(with = "humantime_serde")]
    pub window: Option<Duration>,
    pub current: u64,
    pub remaining: u64,
}

fn window_key(service: &str) -> String {
    format!("{}:ratelimit:{}", KEY_PREFIX, service)
}

fn slot_key(service: &str) -> String {
    format!("{}:slots:{}", KEY_PREFIX, service)
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self {
            store,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Limiter over process-local counters.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Redis when `REDIS_URL` is set, process-local counters otherwise.
    pub async fn from_config(config: &Config) -> Result<Self> {
        if config.uses_redis() {
            let store = RedisStore::connect(config.redis_url.trim()).await?;
            Ok(Self::new(Arc::new(store)))
        } else {
            info!("REDIS_URL not set, rate limits apply to this process only");
            Ok(Self::in_memory())
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Whether the policy currently has capacity. Does not consume any.
    pub async fn check_limit(&self, policy: &RateLimitPolicy) -> Result<bool> {
        let current = self.current(policy).await?;
        Ok(current < policy.max)
    }

    /// Count one operation against the policy's window.
    pub async fn increment(&self, policy: &RateLimitPolicy) -> Result<u64> {
        let window = require_window(policy)?;
        self.store
            .increment_window(&window_key(&policy.service), window)
            .await
    }

    /// Check and increment as a single atomic step on the store.
    pub async fn try_acquire(&self, policy: &RateLimitPolicy) -> Result<bool> {
        let window = require_window(policy)?;
        self.store
            .try_acquire_window(&window_key(&policy.service), policy.max, window)
            .await
    }

    /// Poll until the policy has capacity without consuming it.
    ///
    /// With no token this waits for as long as it takes, so only call it
    /// from background work.
    pub async fn wait_for_limit(
        &self,
        policy: &RateLimitPolicy,
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        let mut logged = false;
        loop {
            if self.check_limit(policy).await? {
                return Ok(());
            }
            if !logged {
                info!(service = %policy.service, max = policy.max, "Rate limit reached, waiting for capacity");
                logged = true;
            }
            self.pause(cancel).await?;
        }
    }

    /// Poll until one unit of the policy has been consumed.
    pub async fn acquire(
        &self,
        policy: &RateLimitPolicy,
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        let mut logged = false;
        loop {
            if self.try_acquire(policy).await? {
                return Ok(());
            }
            if !logged {
                info!(service = %policy.service, max = policy.max, "Rate limit reached, waiting for capacity");
                logged = true;
            }
            self.pause(cancel).await?;
        }
    }

    pub async fn increment_slot(&self, service: &str) -> Result<u64> {
        let in_flight = self.store.increment_slot(&slot_key(service)).await?;
        debug!(service = %service, in_flight, "Slot taken");
        Ok(in_flight)
    }

    pub async fn decrement_slot(&self, service: &str) -> Result<u64> {
        let in_flight = self.store.decrement_slot(&slot_key(service)).await?;
        debug!(service = %service, in_flight, "Slot released");
        Ok(in_flight)
    }

    pub async fn slot_count(&self, service: &str) -> Result<u64> {
        self.store.slot_count(&slot_key(service)).await
    }

    pub async fn has_free_slot(&self, policy: &RateLimitPolicy) -> Result<bool> {
        Ok(self.slot_count(&policy.service).await? < policy.max)
    }

    pub async fn status(&self, policy: &RateLimitPolicy) -> Result<LimitStatus> {
        let current = self.current(policy).await?;
        Ok(LimitStatus {
            service: policy.service.clone(),
            max: policy.max,
            window: policy.window,
            current,
            remaining: policy.max.saturating_sub(current),
        })
    }

    pub async fn reset(&self, policy: &RateLimitPolicy) -> Result<()> {
        let key = if policy.is_windowed() {
            window_key(&policy.service)
        } else {
            slot_key(&policy.service)
        };
        self.store.reset(&key).await
    }

    pub async fn is_store_available(&self) -> bool {
        self.store.ping().await.is_ok()
    }

    async fn current(&self, policy: &RateLimitPolicy) -> Result<u64> {
        if policy.is_windowed() {
            self.store.window_count(&window_key(&policy.service)).await
        } else {
            self.slot_count(&policy.service).await
        }
    }

    async fn pause(&self, cancel: Option<&CancellationToken>) -> Result<()> {
        until_cancelled(cancel, tokio::time::sleep(self.poll_interval))
            .await
            .ok_or(DemoError::Cancelled)
    }
}

/// Run `future` unless `cancel` fires first, in which case `None`.
pub(crate) async fn until_cancelled<F: Future>(
    cancel: Option<&CancellationToken>,
    future: F,
) -> Option<F::Output> {
    match cancel {
        Some(token) => tokio::select! {
            _ = token.cancelled() => None,
            output = future => Some(output),
        },
        None => Some(future.await),
    }
}

fn require_window(policy: &RateLimitPolicy) -> Result<Duration> {
    policy.window.ok_or_else(|| {
        DemoError::Config(format!(
            "Policy '{}' has no window; use the slot operations",
            policy.service
        ))
    })
}
