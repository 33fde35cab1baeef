//! Shared counter storage.
//!
//! Counters live behind [`CounterStore`] so the limiter works the same
//! whether they sit in Redis (shared by every worker) or in this process.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::error::Result;

#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Count in the live window for `key`, zero if absent or expired.
    async fn window_count(&self, key: &str) -> Result<u64>;

    /// Unconditionally bump the window counter. The first hit of a fresh
    /// window arms its expiry at `now + window`.
    async fn increment_window(&self, key: &str, window: Duration) -> Result<u64>;

    /// Atomically increment only while the count is below `max`.
    async fn try_acquire_window(&self, key: &str, max: u64, window: Duration) -> Result<bool>;

    async fn slot_count(&self, key: &str) -> Result<u64>;

    async fn increment_slot(&self, key: &str) -> Result<u64>;

    /// Decrement, clamped at zero.
    async fn decrement_slot(&self, key: &str) -> Result<u64>;

    async fn reset(&self, key: &str) -> Result<()>;

    async fn ping(&self) -> Result<()>;
}

#[derive(Debug, Clone, Copy)]
struct WindowEntry {
    count: u64,
    window_end: Instant,
}

impl WindowEntry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.window_end
    }
}

/// Entry for `key`, replaced by an empty window when absent or expired.
fn live_entry<'a>(
    windows: &'a mut HashMap<String, WindowEntry>,
    key: &str,
    window: Duration,
) -> &'a mut WindowEntry {
    let now = Instant::now();
    let fresh = WindowEntry {
        count: 0,
        window_end: now + window,
    };
    let entry = windows.entry(key.to_string()).or_insert(fresh);
    if !entry.is_live(now) {
        *entry = fresh;
    }
    entry
}

/// Process-local counters. Only limits the current process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    windows: RwLock<HashMap<String, WindowEntry>>,
    slots: RwLock<HashMap<String, u64>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn window_count(&self, key: &str) -> Result<u64> {
        let windows = self.windows.read().await;
        let now = Instant::now();
        Ok(windows
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.count)
            .unwrap_or(0))
    }

    async fn increment_window(&self, key: &str, window: Duration) -> Result<u64> {
        let mut windows = self.windows.write().await;
        let entry = live_entry(&mut windows, key, window);
        entry.count += 1;
        Ok(entry.count)
    }

    async fn try_acquire_window(&self, key: &str, max: u64, window: Duration) -> Result<bool> {
        let mut windows = self.windows.write().await;
        let entry = live_entry(&mut windows, key, window);
        if entry.count >= max {
            return Ok(false);
        }
        entry.count += 1;
        Ok(true)
    }

    async fn slot_count(&self, key: &str) -> Result<u64> {
        Ok(self.slots.read().await.get(key).copied().unwrap_or(0))
    }

    async fn increment_slot(&self, key: &str) -> Result<u64> {
        let mut slots = self.slots.write().await;
        let count = slots.entry(key.to_string()).or_insert(0);
        *count += 1;
        Ok(*count)
    }

    async fn decrement_slot(&self, key: &str) -> Result<u64> {
        let mut slots = self.slots.write().await;
        let count = slots.entry(key.to_string()).or_insert(0);
        *count = count.saturating_sub(1);
        Ok(*count)
    }

    async fn reset(&self, key: &str) -> Result<()> {
        self.windows.write().await.remove(key);
        self.slots.write().await.remove(key);
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
