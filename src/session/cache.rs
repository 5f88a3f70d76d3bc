//! Session-keyed conversation cache
//!
//! Gives the generator multi-turn memory across single-shot TCP probes.
//! Entries are created on the first recorded turn, extended on every later
//! append, and removed only by the idle sweep.

use super::message::Message;
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Build the cache key for a peer: protocol tag followed by the IP, no port
pub fn session_key(protocol_tag: &str, source_ip: &str) -> String {
    format!("{}{}", protocol_tag, source_ip)
}

#[derive(Debug)]
struct Entry {
    history: Vec<Message>,
    last_touched: Instant,
}

/// Concurrent conversation store with idle eviction
#[derive(Debug, Default)]
pub struct SessionCache {
    entries: RwLock<HashMap<String, Entry>>,
    reclaimer_started: AtomicBool,
}

static GLOBAL: OnceCell<Arc<SessionCache>> = OnceCell::new();

impl SessionCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide cache shared by every service
    pub fn global() -> Arc<SessionCache> {
        GLOBAL.get_or_init(|| Arc::new(SessionCache::new())).clone()
    }

    /// Whether an entry is present for `key` (not yet swept)
    pub async fn exists(&self, key: &str) -> bool {
        self.entries.read().await.contains_key(key)
    }

    /// History for `key`, empty if absent
    pub async fn get(&self, key: &str) -> Vec<Message> {
        self.entries
            .read()
            .await
            .get(key)
            .map(|e| e.history.clone())
            .unwrap_or_default()
    }

    /// Append turns, creating the entry if needed, and refresh its idle timer
    ///
    /// An empty `turns` is a no-op; entries only exist once a turn is recorded.
    pub async fn append(&self, key: &str, turns: impl IntoIterator<Item = Message>) {
        let turns: Vec<Message> = turns.into_iter().collect();
        if turns.is_empty() {
            return;
        }

        let mut entries = self.entries.write().await;
        let now = Instant::now();
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            history: Vec::new(),
            last_touched: now,
        });
        entry.history.extend(turns);
        entry.last_touched = now;
    }

    /// Number of entries not yet swept
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Remove entries idle for longer than `max_idle`
    pub async fn evict_idle(&self, max_idle: Duration) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| now.duration_since(e.last_touched) <= max_idle);
        let evicted = before - entries.len();

        if evicted > 0 {
            tracing::debug!(evicted, remaining = entries.len(), "Evicted idle sessions");
        }

        evicted
    }

    /// Spawn the periodic idle sweep; only the first call on a cache spawns
    pub fn start_reclaimer(
        self: &Arc<Self>,
        interval: Duration,
        max_idle: Duration,
    ) -> Option<tokio::task::JoinHandle<()>> {
        if self
            .reclaimer_started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }

        let cache = Arc::clone(self);
        tracing::info!(
            interval_secs = interval.as_secs(),
            max_idle_secs = max_idle.as_secs(),
            "Starting session reclaimer"
        );

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // Skip the first immediate tick
            ticker.tick().await;

            loop {
                ticker.tick().await;
                cache.evict_idle(max_idle).await;
            }
        }))
    }
}
