//! Cache store contract and in-memory implementation
//!
//! `CacheStore` abstracts the remote key-value store the dataset mirror
//! shares with sibling processes: string keys with TTL, hash maps for
//! snapshots, and pub/sub for the change bus.
//!
//! Failure contract: every operation returns `StoreUnavailable` instead of
//! panicking or hanging; the consumer treats that as a miss and keeps
//! serving from its in-process mirror.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use types::errors::StoreUnavailable;

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreUnavailable>;

/// Receiver half of a pub/sub subscription.
pub type Subscription = broadcast::Receiver<String>;

/// Remote key-value store contract required by the dataset cache.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Get a string value.
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Set a string value with an optional TTL.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()>;

    /// Set many fields on a hash key. Creates the hash if absent.
    async fn hash_set_many(&self, hash_key: &str, fields: Vec<(String, String)>)
        -> StoreResult<()>;

    /// Get all fields of a hash key. Empty map when the key is absent.
    async fn hash_get_all(&self, hash_key: &str) -> StoreResult<HashMap<String, String>>;

    /// Whether a key (string or hash) exists.
    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Delete a key (string or hash). Returns whether anything was removed.
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Remaining TTL of a string key; `None` when absent or unbounded.
    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>>;

    /// Publish a payload to a channel. Returns the subscriber count.
    async fn publish(&self, channel: &str, payload: &str) -> StoreResult<usize>;

    /// Subscribe to a channel.
    async fn subscribe(&self, channel: &str) -> StoreResult<Subscription>;
}

/// Per-channel broadcast capacity. Slow listeners lag rather than block
/// publishers; a lagged listener resyncs on its next full query.
const CHANNEL_CAPACITY: usize = 256;

struct StringEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl StringEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Default)]
struct MemoryShared {
    strings: HashMap<String, StringEntry>,
    hashes: HashMap<String, HashMap<String, String>>,
    channels: HashMap<String, broadcast::Sender<String>>,
}

/// In-process `CacheStore` backed by tokio primitives.
///
/// Default store for single-process deployments and the test double for
/// everything else. `set_available(false)` simulates a store outage: every
/// operation fails with `StoreUnavailable` until re-enabled.
pub struct MemoryStore {
    shared: RwLock<MemoryShared>,
    available: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            shared: RwLock::new(MemoryShared::default()),
            available: AtomicBool::new(true),
        }
    }

    /// Toggle simulated availability.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreUnavailable::new("simulated outage"))
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.check_available()?;
        let now = Instant::now();
        let shared = self.shared.read().await;
        Ok(shared
            .strings
            .get(key)
            .filter(|e| !e.is_expired(now))
            .map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        self.check_available()?;
        let entry = StringEntry {
            value: value.to_string(),
            expires_at: ttl.map(|d| Instant::now() + d),
        };
        let mut shared = self.shared.write().await;
        shared.strings.insert(key.to_string(), entry);
        Ok(())
    }

    async fn hash_set_many(
        &self,
        hash_key: &str,
        fields: Vec<(String, String)>,
    ) -> StoreResult<()> {
        self.check_available()?;
        let mut shared = self.shared.write().await;
        let hash = shared.hashes.entry(hash_key.to_string()).or_default();
        for (field, value) in fields {
            hash.insert(field, value);
        }
        Ok(())
    }

    async fn hash_get_all(&self, hash_key: &str) -> StoreResult<HashMap<String, String>> {
        self.check_available()?;
        let shared = self.shared.read().await;
        Ok(shared.hashes.get(hash_key).cloned().unwrap_or_default())
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.check_available()?;
        let now = Instant::now();
        let shared = self.shared.read().await;
        Ok(shared
            .strings
            .get(key)
            .is_some_and(|e| !e.is_expired(now))
            || shared.hashes.contains_key(key))
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        self.check_available()?;
        let mut shared = self.shared.write().await;
        let removed_string = shared.strings.remove(key).is_some();
        let removed_hash = shared.hashes.remove(key).is_some();
        Ok(removed_string || removed_hash)
    }

    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        self.check_available()?;
        let now = Instant::now();
        let shared = self.shared.read().await;
        Ok(shared
            .strings
            .get(key)
            .filter(|e| !e.is_expired(now))
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(now)))
    }

    async fn publish(&self, channel: &str, payload: &str) -> StoreResult<usize> {
        self.check_available()?;
        let shared = self.shared.read().await;
        match shared.channels.get(channel) {
            Some(sender) => {
                let delivered = sender.send(payload.to_string()).unwrap_or(0);
                debug!(channel, delivered, "published change-bus payload");
                Ok(delivered)
            }
            None => Ok(0),
        }
    }

    async fn subscribe(&self, channel: &str) -> StoreResult<Subscription> {
        self.check_available()?;
        let mut shared = self.shared.write().await;
        let sender = shared
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        Ok(sender.subscribe())
    }
}
