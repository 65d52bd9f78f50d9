//! Thread-Safe Storage Engine with Expiry Support
//!
//! This module implements the key space for TideKV: a single `HashMap` guarded
//! by one `RwLock`, holding [`Item`]s with optional expiry timestamps.
//!
//! ## Design Decisions
//!
//! 1. **One RwLock**: Reads (`get`, `ttl`, `exists`, `keys`, `size`) share the
//!    lock; mutations (`set`, `del`, `expire`, `persist`, sweeps) take it exclusively.
//! 2. **Lazy Expiry**: Reads treat expired items as absent but never remove them.
//! 3. **Active Expiry**: A background sweeper (see [`crate::storage::expiry`])
//!    physically removes expired items.
//! 4. **No I/O under the lock**: persisting a write is the caller's job, after
//!    the storage call has returned.
//!
//! ## Concurrency Model
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     StorageEngine                           │
//! │        ┌──────────────────────────────────────┐             │
//! │        │  RwLock<HashMap<String, Item>>       │             │
//! │        └──────────────────────────────────────┘             │
//! │          ▲ shared: get/ttl/exists/keys/size                 │
//! │          ▲ exclusive: set/del/expire/persist/sweep          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every operation takes a [`Context`]. If the context is already canceled or
//! past its deadline, the operation returns its "not performed" value without
//! touching the key space.

use crate::context::Context;
use crate::storage::expiry::{ExpiryConfig, ExpirySweeper, SweeperError};
use crate::storage::glob::KeyMatcher;
use crate::storage::item::{unix_now, Item};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
};
use std::time::Duration;
use tracing::{debug, info, trace};

/// Outcome of [`StorageEngine::del`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelStatus {
    /// The key existed and was removed
    Removed,
    /// There was nothing to remove
    NotFound,
    /// The context was done; nothing was touched
    Canceled,
}

impl DelStatus {
    /// True only when a key was actually removed.
    pub fn removed(self) -> bool {
        self == DelStatus::Removed
    }
}

/// Outcome of [`StorageEngine::ttl`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// Seconds until expiry; `0` when expired but not yet swept
    Remaining(u64),
    /// The key exists and never expires
    NoExpiry,
    /// The key does not exist
    NotFound,
    /// The context was done; nothing was read
    Canceled,
}

/// The main storage engine for TideKV.
///
/// Designed to be wrapped in an `Arc` and shared by every client handler and
/// the background sweeper.
///
/// # Example
///
/// ```
/// use tidekv::context::Context;
/// use tidekv::storage::{StorageEngine, Ttl};
///
/// let ctx = Context::background();
/// let engine = StorageEngine::new();
///
/// engine.set(&ctx, "name", "tide");
/// assert_eq!(engine.get(&ctx, "name"), Some("tide".to_string()));
///
/// engine.expire(&ctx, "name", 60);
/// assert!(matches!(engine.ttl(&ctx, "name"), Ttl::Remaining(s) if s <= 60));
/// ```
pub struct StorageEngine {
    /// The key space
    data: RwLock<HashMap<String, Item>>,

    /// Handle of the running sweeper, if any
    sweeper: Mutex<Option<ExpirySweeper>>,

    /// Statistics: total GET operations
    get_count: AtomicU64,

    /// Statistics: total SET operations
    set_count: AtomicU64,

    /// Statistics: total DEL operations
    del_count: AtomicU64,

    /// Statistics: number of expired keys reclaimed by sweeps
    expired_count: AtomicU64,
}

impl std::fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEngine")
            .field("keys", &self.read_data().len())
            .field("get_count", &self.get_count.load(Ordering::Relaxed))
            .field("set_count", &self.set_count.load(Ordering::Relaxed))
            .field("sweeping", &self.is_cleanup_running())
            .finish()
    }
}

impl Default for StorageEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageEngine {
    /// Creates an empty storage engine with no sweeper running.
    pub fn new() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
            sweeper: Mutex::new(None),
            get_count: AtomicU64::new(0),
            set_count: AtomicU64::new(0),
            del_count: AtomicU64::new(0),
            expired_count: AtomicU64::new(0),
        }
    }

    // Every critical section leaves the map consistent, so a poisoned lock is
    // still safe to use.
    fn read_data(&self) -> RwLockReadGuard<'_, HashMap<String, Item>> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_data(&self) -> RwLockWriteGuard<'_, HashMap<String, Item>> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn sweeper_slot(&self) -> MutexGuard<'_, Option<ExpirySweeper>> {
        self.sweeper.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sets a key to a value with no expiry.
    ///
    /// Any previous item is replaced in full, including its TTL.
    ///
    /// # Returns
    ///
    /// `false` only if the context was already done.
    pub fn set(&self, ctx: &Context, key: impl Into<String>, value: impl Into<String>) -> bool {
        if ctx.is_done() {
            return false;
        }
        self.set_count.fetch_add(1, Ordering::Relaxed);

        let key = key.into();
        trace!(key = %key, "SET");
        self.write_data().insert(key, Item::new(value));
        true
    }

    /// Gets the value for a key.
    ///
    /// Returns `None` if the key doesn't exist or has expired. Expired items are
    /// left in place for the sweeper.
    pub fn get(&self, ctx: &Context, key: &str) -> Option<String> {
        if ctx.is_done() {
            return None;
        }
        self.get_count.fetch_add(1, Ordering::Relaxed);

        let now = unix_now();
        let data = self.read_data();
        data.get(key)
            .filter(|item| !item.is_expired(now))
            .map(|item| item.value.clone())
    }

    /// Deletes a key whether or not it has expired.
    pub fn del(&self, ctx: &Context, key: &str) -> DelStatus {
        if ctx.is_done() {
            return DelStatus::Canceled;
        }
        self.del_count.fetch_add(1, Ordering::Relaxed);

        if self.write_data().remove(key).is_some() {
            DelStatus::Removed
        } else {
            DelStatus::NotFound
        }
    }

    /// Sets the key to expire `seconds` from now.
    ///
    /// Zero or negative `seconds` produce an expiry at or before the current
    /// second. An item that has expired but not yet been swept still counts as
    /// present and gets the new expiry.
    ///
    /// # Returns
    ///
    /// `true` if the expiry was set, `false` if the key doesn't exist.
    pub fn expire(&self, ctx: &Context, key: &str, seconds: i64) -> bool {
        if ctx.is_done() {
            return false;
        }

        let expires_at = unix_now().saturating_add(seconds);
        match self.write_data().get_mut(key) {
            Some(item) => {
                item.expires_at = Some(expires_at);
                true
            }
            None => false,
        }
    }

    /// Gets the remaining time to live of a key, in seconds.
    pub fn ttl(&self, ctx: &Context, key: &str) -> Ttl {
        if ctx.is_done() {
            return Ttl::Canceled;
        }

        let now = unix_now();
        let data = self.read_data();
        match data.get(key) {
            None => Ttl::NotFound,
            Some(item) => match item.remaining_secs(now) {
                Some(secs) => Ttl::Remaining(secs),
                None => Ttl::NoExpiry,
            },
        }
    }

    /// Removes the expiry from a key, making it permanent.
    ///
    /// # Returns
    ///
    /// `true` if the key exists, `false` otherwise.
    pub fn persist(&self, ctx: &Context, key: &str) -> bool {
        if ctx.is_done() {
            return false;
        }

        match self.write_data().get_mut(key) {
            Some(item) => {
                item.expires_at = None;
                true
            }
            None => false,
        }
    }

    /// Returns all live keys matching a glob pattern, in no particular order.
    ///
    /// `"*"` matches every key without running the matcher. A malformed pattern
    /// matches only the key equal to it.
    ///
    /// **Warning**: This operation scans the whole key space under the read lock.
    pub fn keys(&self, ctx: &Context, pattern: &str) -> Vec<String> {
        if ctx.is_done() {
            return Vec::new();
        }

        let matcher = KeyMatcher::new(pattern);
        let now = unix_now();
        let data = self.read_data();
        data.iter()
            .filter(|(_, item)| !item.is_expired(now))
            .filter(|(key, _)| matcher.matches(key))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Checks if a key exists and has not expired.
    pub fn exists(&self, ctx: &Context, key: &str) -> bool {
        if ctx.is_done() {
            return false;
        }

        let now = unix_now();
        self.read_data()
            .get(key)
            .is_some_and(|item| !item.is_expired(now))
    }

    /// Returns the number of entries held, including expired ones that have
    /// not been swept yet.
    pub fn size(&self, ctx: &Context) -> usize {
        if ctx.is_done() {
            return 0;
        }
        self.read_data().len()
    }

    /// Removes every item expired as of now.
    ///
    /// This is called by the background expiry sweeper.
    ///
    /// # Returns
    ///
    /// The number of items removed.
    pub fn cleanup_expired(&self) -> u64 {
        self.cleanup_expired_at(unix_now())
    }

    /// Removes every item expired as of `now` (Unix seconds).
    pub fn cleanup_expired_at(&self, now: i64) -> u64 {
        let mut data = self.write_data();
        let before = data.len();
        data.retain(|_, item| !item.is_expired(now));
        let removed = (before - data.len()) as u64;
        drop(data);

        if removed > 0 {
            self.expired_count.fetch_add(removed, Ordering::Relaxed);
        }
        removed
    }

    /// Starts the background sweeper with a fixed interval.
    ///
    /// The sweeper holds only a weak reference to the engine, so it also stops
    /// once the last `Arc` is dropped.
    ///
    /// # Errors
    ///
    /// - [`SweeperError::AlreadyRunning`] if a sweeper is already active
    /// - [`SweeperError::ZeroInterval`] for a zero interval
    /// - [`SweeperError::NoRuntime`] when called outside a Tokio runtime
    pub fn start_cleanup(self: &Arc<Self>, interval: Duration) -> Result<(), SweeperError> {
        let mut slot = self.sweeper_slot();
        if slot.is_some() {
            debug!("Expiry sweeper already running");
            return Err(SweeperError::AlreadyRunning);
        }

        let config = ExpiryConfig::default().with_interval(interval);
        let sweeper = ExpirySweeper::start(Arc::downgrade(self), config)?;
        *slot = Some(sweeper);
        Ok(())
    }

    /// Stops the background sweeper.
    ///
    /// # Returns
    ///
    /// `true` if a sweeper was running, `false` if there was nothing to stop.
    pub fn stop_cleanup(&self) -> bool {
        // Dropping the handle signals the task
        self.sweeper_slot().take().is_some()
    }

    /// Whether a background sweeper is currently active.
    pub fn is_cleanup_running(&self) -> bool {
        self.sweeper_slot().is_some()
    }

    /// Returns engine statistics.
    pub fn stats(&self) -> StorageStats {
        StorageStats {
            keys: self.read_data().len() as u64,
            get_ops: self.get_count.load(Ordering::Relaxed),
            set_ops: self.set_count.load(Ordering::Relaxed),
            del_ops: self.del_count.load(Ordering::Relaxed),
            expired: self.expired_count.load(Ordering::Relaxed),
        }
    }
}

impl Drop for StorageEngine {
    fn drop(&mut self) {
        if self.stop_cleanup() {
            info!("Storage engine dropped, expiry sweeper stopped");
        }
    }
}

/// Engine statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageStats {
    /// Number of entries currently held (including unswept expired ones)
    pub keys: u64,
    /// Total GET operations
    pub get_ops: u64,
    /// Total SET operations
    pub set_ops: u64,
    /// Total DEL operations
    pub del_ops: u64,
    /// Total expired keys reclaimed by sweeps
    pub expired: u64,
}
