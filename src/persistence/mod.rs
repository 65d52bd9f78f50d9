//! Persistence Module
//!
//! Durable, append-only record of write commands and the replay that rebuilds
//! the key space from it at startup.
//!
//! ## Architecture
//!
//! ```text
//!   CommandHandler ──(after the write is applied)──> AppendLog::append
//!                                                        │
//!                                                        ▼
//!                                               appendonly.aof (fsync)
//!                                                        │
//!   startup: AppendLog::replay ──────────────────────────┘
//!                │
//!                ▼
//!          ReplayTarget (StorageEngine)
//! ```
//!
//! The log never reads application state. Replay writes into whatever
//! [`ReplayTarget`] it is handed, using the same semantics as live commands.

pub mod aof;
pub mod entry;

pub use aof::{replay_file, AppendLog, LogError, ReplayStats};
pub use entry::{EntryError, LogEntry};

use crate::context::Context;
use crate::storage::StorageEngine;

/// The write operations replay needs from a store.
pub trait ReplayTarget {
    /// Sets `key` to `value`, clearing any expiry.
    fn apply_set(&self, ctx: &Context, key: String, value: String);

    /// Removes `key` if present.
    fn apply_del(&self, ctx: &Context, key: &str);

    /// Expires `key` `seconds` from now if present.
    fn apply_expire(&self, ctx: &Context, key: &str, seconds: i64);

    /// Clears the expiry of `key` if present.
    fn apply_persist(&self, ctx: &Context, key: &str);

    /// Applies one log entry.
    fn apply(&self, ctx: &Context, entry: LogEntry) {
        match entry {
            LogEntry::Set { key, value } => self.apply_set(ctx, key, value),
            LogEntry::Del { key } => self.apply_del(ctx, &key),
            LogEntry::Expire { key, seconds } => self.apply_expire(ctx, &key, seconds),
            LogEntry::Persist { key } => self.apply_persist(ctx, &key),
        }
    }
}

impl ReplayTarget for StorageEngine {
    fn apply_set(&self, ctx: &Context, key: String, value: String) {
        self.set(ctx, key, value);
    }

    fn apply_del(&self, ctx: &Context, key: &str) {
        self.del(ctx, key);
    }

    fn apply_expire(&self, ctx: &Context, key: &str, seconds: i64) {
        self.expire(ctx, key, seconds);
    }

    fn apply_persist(&self, ctx: &Context, key: &str) {
        self.persist(ctx, key);
    }
}
