//! Storage Engine Module
//!
//! This module provides the key space for TideKV: a thread-safe map of
//! [`Item`]s with optional expiry, plus the background sweeper that reclaims
//! expired items.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     StorageEngine                           │
//! │           RwLock<HashMap<String, Item>>                     │
//! └─────────────────────────────────────────────────────────────┘
//!                            ▲
//!                            │ Weak
//!              ┌─────────────┴─────────────┐
//!              │     ExpirySweeper         │
//!              │  (Background Tokio Task)  │
//!              └───────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **RwLock**: Multiple concurrent readers, exclusive writers
//! - **TTL Support**: Keys can be given an expiry in seconds
//! - **Lazy Expiry**: Reads never return expired values
//! - **Active Expiry**: Background sweeper removes expired items
//! - **Glob Matching**: `KEYS` patterns with `*`, `?` and character classes
//!
//! ## Example
//!
//! ```
//! use tidekv::context::Context;
//! use tidekv::storage::{DelStatus, StorageEngine};
//!
//! let ctx = Context::background();
//! let engine = StorageEngine::new();
//!
//! engine.set(&ctx, "session", "token123");
//! engine.expire(&ctx, "session", 3600);
//! assert!(engine.exists(&ctx, "session"));
//!
//! assert_eq!(engine.del(&ctx, "session"), DelStatus::Removed);
//! assert_eq!(engine.del(&ctx, "session"), DelStatus::NotFound);
//! ```

pub mod engine;
pub mod expiry;
pub mod glob;
pub mod item;

// Re-export commonly used types
pub use engine::{DelStatus, StorageEngine, StorageStats, Ttl};
pub use expiry::{ExpiryConfig, ExpirySweeper, SweeperError};
pub use glob::{match_key, GlobPattern, KeyMatcher, PatternError};
pub use item::{unix_now, Item};
