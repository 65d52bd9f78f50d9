//! # TideKV - An In-Memory Key-Value Store with Expiry and an Append-Only Log
//!
//! TideKV keeps string keys and values in memory. Any key can be given a
//! lifetime in seconds, after which it disappears. Every write is also appended
//! to a plain-text log, and the log is replayed at startup to rebuild the
//! store.
//!
//! ## Features
//!
//! - **Per-key expiry**: expired keys are invisible to reads immediately and
//!   reclaimed by a background sweeper
//! - **Durable writes**: each logged command is fsynced before the reply
//! - **Cancellation**: every operation takes a [`Context`] and refuses to
//!   start once it is canceled or past its deadline
//! - **Async I/O**: built on Tokio; a simple line protocol over TCP
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              TideKV                                     │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │ TCP Server  │───>│ Connection  │───>│  Command    │                  │
//! │  │ (Listener)  │    │  Handler    │    │  Handler    │                  │
//! │  └─────────────┘    └─────────────┘    └──┬───────┬──┘                  │
//! │                                           │       │                     │
//! │                                           ▼       ▼                     │
//! │  ┌──────────────────────────────────┐  ┌──────────────────────┐         │
//! │  │         StorageEngine            │  │      AppendLog       │         │
//! │  │  RwLock<HashMap<String, Item>>   │  │  (one line / write)  │         │
//! │  └──────────────────────────────────┘  └──────────────────────┘         │
//! │                   ▲                               │                     │
//! │                   │ cleanup_expired()             │ replay at startup   │
//! │  ┌────────────────┴────────────────┐              │                     │
//! │  │         ExpirySweeper           │<─────────────┘                     │
//! │  │     (Background Tokio Task)     │                                    │
//! │  └─────────────────────────────────┘                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use tidekv::context::Context;
//! use tidekv::persistence::AppendLog;
//! use tidekv::storage::StorageEngine;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let ctx = Context::background();
//!     let storage = Arc::new(StorageEngine::new());
//!
//!     // Rebuild state from the log
//!     let log = AppendLog::open("appendonly.aof").await?;
//!     log.replay(&ctx, storage.as_ref()).await?;
//!
//!     storage.start_cleanup(Duration::from_secs(1))?;
//!
//!     storage.set(&ctx, "greeting", "hello");
//!     log.append(&ctx, "SET", &["greeting", "hello"]).await?;
//!
//!     storage.stop_cleanup();
//!     log.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`storage`]: Thread-safe store with per-key expiry and the sweeper
//! - [`persistence`]: The append-only log and replay
//! - [`protocol`]: Request line parsing and reply formatting
//! - [`commands`]: Command routing on top of storage and the log
//! - [`connection`]: Client connection management
//! - [`context`]: Cancellation and deadlines
//! - [`config`]: Command-line configuration
//!
//! ## Lazy + Active Expiry
//!
//! Keys with a TTL are expired in two ways:
//! 1. **Lazy**: reads check the expiry and treat an expired key as missing
//! 2. **Active**: a background task periodically removes expired keys
//!
//! This ensures memory is reclaimed even for keys that are never accessed again.

pub mod commands;
pub mod config;
pub mod connection;
pub mod context;
pub mod persistence;
pub mod protocol;
pub mod storage;

// Re-export commonly used types for convenience
pub use commands::CommandHandler;
pub use config::{Config, Invocation};
pub use connection::{handle_connection, ConnectionStats};
pub use context::{Context, Interrupted};
pub use persistence::{AppendLog, LogError, ReplayTarget};
pub use protocol::{parse_line, Command, CommandType, Reply};
pub use storage::{DelStatus, StorageEngine, Ttl};

/// The default port TideKV listens on
pub const DEFAULT_PORT: u16 = 6380;

/// The default host TideKV binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of TideKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
