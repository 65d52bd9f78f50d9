//! Command Handler Module
//!
//! This module implements every TideKV command on top of the storage engine,
//! and records successful writes in the append-only log.
//!
//! ## Supported Commands
//!
//! ### Write Commands (logged)
//! - `SET key value...` - Set a key; the value is every token after the key
//! - `DEL key` - Delete a key
//! - `EXPIRE key seconds` - Set expiry
//! - `PERSIST key` - Remove expiry
//!
//! ### Read Commands
//! - `GET key` - Get a key's value
//! - `TTL key` - Remaining TTL (`-1` no expiry, `-2` no such key)
//! - `EXISTS key` - `1` if the key is live, else `0`
//! - `KEYS [pattern]` - Live keys matching a glob (default `*`)
//! - `DBSIZE` - Number of entries, including unswept expired ones
//!
//! ### Server Commands
//! - `PING [message]` - Test connection
//! - `INFO` - Server information
//! - `QUIT` - Close the connection
//!
//! ## Write Path
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     CommandHandler                          │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐     │
//! │  │  validate   │───>│ StorageEngine│───>│ AppendLog   │     │
//! │  │  arguments  │    │  (mutation)  │    │  (fsync)    │     │
//! │  └─────────────┘    └─────────────┘    └─────────────┘     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The log is only written after the storage call returned and only when the
//! write changed something. The storage lock is never held during the append.

use crate::context::Context;
use crate::persistence::{AppendLog, LogEntry};
use crate::protocol::{Command, CommandType, Reply};
use crate::storage::{DelStatus, StorageEngine, Ttl};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error};

/// Handles commands by dispatching them to the storage engine.
#[derive(Clone)]
pub struct CommandHandler {
    /// The storage engine
    storage: Arc<StorageEngine>,
    /// The append-only log, when persistence is enabled
    log: Option<Arc<AppendLog>>,
    /// Server start time for INFO command
    start_time: Instant,
}

impl CommandHandler {
    /// Creates a command handler without persistence.
    pub fn new(storage: Arc<StorageEngine>) -> Self {
        Self {
            storage,
            log: None,
            start_time: Instant::now(),
        }
    }

    /// Creates a command handler that records writes in `log`.
    pub fn with_log(storage: Arc<StorageEngine>, log: Arc<AppendLog>) -> Self {
        Self {
            storage,
            log: Some(log),
            start_time: Instant::now(),
        }
    }

    /// Executes a command and returns the reply.
    pub async fn execute(&self, ctx: &Context, command: Command) -> Reply {
        if let Err(e) = ctx.check() {
            return Reply::error(e.to_string());
        }

        let Command { kind, args } = command;
        match kind {
            CommandType::Set => self.cmd_set(ctx, args).await,
            CommandType::Get => self.cmd_get(ctx, &args),
            CommandType::Del => self.cmd_del(ctx, &args).await,
            CommandType::Expire => self.cmd_expire(ctx, &args).await,
            CommandType::Ttl => self.cmd_ttl(ctx, &args),
            CommandType::Persist => self.cmd_persist(ctx, &args).await,
            CommandType::Keys => self.cmd_keys(ctx, &args),
            CommandType::Exists => self.cmd_exists(ctx, &args),
            CommandType::DbSize => self.cmd_dbsize(ctx, &args),
            CommandType::Ping => self.cmd_ping(&args),
            CommandType::Info => self.cmd_info(&args),
            CommandType::Quit => Reply::Ok,
        }
    }

    // ========================================================================
    // Helper functions
    // ========================================================================

    fn wrong_arity(kind: CommandType) -> Reply {
        Reply::error(format!("wrong number of arguments for '{}'", kind))
    }

    /// Extracts the single key argument of a one-key command.
    fn single_key(kind: CommandType, args: &[String]) -> Result<&str, Reply> {
        match args {
            [key] => Ok(key),
            _ => Err(Self::wrong_arity(kind)),
        }
    }

    /// Appends an applied write to the log.
    ///
    /// The storage mutation has already happened, so a failure here is reported
    /// to the client but not rolled back.
    async fn record(&self, ctx: &Context, entry: LogEntry, ok: Reply) -> Reply {
        let Some(log) = &self.log else {
            return ok;
        };

        match log.append_entry(ctx, &entry).await {
            Ok(()) => ok,
            Err(e) => {
                error!(
                    command = entry.command(),
                    key = entry.key(),
                    error = %e,
                    "Write applied in memory but not persisted"
                );
                Reply::error(format!("persistence failure: {}", e))
            }
        }
    }

    // ========================================================================
    // Write Commands
    // ========================================================================

    /// SET key value...
    async fn cmd_set(&self, ctx: &Context, mut args: Vec<String>) -> Reply {
        if args.len() < 2 {
            return Self::wrong_arity(CommandType::Set);
        }

        let value = args.split_off(1).join(" ");
        let key = args.swap_remove(0);

        if !self.storage.set(ctx, key.clone(), value.clone()) {
            return Reply::error("operation canceled");
        }
        self.record(ctx, LogEntry::Set { key, value }, Reply::Ok).await
    }

    /// DEL key
    async fn cmd_del(&self, ctx: &Context, args: &[String]) -> Reply {
        let key = match Self::single_key(CommandType::Del, args) {
            Ok(k) => k,
            Err(reply) => return reply,
        };

        match self.storage.del(ctx, key) {
            DelStatus::Removed => {
                let entry = LogEntry::Del {
                    key: key.to_string(),
                };
                self.record(ctx, entry, Reply::Integer(1)).await
            }
            DelStatus::NotFound => Reply::Integer(0),
            DelStatus::Canceled => Reply::error("operation canceled"),
        }
    }

    /// EXPIRE key seconds
    async fn cmd_expire(&self, ctx: &Context, args: &[String]) -> Reply {
        let [key, seconds] = args else {
            return Self::wrong_arity(CommandType::Expire);
        };
        let Ok(seconds) = seconds.parse::<i64>() else {
            return Reply::error("value is not an integer or out of range");
        };

        if !self.storage.expire(ctx, key, seconds) {
            debug!(key = %key, "EXPIRE on missing key");
            return Reply::error("key not found");
        }

        let entry = LogEntry::Expire {
            key: key.clone(),
            seconds,
        };
        self.record(ctx, entry, Reply::Ok).await
    }

    /// PERSIST key
    async fn cmd_persist(&self, ctx: &Context, args: &[String]) -> Reply {
        let key = match Self::single_key(CommandType::Persist, args) {
            Ok(k) => k,
            Err(reply) => return reply,
        };

        if !self.storage.persist(ctx, key) {
            return Reply::error("key not found");
        }

        let entry = LogEntry::Persist {
            key: key.to_string(),
        };
        self.record(ctx, entry, Reply::Ok).await
    }

    // ========================================================================
    // Read Commands
    // ========================================================================

    /// GET key
    fn cmd_get(&self, ctx: &Context, args: &[String]) -> Reply {
        let key = match Self::single_key(CommandType::Get, args) {
            Ok(k) => k,
            Err(reply) => return reply,
        };

        match self.storage.get(ctx, key) {
            Some(value) => Reply::Text(value),
            None => Reply::Nil,
        }
    }

    /// TTL key
    fn cmd_ttl(&self, ctx: &Context, args: &[String]) -> Reply {
        let key = match Self::single_key(CommandType::Ttl, args) {
            Ok(k) => k,
            Err(reply) => return reply,
        };

        match self.storage.ttl(ctx, key) {
            Ttl::Remaining(secs) => Reply::Integer(i64::try_from(secs).unwrap_or(i64::MAX)),
            Ttl::NoExpiry => Reply::Integer(-1),
            Ttl::NotFound => Reply::Integer(-2),
            Ttl::Canceled => Reply::error("operation canceled"),
        }
    }

    /// EXISTS key
    fn cmd_exists(&self, ctx: &Context, args: &[String]) -> Reply {
        match Self::single_key(CommandType::Exists, args) {
            Ok(key) => Reply::from(self.storage.exists(ctx, key)),
            Err(reply) => reply,
        }
    }

    /// KEYS [pattern]
    fn cmd_keys(&self, ctx: &Context, args: &[String]) -> Reply {
        let pattern = match args {
            [] => "*",
            [pattern] => pattern.as_str(),
            _ => return Self::wrong_arity(CommandType::Keys),
        };

        let mut keys = self.storage.keys(ctx, pattern);
        keys.sort_unstable();
        Reply::List(keys)
    }

    /// DBSIZE
    fn cmd_dbsize(&self, ctx: &Context, args: &[String]) -> Reply {
        if !args.is_empty() {
            return Self::wrong_arity(CommandType::DbSize);
        }
        Reply::Integer(self.storage.size(ctx) as i64)
    }

    // ========================================================================
    // Server Commands
    // ========================================================================

    /// PING [message]
    fn cmd_ping(&self, args: &[String]) -> Reply {
        if args.is_empty() {
            Reply::text("PONG")
        } else {
            Reply::Text(args.join(" "))
        }
    }

    /// INFO
    fn cmd_info(&self, args: &[String]) -> Reply {
        if !args.is_empty() {
            return Self::wrong_arity(CommandType::Info);
        }

        let stats = self.storage.stats();
        let persistence = match &self.log {
            Some(log) => log.path().display().to_string(),
            None => "disabled".to_string(),
        };

        Reply::Text(format!(
            "version:{} uptime_secs:{} keys:{} get_ops:{} set_ops:{} del_ops:{} expired:{} sweeper:{} aof:{}",
            crate::VERSION,
            self.start_time.elapsed().as_secs(),
            stats.keys,
            stats.get_ops,
            stats.set_ops,
            stats.del_ops,
            stats.expired,
            if self.storage.is_cleanup_running() { "running" } else { "stopped" },
            persistence,
        ))
    }
}
