//! Append-Only Log
//!
//! Every write command that changed the key space is appended here as one text
//! line, then flushed and fsynced before the append returns. On startup the
//! whole file is replayed into a fresh storage engine.
//!
//! ## Durability Contract
//!
//! 1. Build the line `COMMAND arg1 arg2 ...\n`
//! 2. Write it to the end of the file
//! 3. Flush and `fsync`
//! 4. Only then report success
//!
//! Appends are serialized by a mutex that is independent of the key-space lock.
//!
//! A record never starts in the middle of a line. If the file ends without a
//! newline when it is opened (a crash mid-write), a terminator is written
//! first. A failed write leaves the writer in the same state, so the next
//! append starts with a terminator.
//!
//! ## Replay
//!
//! Replay reads the file from the beginning and applies each entry in order.
//! Lines that are blank, unknown, malformed or not valid UTF-8 are skipped one
//! by one, so a torn tail never costs the history in front of it. Lines longer
//! than [`MAX_RECORD_SIZE`] are skipped without being buffered in full. A
//! missing file is an empty history.

use crate::context::{Context, Interrupted};
use crate::persistence::entry::LogEntry;
use crate::persistence::ReplayTarget;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufReader,
    SeekFrom,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Longest record accepted, excluding the newline (64 KB)
pub const MAX_RECORD_SIZE: usize = 64 * 1024;

/// Errors raised by the append-only log.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    /// The context was done before the operation started
    #[error(transparent)]
    Interrupted(#[from] Interrupted),

    /// The log was closed
    #[error("append-only log is closed")]
    Closed,

    /// The record would not survive a round trip through the line format
    #[error("invalid log record: {0}")]
    InvalidRecord(String),

    /// The log file could not be opened or created
    #[error("failed to open log {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Writing the record failed
    #[error("log write failed: {0}")]
    Write(#[source] io::Error),

    /// Flushing the record to stable storage failed
    #[error("log fsync failed: {0}")]
    Sync(#[source] io::Error),

    /// Reading the log during replay failed
    #[error("failed to read log {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Counters reported by a replay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    /// Entries applied to the target
    pub applied: u64,
    /// Lines that were skipped as blank, unknown or malformed
    pub skipped: u64,
}

/// The append-only command log.
///
/// # Example
///
/// ```no_run
/// use tidekv::context::Context;
/// use tidekv::persistence::AppendLog;
/// use tidekv::storage::StorageEngine;
///
/// # async fn run() -> Result<(), tidekv::persistence::LogError> {
/// let ctx = Context::background();
/// let log = AppendLog::open("appendonly.aof").await?;
///
/// let engine = StorageEngine::new();
/// log.replay(&ctx, &engine).await?;
///
/// engine.set(&ctx, "name", "tide");
/// log.append(&ctx, "SET", &["name", "tide"]).await?;
///
/// log.close().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct AppendLog {
    /// Path to the log file
    path: PathBuf,
    /// Write handle; `None` once closed
    writer: Mutex<Option<Writer>>,
}

#[derive(Debug)]
struct Writer {
    file: File,
    /// The file may end mid-line; the next record starts with `\n`
    torn: bool,
}

impl AppendLog {
    /// Opens the log for appending, creating the file and its parent
    /// directories if they do not exist.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, LogError> {
        let path = path.as_ref().to_path_buf();
        let open_err = |source| LogError::Open {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(open_err)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(open_err)?;

        if ends_mid_line(&path).await.map_err(open_err)? {
            warn!(path = %path.display(), "Log ends with a torn record, terminating it");
            file.write_all(b"\n").await.map_err(open_err)?;
            file.flush().await.map_err(open_err)?;
            file.sync_all().await.map_err(open_err)?;
        }

        info!(path = %path.display(), "Append-only log opened");

        Ok(Self {
            path,
            writer: Mutex::new(Some(Writer { file, torn: false })),
        })
    }

    /// Returns the path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Durably records one write command.
    ///
    /// The line is `command` followed by the space-joined `args`. The call
    /// returns only after the line has been fsynced.
    ///
    /// # Errors
    ///
    /// - [`LogError::Interrupted`] if `ctx` is done before the write starts;
    ///   nothing is written
    /// - [`LogError::InvalidRecord`] if the command is empty or contains
    ///   whitespace, an argument contains a line break, or the line is longer
    ///   than [`MAX_RECORD_SIZE`]
    /// - [`LogError::Closed`] after [`close`](Self::close)
    /// - [`LogError::Write`] / [`LogError::Sync`] when the disk fails
    pub async fn append<S: AsRef<str>>(
        &self,
        ctx: &Context,
        command: &str,
        args: &[S],
    ) -> Result<(), LogError> {
        ctx.check()?;
        let line = format_line(command, args)?;

        let mut guard = self.writer.lock().await;
        // Waiting for the lock may have outlived the context
        ctx.check()?;
        let writer = guard.as_mut().ok_or(LogError::Closed)?;

        let terminator: &[u8] = if writer.torn { b"\n" } else { b"" };
        let record = [terminator, line.as_bytes()].concat();

        // Until the flush succeeds, part of the record may be on disk
        writer.torn = true;
        writer
            .file
            .write_all(&record)
            .await
            .map_err(LogError::Write)?;
        writer.file.flush().await.map_err(LogError::Write)?;
        writer.torn = false;
        writer.file.sync_all().await.map_err(LogError::Sync)?;

        debug!(command = command, bytes = line.len(), "Appended to log");
        Ok(())
    }

    /// Durably records a [`LogEntry`].
    pub async fn append_entry(&self, ctx: &Context, entry: &LogEntry) -> Result<(), LogError> {
        self.append(ctx, entry.command(), &entry.args()).await
    }

    /// Replays the whole log into `target`.
    ///
    /// Appends wait until the replay is done.
    pub async fn replay<T>(&self, ctx: &Context, target: &T) -> Result<ReplayStats, LogError>
    where
        T: ReplayTarget + ?Sized,
    {
        let _guard = self.writer.lock().await;
        replay_file(&self.path, ctx, target).await
    }

    /// Flushes and releases the file handle.
    ///
    /// Closing an already closed log is a no-op. Later appends fail with
    /// [`LogError::Closed`].
    pub async fn close(&self) -> Result<(), LogError> {
        let Some(Writer { mut file, .. }) = self.writer.lock().await.take() else {
            return Ok(());
        };

        file.flush().await.map_err(LogError::Write)?;
        file.sync_all().await.map_err(LogError::Sync)?;
        info!(path = %self.path.display(), "Append-only log closed");
        Ok(())
    }

    /// Whether [`close`](Self::close) has been called.
    pub async fn is_closed(&self) -> bool {
        self.writer.lock().await.is_none()
    }
}

/// Builds one newline-terminated log line.
fn format_line<S: AsRef<str>>(command: &str, args: &[S]) -> Result<String, LogError> {
    if command.is_empty() || command.chars().any(char::is_whitespace) {
        return Err(LogError::InvalidRecord(format!(
            "command name '{}' must be a single token",
            command.escape_debug()
        )));
    }

    let mut line = String::from(command);
    for arg in args {
        let arg = arg.as_ref();
        if arg.contains(['\n', '\r']) {
            return Err(LogError::InvalidRecord(format!(
                "argument '{}' contains a line break",
                arg.escape_debug()
            )));
        }
        line.push(' ');
        line.push_str(arg);
    }
    if line.len() > MAX_RECORD_SIZE {
        return Err(LogError::InvalidRecord(format!(
            "record of {} bytes exceeds the {} byte limit",
            line.len(),
            MAX_RECORD_SIZE
        )));
    }
    line.push('\n');
    Ok(line)
}

/// True if the file at `path` is non-empty and its last byte is not `\n`.
async fn ends_mid_line(path: &Path) -> io::Result<bool> {
    let mut file = File::open(path).await?;
    if file.metadata().await?.len() == 0 {
        return Ok(false);
    }

    file.seek(SeekFrom::End(-1)).await?;
    let last = file.read_u8().await?;
    Ok(last != b'\n')
}

/// Reads one line (terminator included) into `buf`, keeping at most `limit`
/// bytes of it. The rest of an over-long line is consumed and dropped.
///
/// Returns the number of bytes consumed and whether the line was cut short.
async fn read_bounded_line<R>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    limit: usize,
) -> io::Result<(usize, bool)>
where
    R: AsyncBufRead + Unpin,
{
    let mut consumed = 0;
    let mut truncated = false;

    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            break;
        }

        let (chunk, done) = match available.iter().position(|&b| b == b'\n') {
            Some(i) => (&available[..=i], true),
            None => (available, false),
        };

        let room = limit.saturating_sub(buf.len());
        if chunk.len() > room {
            truncated = true;
            buf.extend_from_slice(&chunk[..room]);
        } else {
            buf.extend_from_slice(chunk);
        }

        let n = chunk.len();
        reader.consume(n);
        consumed += n;
        if done {
            break;
        }
    }

    Ok((consumed, truncated))
}

/// Replays the log at `path` into `target` without opening it for writing.
///
/// A missing file replays as empty. Any other I/O error aborts the replay.
pub async fn replay_file<T>(path: &Path, ctx: &Context, target: &T) -> Result<ReplayStats, LogError>
where
    T: ReplayTarget + ?Sized,
{
    ctx.check()?;
    let read_err = |source| LogError::Read {
        path: path.to_path_buf(),
        source,
    };

    let file = match File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            info!(path = %path.display(), "No log file found, nothing to replay");
            return Ok(ReplayStats::default());
        }
        Err(e) => return Err(read_err(e)),
    };

    let mut reader = BufReader::new(file);
    let mut buf = Vec::new();
    let mut stats = ReplayStats::default();
    let mut line_no = 0u64;

    loop {
        buf.clear();
        let (n, truncated) = read_bounded_line(&mut reader, &mut buf, MAX_RECORD_SIZE + 1)
            .await
            .map_err(read_err)?;
        if n == 0 {
            break;
        }
        line_no += 1;
        ctx.check()?;

        if truncated {
            warn!(line = line_no, bytes = n, "Skipping oversized log line");
            stats.skipped += 1;
            continue;
        }

        let Ok(line) = std::str::from_utf8(&buf) else {
            warn!(line = line_no, "Skipping log line with invalid UTF-8");
            stats.skipped += 1;
            continue;
        };
        if line.trim().is_empty() {
            continue;
        }

        match LogEntry::parse(line) {
            Ok(entry) => {
                target.apply(ctx, entry);
                stats.applied += 1;
            }
            Err(e) => {
                warn!(line = line_no, error = %e, "Skipping malformed log line");
                stats.skipped += 1;
            }
        }
    }

    info!(
        path = %path.display(),
        applied = stats.applied,
        skipped = stats.skipped,
        "Log replay complete"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{StorageEngine, Ttl};
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    fn bg() -> Context {
        Context::background()
    }

    async fn open_temp() -> (TempDir, AppendLog) {
        let dir = tempfile::tempdir().unwrap();
        let log = AppendLog::open(dir.path().join("appendonly.aof"))
            .await
            .unwrap();
        (dir, log)
    }

    #[tokio::test]
    async fn test_append_writes_line_format() {
        let (_dir, log) = open_temp().await;

        log.append(&bg(), "SET", &["a", "1"]).await.unwrap();
        log.append(&bg(), "SET", &["msg", "hello world"]).await.unwrap();
        log.append(&bg(), "DEL", &["a"]).await.unwrap();
        log.append::<&str>(&bg(), "PING", &[]).await.unwrap();

        let contents = tokio::fs::read_to_string(log.path()).await.unwrap();
        assert_eq!(contents, "SET a 1\nSET msg hello world\nDEL a\nPING\n");
    }

    #[tokio::test]
    async fn test_durability_round_trip() {
        let (_dir, log) = open_temp().await;

        log.append(&bg(), "SET", &["a", "1"]).await.unwrap();
        log.append(&bg(), "SET", &["b", "2"]).await.unwrap();
        log.append(&bg(), "DEL", &["a"]).await.unwrap();
        log.close().await.unwrap();

        let engine = StorageEngine::new();
        let stats = replay_file(log.path(), &bg(), &engine).await.unwrap();

        assert_eq!(stats, ReplayStats { applied: 3, skipped: 0 });
        assert_eq!(engine.get(&bg(), "a"), None);
        assert_eq!(engine.get(&bg(), "b"), Some("2".to_string()));
    }

    #[tokio::test]
    async fn test_replay_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("appendonly.aof");

        {
            let log = AppendLog::open(&path).await.unwrap();
            let entry = LogEntry::Set {
                key: "quote".to_string(),
                value: "to be or not".to_string(),
            };
            log.append_entry(&bg(), &entry).await.unwrap();
            log.append(&bg(), "EXPIRE", &["quote", "100"]).await.unwrap();
            log.close().await.unwrap();
        }

        let log = AppendLog::open(&path).await.unwrap();
        let engine = StorageEngine::new();
        log.replay(&bg(), &engine).await.unwrap();

        assert_eq!(engine.get(&bg(), "quote"), Some("to be or not".to_string()));
        assert!(matches!(engine.ttl(&bg(), "quote"), Ttl::Remaining(s) if s > 98 && s <= 100));
    }

    #[tokio::test]
    async fn test_replay_persist() {
        let (_dir, log) = open_temp().await;

        log.append(&bg(), "SET", &["k", "v"]).await.unwrap();
        log.append(&bg(), "EXPIRE", &["k", "50"]).await.unwrap();
        log.append(&bg(), "PERSIST", &["k"]).await.unwrap();

        let engine = StorageEngine::new();
        log.replay(&bg(), &engine).await.unwrap();
        assert_eq!(engine.ttl(&bg(), "k"), Ttl::NoExpiry);
    }

    #[tokio::test]
    async fn test_replay_skips_malformed_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("appendonly.aof");
        let mut raw = b"SET a 1\nFLUSHALL\n\nSET  spaced   out   value\nDEL\n".to_vec();
        raw.extend_from_slice(b"SET bad \xff\xfe\n");
        raw.extend_from_slice(b"set b 2\nEXPIRE onlykey");
        tokio::fs::write(&path, raw).await.unwrap();

        let engine = StorageEngine::new();
        let stats = replay_file(&path, &bg(), &engine).await.unwrap();

        assert_eq!(stats, ReplayStats { applied: 3, skipped: 4 });
        assert_eq!(engine.get(&bg(), "a"), Some("1".to_string()));
        assert_eq!(engine.get(&bg(), "spaced"), Some("out value".to_string()));
        assert_eq!(engine.get(&bg(), "b"), Some("2".to_string()));
        assert_eq!(engine.get(&bg(), "bad"), None);
        assert_eq!(engine.size(&bg()), 3);
    }

    #[tokio::test]
    async fn test_open_terminates_torn_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("appendonly.aof");
        tokio::fs::write(&path, "SET a 1\nEXPIRE onlykey").await.unwrap();

        let log = AppendLog::open(&path).await.unwrap();
        let engine = StorageEngine::new();
        let stats = log.replay(&bg(), &engine).await.unwrap();
        assert_eq!(stats, ReplayStats { applied: 1, skipped: 1 });

        log.append(&bg(), "SET", &["b", "2"]).await.unwrap();
        log.close().await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(contents, "SET a 1\nEXPIRE onlykey\nSET b 2\n");

        let restored = StorageEngine::new();
        let stats = replay_file(&path, &bg(), &restored).await.unwrap();
        assert_eq!(stats, ReplayStats { applied: 2, skipped: 1 });
        assert_eq!(restored.get(&bg(), "a"), Some("1".to_string()));
        assert_eq!(restored.get(&bg(), "b"), Some("2".to_string()));
    }

    #[tokio::test]
    async fn test_open_keeps_clean_file_as_is() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("appendonly.aof");
        tokio::fs::write(&path, "SET a 1\n").await.unwrap();

        let log = AppendLog::open(&path).await.unwrap();
        log.append(&bg(), "DEL", &["a"]).await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(contents, "SET a 1\nDEL a\n");
    }

    #[tokio::test]
    async fn test_append_after_failed_write_starts_new_line() {
        let (_dir, log) = open_temp().await;
        log.append(&bg(), "SET", &["a", "1"]).await.unwrap();

        // State left behind by a write that failed part-way
        log.writer.lock().await.as_mut().unwrap().torn = true;
        let mut partial = tokio::fs::OpenOptions::new()
            .append(true)
            .open(log.path())
            .await
            .unwrap();
        partial.write_all(b"SET hal").await.unwrap();
        partial.flush().await.unwrap();
        drop(partial);

        log.append(&bg(), "SET", &["b", "2"]).await.unwrap();
        log.append(&bg(), "SET", &["c", "3"]).await.unwrap();

        let contents = tokio::fs::read_to_string(log.path()).await.unwrap();
        assert_eq!(contents, "SET a 1\nSET hal\nSET b 2\nSET c 3\n");

        let engine = StorageEngine::new();
        let stats = log.replay(&bg(), &engine).await.unwrap();
        assert_eq!(stats, ReplayStats { applied: 3, skipped: 1 });
    }

    #[tokio::test]
    async fn test_replay_skips_oversized_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("appendonly.aof");

        let mut raw = b"SET a 1\nSET big ".to_vec();
        raw.extend(std::iter::repeat(b'x').take(MAX_RECORD_SIZE + 100));
        raw.extend_from_slice(b"\nSET b 2\n");
        // A corrupt tail with no newline at all
        raw.extend(std::iter::repeat(b'y').take(MAX_RECORD_SIZE * 2));
        tokio::fs::write(&path, raw).await.unwrap();

        let engine = StorageEngine::new();
        let stats = replay_file(&path, &bg(), &engine).await.unwrap();

        assert_eq!(stats, ReplayStats { applied: 2, skipped: 2 });
        assert_eq!(engine.get(&bg(), "a"), Some("1".to_string()));
        assert_eq!(engine.get(&bg(), "b"), Some("2".to_string()));
        assert_eq!(engine.get(&bg(), "big"), None);
    }

    #[tokio::test]
    async fn test_replay_accepts_record_at_size_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("appendonly.aof");
        let value = "v".repeat(MAX_RECORD_SIZE - "SET k ".len());

        let log = AppendLog::open(&path).await.unwrap();
        log.append(&bg(), "SET", &["k", value.as_str()]).await.unwrap();

        let too_long = format!("{}v", value);
        let result = log.append(&bg(), "SET", &["k", too_long.as_str()]).await;
        assert!(matches!(result, Err(LogError::InvalidRecord(_))));

        let engine = StorageEngine::new();
        let stats = log.replay(&bg(), &engine).await.unwrap();
        assert_eq!(stats, ReplayStats { applied: 1, skipped: 0 });
        assert_eq!(engine.get(&bg(), "k"), Some(value));
    }

    #[tokio::test]
    async fn test_replay_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let engine = StorageEngine::new();

        let stats = replay_file(&dir.path().join("nope.aof"), &bg(), &engine)
            .await
            .unwrap();
        assert_eq!(stats, ReplayStats::default());
        assert_eq!(engine.size(&bg()), 0);
    }

    #[tokio::test]
    async fn test_replay_directory_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let engine = StorageEngine::new();

        let result = replay_file(dir.path(), &bg(), &engine).await;
        assert!(matches!(result, Err(LogError::Read { .. })));
    }

    #[tokio::test]
    async fn test_append_after_close_fails() {
        let (_dir, log) = open_temp().await;

        log.close().await.unwrap();
        assert!(log.is_closed().await);
        // Closing twice is fine
        log.close().await.unwrap();

        let result = log.append(&bg(), "SET", &["a", "1"]).await;
        assert!(matches!(result, Err(LogError::Closed)));
    }

    #[tokio::test]
    async fn test_canceled_append_writes_nothing() {
        let (_dir, log) = open_temp().await;

        let token = CancellationToken::new();
        token.cancel();
        let ctx = Context::with_token(token);

        let result = log.append(&ctx, "SET", &["a", "1"]).await;
        assert!(matches!(
            result,
            Err(LogError::Interrupted(Interrupted::Canceled))
        ));

        let result = log.replay(&ctx, &StorageEngine::new()).await;
        assert!(matches!(
            result,
            Err(LogError::Interrupted(Interrupted::Canceled))
        ));

        let contents = tokio::fs::read_to_string(log.path()).await.unwrap();
        assert!(contents.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_records_rejected() {
        let (_dir, log) = open_temp().await;

        let result = log.append(&bg(), "SET", &["a", "line\nbreak"]).await;
        assert!(matches!(result, Err(LogError::InvalidRecord(_))));

        let result = log.append(&bg(), "BAD CMD", &["a"]).await;
        assert!(matches!(result, Err(LogError::InvalidRecord(_))));

        let result = log.append::<&str>(&bg(), "", &[]).await;
        assert!(matches!(result, Err(LogError::InvalidRecord(_))));

        let contents = tokio::fs::read_to_string(log.path()).await.unwrap();
        assert!(contents.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_appends_are_serialized() {
        let (_dir, log) = open_temp().await;
        let log = Arc::new(log);

        let mut handles = Vec::new();
        for i in 0..32 {
            let log = Arc::clone(&log);
            handles.push(tokio::spawn(async move {
                let key = format!("key{}", i);
                let value = format!("value number {}", i);
                log.append(&Context::background(), "SET", &[key, value])
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let contents = tokio::fs::read_to_string(log.path()).await.unwrap();
        assert_eq!(contents.lines().count(), 32);
        assert!(contents.lines().all(|l| l.starts_with("SET key")));

        let engine = StorageEngine::new();
        let stats = log.replay(&bg(), &engine).await.unwrap();
        assert_eq!(stats.applied, 32);
        assert_eq!(engine.get(&bg(), "key17"), Some("value number 17".to_string()));
    }
}
