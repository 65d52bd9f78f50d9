//! Connection Handler Module
//!
//! This module handles individual client connections to TideKV.
//! Each client gets its own handler task that runs in a loop,
//! reading request lines and sending replies.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! 1. Client connects (TCP handshake)
//!        │
//!        ▼
//! 2. ConnectionHandler spawned
//!        │
//!        ▼
//! 3. ┌──────────────────────────────┐
//!    │      Main Loop               │
//!    │                              │
//!    │  ┌─────────────────────────┐ │
//!    │  │ Read bytes from socket  │ │
//!    │  └───────────┬─────────────┘ │
//!    │              ▼               │
//!    │  ┌─────────────────────────┐ │
//!    │  │ Split off a full line   │ │
//!    │  └───────────┬─────────────┘ │
//!    │              ▼               │
//!    │  ┌─────────────────────────┐ │
//!    │  │ Execute command         │ │
//!    │  └───────────┬─────────────┘ │
//!    │              ▼               │
//!    │  ┌─────────────────────────┐ │
//!    │  │ Send reply line         │ │
//!    │  └───────────┬─────────────┘ │
//!    │              ▼               │
//!    │         [Loop back]          │
//!    └──────────────────────────────┘
//!        │
//!        ▼
//! 4. QUIT / disconnect / shutdown / error
//! ```
//!
//! ## Buffer Management
//!
//! Incoming bytes accumulate in a `BytesMut` buffer. A read may carry half a
//! line or several lines at once, so lines are only split off once their `\n`
//! has arrived. A line longer than [`MAX_LINE_SIZE`] ends the connection.

use crate::commands::CommandHandler;
use crate::context::Context;
use crate::protocol::{parse_line, CommandType, Reply};
use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tracing::{debug, error, info, trace, warn};

/// Longest request line accepted (64 KB)
pub const MAX_LINE_SIZE: usize = 64 * 1024;

/// Initial buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Statistics for connection handling
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Total commands processed
    pub commands_processed: AtomicU64,
    /// Total bytes read
    pub bytes_read: AtomicU64,
    /// Total bytes written
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written.fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Handles a single client connection.
///
/// Generic over the stream so tests can drive it with an in-memory mock.
pub struct ConnectionHandler<S> {
    /// The client stream
    stream: BufWriter<S>,

    /// Client's address (for logging)
    addr: SocketAddr,

    /// Buffer for incoming data
    buffer: BytesMut,

    /// The command handler (shared across connections)
    command_handler: CommandHandler,

    /// Canceled when the server shuts down
    ctx: Context,

    /// Connection statistics (shared)
    stats: Arc<ConnectionStats>,
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Creates a new connection handler.
    pub fn new(
        stream: S,
        addr: SocketAddr,
        command_handler: CommandHandler,
        stats: Arc<ConnectionStats>,
        ctx: Context,
    ) -> Self {
        stats.connection_opened();

        Self {
            stream: BufWriter::new(stream),
            addr,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            command_handler,
            ctx,
            stats,
        }
    }

    /// Runs the connection until the client quits, disconnects, the context is
    /// canceled or an error occurs.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.addr, "Client connected");

        let result = self.main_loop().await;

        match &result {
            Ok(()) => info!(client = %self.addr, "Client disconnected gracefully"),
            Err(ConnectionError::ClientDisconnected) => {
                debug!(client = %self.addr, "Client disconnected")
            }
            Err(ConnectionError::IoError(io_err))
                if io_err.kind() == std::io::ErrorKind::ConnectionReset =>
            {
                debug!(client = %self.addr, "Connection reset by client")
            }
            Err(e) => warn!(client = %self.addr, error = %e, "Connection error"),
        }

        self.stats.connection_closed();
        result
    }

    /// The main read-execute-respond loop.
    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            while let Some(line) = self.next_line()? {
                if self.process_line(&line).await? {
                    return Ok(());
                }
            }

            if !self.read_more_data().await? {
                debug!(client = %self.addr, "Server shutting down, closing connection");
                return Ok(());
            }
        }
    }

    /// Splits the next complete line off the buffer, without its terminator.
    fn next_line(&mut self) -> Result<Option<BytesMut>, ConnectionError> {
        match self.buffer.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                let mut line = self.buffer.split_to(pos + 1);
                line.truncate(pos);
                if line.last() == Some(&b'\r') {
                    line.truncate(pos - 1);
                }
                trace!(
                    client = %self.addr,
                    len = line.len(),
                    remaining = self.buffer.len(),
                    "Split request line"
                );
                Ok(Some(line))
            }
            None if self.buffer.len() >= MAX_LINE_SIZE => {
                error!(
                    client = %self.addr,
                    size = self.buffer.len(),
                    "Request line exceeds size limit"
                );
                Err(ConnectionError::BufferFull)
            }
            None => Ok(None),
        }
    }

    /// Executes one request line. Returns true when the client asked to quit.
    async fn process_line(&mut self, line: &[u8]) -> Result<bool, ConnectionError> {
        let Ok(text) = std::str::from_utf8(line) else {
            self.send_reply(&Reply::error("request is not valid UTF-8"))
                .await?;
            return Ok(false);
        };

        if text.trim().is_empty() {
            return Ok(false);
        }

        let command = match parse_line(text) {
            Ok(command) => command,
            Err(e) => {
                debug!(client = %self.addr, error = %e, "Rejected request");
                self.send_reply(&Reply::error(e.to_string())).await?;
                return Ok(false);
            }
        };

        let quit = command.kind == CommandType::Quit;
        let reply = self.command_handler.execute(&self.ctx, command).await;
        self.stats.command_processed();
        self.send_reply(&reply).await?;

        Ok(quit)
    }

    /// Reads more data from the stream into the buffer.
    ///
    /// Returns `Ok(false)` if the context was canceled before data arrived.
    async fn read_more_data(&mut self) -> Result<bool, ConnectionError> {
        if self.buffer.capacity() - self.buffer.len() < 1024 {
            self.buffer.reserve(INITIAL_BUFFER_SIZE);
        }

        let token = self.ctx.token().cloned();
        let n = match token {
            Some(token) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => return Ok(false),
                    n = self.stream.get_mut().read_buf(&mut self.buffer) => n?,
                }
            }
            None => self.stream.get_mut().read_buf(&mut self.buffer).await?,
        };

        if n == 0 {
            if self.buffer.is_empty() {
                return Err(ConnectionError::ClientDisconnected);
            }
            return Err(ConnectionError::UnexpectedEof);
        }

        self.stats.bytes_read(n);
        trace!(client = %self.addr, bytes = n, "Read data");

        Ok(true)
    }

    /// Sends a reply line to the client.
    async fn send_reply(&mut self, reply: &Reply) -> Result<(), ConnectionError> {
        let line = reply.to_line();
        self.stream.write_all(line.as_bytes()).await?;
        self.stream.flush().await?;
        self.stats.bytes_written(line.len());
        trace!(client = %self.addr, bytes = line.len(), "Sent reply");
        Ok(())
    }
}

/// Errors that can occur while handling a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Client disconnected normally
    #[error("Client disconnected")]
    ClientDisconnected,

    /// Stream ended in the middle of a line
    #[error("Unexpected end of stream")]
    UnexpectedEof,

    /// A request line exceeded [`MAX_LINE_SIZE`]
    #[error("Request line exceeds size limit")]
    BufferFull,
}

/// Handles a client connection.
///
/// Creates a [`ConnectionHandler`] and runs it to completion, swallowing the
/// errors that are a normal part of a client going away.
pub async fn handle_connection<S>(
    stream: S,
    addr: SocketAddr,
    command_handler: CommandHandler,
    stats: Arc<ConnectionStats>,
    ctx: Context,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let handler = ConnectionHandler::new(stream, addr, command_handler, stats, ctx);
    if let Err(e) = handler.run().await {
        match e {
            ConnectionError::ClientDisconnected => {}
            ConnectionError::IoError(ref io_err)
                if io_err.kind() == std::io::ErrorKind::ConnectionReset => {}
            _ => {
                debug!(client = %addr, error = %e, "Connection ended with error");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageEngine;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio_test::io::Builder;
    use tokio_util::sync::CancellationToken;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:4000".parse().unwrap()
    }

    fn mock_handler<S>(stream: S) -> ConnectionHandler<S>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        ConnectionHandler::new(
            stream,
            test_addr(),
            CommandHandler::new(Arc::new(StorageEngine::new())),
            Arc::new(ConnectionStats::new()),
            Context::background(),
        )
    }

    async fn create_test_server() -> (
        SocketAddr,
        Arc<StorageEngine>,
        Arc<ConnectionStats>,
        CancellationToken,
    ) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let storage = Arc::new(StorageEngine::new());
        let stats = Arc::new(ConnectionStats::new());
        let token = CancellationToken::new();

        let storage_clone = Arc::clone(&storage);
        let stats_clone = Arc::clone(&stats);
        let ctx = Context::with_token(token.clone());

        tokio::spawn(async move {
            while let Ok((stream, client_addr)) = listener.accept().await {
                let handler = CommandHandler::new(Arc::clone(&storage_clone));
                let stats = Arc::clone(&stats_clone);
                tokio::spawn(handle_connection(
                    stream,
                    client_addr,
                    handler,
                    stats,
                    ctx.child(),
                ));
            }
        });

        (addr, storage, stats, token)
    }

    async fn read_reply(client: &mut TcpStream) -> String {
        let mut buf = [0u8; 256];
        let n = client.read(&mut buf).await.unwrap();
        String::from_utf8_lossy(&buf[..n]).into_owned()
    }

    #[tokio::test]
    async fn test_mock_ping() {
        let stream = Builder::new().read(b"PING\n").write(b"PONG\n").build();
        let result = mock_handler(stream).run().await;
        assert!(matches!(result, Err(ConnectionError::ClientDisconnected)));
    }

    #[tokio::test]
    async fn test_mock_crlf_and_blank_lines() {
        let stream = Builder::new()
            .read(b"\r\n\n  \nSET k v\r\nGET k\r\n")
            .write(b"OK\n")
            .write(b"v\n")
            .build();
        let result = mock_handler(stream).run().await;
        assert!(matches!(result, Err(ConnectionError::ClientDisconnected)));
    }

    #[tokio::test]
    async fn test_mock_line_split_across_reads() {
        let stream = Builder::new()
            .read(b"SET na")
            .read(b"me tide\nGE")
            .write(b"OK\n")
            .read(b"T name\n")
            .write(b"tide\n")
            .build();
        let result = mock_handler(stream).run().await;
        assert!(matches!(result, Err(ConnectionError::ClientDisconnected)));
    }

    #[tokio::test]
    async fn test_mock_unknown_command_keeps_connection() {
        let stream = Builder::new()
            .read(b"FLY away\nPING\n")
            .write(b"ERR: unknown command: FLY\n")
            .write(b"PONG\n")
            .build();
        let result = mock_handler(stream).run().await;
        assert!(matches!(result, Err(ConnectionError::ClientDisconnected)));
    }

    #[tokio::test]
    async fn test_mock_quit_stops_processing() {
        let stream = Builder::new()
            .read(b"PING\nQUIT\nPING\n")
            .write(b"PONG\n")
            .write(b"OK\n")
            .build();
        assert!(mock_handler(stream).run().await.is_ok());
    }

    #[tokio::test]
    async fn test_mock_partial_line_at_eof() {
        let stream = Builder::new().read(b"PING").build();
        let result = mock_handler(stream).run().await;
        assert!(matches!(result, Err(ConnectionError::UnexpectedEof)));
    }

    #[tokio::test]
    async fn test_mock_oversized_line() {
        let data = vec![b'a'; MAX_LINE_SIZE];
        let stream = Builder::new().read(&data).build();
        let result = mock_handler(stream).run().await;
        assert!(matches!(result, Err(ConnectionError::BufferFull)));
    }

    #[tokio::test]
    async fn test_mock_canceled_context_closes() {
        let token = CancellationToken::new();
        token.cancel();

        let handler = ConnectionHandler::new(
            Builder::new().build(),
            test_addr(),
            CommandHandler::new(Arc::new(StorageEngine::new())),
            Arc::new(ConnectionStats::new()),
            Context::with_token(token),
        );
        assert!(handler.run().await.is_ok());
    }

    #[tokio::test]
    async fn test_ping_pong() {
        let (addr, _, _, _) = create_test_server().await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"PING\n").await.unwrap();

        assert_eq!(read_reply(&mut client).await, "PONG\n");
    }

    #[tokio::test]
    async fn test_set_get() {
        let (addr, storage, _, _) = create_test_server().await;

        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"SET name tide\n").await.unwrap();
        assert_eq!(read_reply(&mut client).await, "OK\n");

        client.write_all(b"GET name\n").await.unwrap();
        assert_eq!(read_reply(&mut client).await, "tide\n");

        assert_eq!(
            storage.get(&Context::background(), "name"),
            Some("tide".to_string())
        );
    }

    #[tokio::test]
    async fn test_multiple_commands() {
        let (addr, _, _, _) = create_test_server().await;

        let mut client = TcpStream::connect(addr).await.unwrap();

        // Several requests in a single write
        client
            .write_all(b"SET k1 v1\nSET k2 v2\nGET k1\nGET k2\n")
            .await
            .unwrap();

        let expected = "OK\nOK\nv1\nv2\n";
        let mut buf = vec![0u8; 256];
        let mut total = 0;

        let timeout = tokio::time::Duration::from_secs(2);
        let deadline = tokio::time::Instant::now() + timeout;

        while total < expected.len() && tokio::time::Instant::now() < deadline {
            match tokio::time::timeout(
                tokio::time::Duration::from_millis(100),
                client.read(&mut buf[total..]),
            )
            .await
            {
                Ok(Ok(n)) if n > 0 => total += n,
                _ => break,
            }
        }

        assert_eq!(String::from_utf8_lossy(&buf[..total]), expected);
    }

    #[tokio::test]
    async fn test_quit_closes_socket() {
        let (addr, _, _, _) = create_test_server().await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"QUIT\n").await.unwrap();
        assert_eq!(read_reply(&mut client).await, "OK\n");

        let mut buf = [0u8; 16];
        let n = tokio::time::timeout(
            tokio::time::Duration::from_secs(2),
            client.read(&mut buf),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_shutdown_closes_idle_connections() {
        let (addr, _, stats, token) = create_test_server().await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"PING\n").await.unwrap();
        assert_eq!(read_reply(&mut client).await, "PONG\n");

        token.cancel();

        let mut buf = [0u8; 16];
        let n = tokio::time::timeout(
            tokio::time::Duration::from_secs(2),
            client.read(&mut buf),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(n, 0);

        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_connection_stats() {
        let (addr, _, stats, _) = create_test_server().await;

        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);

        let mut client = TcpStream::connect(addr).await.unwrap();

        // Give the server time to accept the connection
        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;

        assert_eq!(stats.connections_accepted.load(Ordering::Relaxed), 1);
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 1);

        client.write_all(b"PING\n").await.unwrap();
        let _ = read_reply(&mut client).await;

        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;

        assert!(stats.commands_processed.load(Ordering::Relaxed) >= 1);
        assert_eq!(stats.bytes_read.load(Ordering::Relaxed), 5);
        assert_eq!(stats.bytes_written.load(Ordering::Relaxed), 5);

        drop(client);

        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;

        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);
    }
}
