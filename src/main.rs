//! TideKV - An In-Memory Key-Value Store with Expiry and an Append-Only Log
//!
//! This is the main entry point for the TideKV server.
//! It rebuilds the store from the log, then accepts client connections until
//! Ctrl+C.

use anyhow::Context as _;
use std::sync::Arc;
use std::time::Duration;
use tidekv::commands::CommandHandler;
use tidekv::config::{Config, Invocation};
use tidekv::connection::{handle_connection, ConnectionStats};
use tidekv::context::Context;
use tidekv::persistence::AppendLog;
use tidekv::storage::StorageEngine;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// How long open connections get to finish after the shutdown signal
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

fn print_help() {
    println!(
        r#"
TideKV - An In-Memory Key-Value Store with Expiry and an Append-Only Log

USAGE:
    tidekv [OPTIONS]

OPTIONS:
    -h, --host <HOST>                Host to bind to (default: 127.0.0.1)
    -p, --port <PORT>                Port to listen on (default: 6380)
        --aof <PATH>                 Append-only log file (default: appendonly.aof)
        --no-aof                     Disable persistence
        --cleanup-interval-ms <MS>   Expiry sweep interval (default: 1000)
        --log-level <LEVEL>          Log level if RUST_LOG is unset (default: info)
    -v, --version                    Print version information
        --help                       Print this help message

EXAMPLES:
    tidekv                               # Start on 127.0.0.1:6380
    tidekv --port 7000 --aof data/tide.aof
    tidekv --no-aof --cleanup-interval-ms 250

CONNECTING:
    The protocol is one command per line:
    $ nc 127.0.0.1 6380
    SET name tide
    OK
    EXPIRE name 60
    OK
    TTL name
    60
"#
    );
}

fn print_banner(config: &Config) {
    let persistence = match &config.aof_path {
        Some(path) => path.display().to_string(),
        None => "disabled".to_string(),
    };

    println!(
        r#"
TideKV v{}
──────────────────────────────────────────────────────────────
Listening on   {}
Append log     {}
Sweep interval {} ms

Use Ctrl+C to shutdown gracefully.
"#,
        tidekv::VERSION,
        config.bind_address(),
        persistence,
        config.cleanup_interval.as_millis(),
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match Config::from_args(std::env::args().skip(1)) {
        Ok(Invocation::Run(config)) => config,
        Ok(Invocation::Help) => {
            print_help();
            return Ok(());
        }
        Ok(Invocation::Version) => {
            println!("TideKV version {}", tidekv::VERSION);
            return Ok(());
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            print_help();
            std::process::exit(1);
        }
    };

    // RUST_LOG takes precedence over --log-level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .with_context(|| format!("invalid log level '{}'", config.log_level))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    let root = CancellationToken::new();
    let ctx = Context::with_token(root.clone());

    let storage = Arc::new(StorageEngine::new());

    // Rebuild state before accepting any client
    let log = match &config.aof_path {
        Some(path) => {
            let log = AppendLog::open(path)
                .await
                .with_context(|| format!("failed to open append-only log {}", path.display()))?;
            let stats = log
                .replay(&ctx, storage.as_ref())
                .await
                .context("failed to replay append-only log")?;
            info!(
                applied = stats.applied,
                skipped = stats.skipped,
                keys = storage.size(&ctx),
                "State restored from append-only log"
            );
            Some(Arc::new(log))
        }
        None => {
            warn!("Persistence disabled, data will be lost on shutdown");
            None
        }
    };

    storage
        .start_cleanup(config.cleanup_interval)
        .context("failed to start expiry sweeper")?;

    let listener = TcpListener::bind(config.bind_address())
        .await
        .with_context(|| format!("failed to bind {}", config.bind_address()))?;

    print_banner(&config);
    info!("Listening on {}", config.bind_address());

    let handler = match &log {
        Some(log) => CommandHandler::with_log(Arc::clone(&storage), Arc::clone(log)),
        None => CommandHandler::new(Arc::clone(&storage)),
    };
    let stats = Arc::new(ConnectionStats::new());
    let mut connections = JoinSet::new();

    tokio::select! {
        _ = accept_loop(listener, handler, stats, &ctx, &mut connections) => {}
        res = signal::ctrl_c() => {
            if let Err(e) = res {
                error!(error = %e, "Failed to listen for Ctrl+C, shutting down");
            }
            info!("Shutdown signal received, stopping server...");
        }
    }

    // Idle connections close as soon as the token fires
    root.cancel();
    let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
        while connections.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!(
            remaining = connections.len(),
            "Connections still open after grace period, aborting them"
        );
        connections.shutdown().await;
    }

    storage.stop_cleanup();

    if let Some(log) = log {
        log.close().await.context("failed to close append-only log")?;
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Main loop that accepts incoming connections
async fn accept_loop(
    listener: TcpListener,
    handler: CommandHandler,
    stats: Arc<ConnectionStats>,
    ctx: &Context,
    connections: &mut JoinSet<()>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    connections.spawn(handle_connection(
                        stream,
                        addr,
                        handler.clone(),
                        Arc::clone(&stats),
                        ctx.child(),
                    ));
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            },
            // Reap finished connection tasks
            Some(res) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = res {
                    if e.is_panic() {
                        error!(error = %e, "Connection task panicked");
                    }
                }
            }
        }
    }
}
