//! Background Expiry Sweeper
//!
//! This module implements a background task that periodically scans the key
//! space for expired items and removes them. This is "active expiry", as
//! opposed to the "lazy expiry" reads apply on access.
//!
//! ## Why Do We Need This?
//!
//! Lazy expiry hides expired items from readers but never frees them. An item
//! that expires and is never read again would stay in memory forever.
//!
//! ## Design
//!
//! The sweeper runs as a Tokio task and:
//! 1. Waits for the next tick of a fixed interval
//! 2. Takes the exclusive key-space lock and removes every expired item
//! 3. Logs how many items it reclaimed
//!
//! The task holds a `Weak` reference to the engine and a `watch` receiver.
//! It exits when the handle is stopped or dropped, or once the engine is gone.
//! The shutdown signal is only observed between ticks, never during a scan.

use crate::context::Context;
use crate::storage::StorageEngine;
use std::sync::Weak;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace};

/// Errors returned when starting a sweeper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SweeperError {
    /// A sweeper is already running for this engine
    #[error("expiry sweeper is already running")]
    AlreadyRunning,

    /// The interval must be at least one millisecond
    #[error("sweep interval must be greater than zero")]
    ZeroInterval,

    /// No Tokio runtime is available to spawn the task on
    #[error("no Tokio runtime available to run the expiry sweeper")]
    NoRuntime,
}

/// Configuration for the expiry sweeper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiryConfig {
    /// Interval between sweeps (default: 1s)
    pub interval: Duration,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
        }
    }
}

impl ExpiryConfig {
    /// Sets the sweep interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

/// A handle to the running expiry sweeper.
///
/// When this handle is dropped, the sweeper task will be stopped.
#[derive(Debug)]
pub struct ExpirySweeper {
    /// Sender to signal shutdown
    shutdown_tx: watch::Sender<bool>,
}

impl ExpirySweeper {
    /// Starts the expiry sweeper as a background task on the current runtime.
    ///
    /// Most callers should use [`StorageEngine::start_cleanup`], which also
    /// guards against starting twice.
    ///
    /// # Errors
    ///
    /// Returns [`SweeperError::ZeroInterval`] for a zero interval and
    /// [`SweeperError::NoRuntime`] outside a Tokio runtime.
    pub fn start(engine: Weak<StorageEngine>, config: ExpiryConfig) -> Result<Self, SweeperError> {
        if config.interval.is_zero() {
            return Err(SweeperError::ZeroInterval);
        }
        let handle = Handle::try_current().map_err(|_| SweeperError::NoRuntime)?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let interval_ms = config.interval.as_millis();
        handle.spawn(sweeper_loop(engine, config, shutdown_rx));

        info!(interval_ms, "Background expiry sweeper started");

        Ok(Self { shutdown_tx })
    }

    /// Signals the sweeper task to stop before its next tick.
    ///
    /// This is called automatically when the handle is dropped, and calling it
    /// more than once is harmless.
    pub fn stop(&self) {
        // send_replace stores the flag even if the task already exited
        if !self.shutdown_tx.send_replace(true) {
            info!("Background expiry sweeper stopped");
        }
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The main sweeper loop.
async fn sweeper_loop(
    engine: Weak<StorageEngine>,
    config: ExpiryConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        // Shutdown is polled first so a pending stop always beats a ready tick
        tokio::select! {
            biased;
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Expiry sweeper received shutdown signal");
                    return;
                }
                continue;
            }
            _ = ticker.tick() => {}
        }

        let Some(engine) = engine.upgrade() else {
            debug!("Storage engine dropped, expiry sweeper exiting");
            return;
        };

        let expired = engine.cleanup_expired();
        if expired > 0 {
            debug!(
                expired = expired,
                keys_remaining = engine.size(&Context::background()),
                "Expired keys cleaned up"
            );
        } else {
            trace!("Sweep found no expired keys");
        }
    }
}
