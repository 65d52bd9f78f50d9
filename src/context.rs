//! Operation Context
//!
//! Every storage and log operation receives a [`Context`]. A context can be
//! canceled through a [`CancellationToken`] or run past a deadline; once either
//! happens, operations that have not started yet refuse to run.
//!
//! ```
//! use tidekv::context::Context;
//! use std::time::Duration;
//!
//! let ctx = Context::background();
//! assert!(!ctx.is_done());
//!
//! let ctx = Context::background().with_timeout(Duration::ZERO);
//! assert!(ctx.is_done());
//! ```

use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Why a context stopped accepting work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Interrupted {
    /// The cancellation token was triggered
    #[error("operation canceled")]
    Canceled,

    /// The deadline passed before the operation started
    #[error("deadline exceeded")]
    DeadlineExceeded,
}

/// Cancellation and deadline signal passed to each operation.
#[derive(Debug, Clone, Default)]
pub struct Context {
    token: Option<CancellationToken>,
    deadline: Option<Instant>,
}

impl Context {
    /// A context that is never canceled and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// A context canceled together with `token`.
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token: Some(token),
            deadline: None,
        }
    }

    /// Adds a deadline. An earlier existing deadline is kept.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    /// Adds a deadline `timeout` from now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derives a context whose token is a child of this one.
    ///
    /// Canceling the child leaves the parent untouched; canceling the parent
    /// cancels the child.
    pub fn child(&self) -> Self {
        Self {
            token: Some(
                self.token
                    .as_ref()
                    .map(CancellationToken::child_token)
                    .unwrap_or_default(),
            ),
            deadline: self.deadline,
        }
    }

    /// The cancellation token, if any.
    pub fn token(&self) -> Option<&CancellationToken> {
        self.token.as_ref()
    }

    /// The deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns `Err` if the context is canceled or past its deadline.
    pub fn check(&self) -> Result<(), Interrupted> {
        if self.token.as_ref().is_some_and(|t| t.is_cancelled()) {
            return Err(Interrupted::Canceled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(Interrupted::DeadlineExceeded);
        }
        Ok(())
    }

    /// True once the context is canceled or expired.
    #[inline]
    pub fn is_done(&self) -> bool {
        self.check().is_err()
    }
}
