// src/cancel.rs

//! Caller-supplied cancellation and timeout signal
//!
//! Every public pipeline entry point takes a [`CancelSignal`]. It is checked
//! between pipeline steps and inside streaming copy loops, so a long download
//! or extraction stops promptly once the caller gives up.

use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Cancellation token plus an optional deadline
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl CancelSignal {
    /// A signal that never fires on its own
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing token owned by the caller
    pub fn from_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// A signal that fires once `timeout` has elapsed
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// Add (or tighten) a deadline on this signal
    pub fn deadline(mut self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        self.deadline = Some(match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        });
        self
    }

    /// Fire the signal
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// The underlying token, for callers that also run async work
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Return `Error::Cancelled` if the signal has fired
    ///
    /// `stage` names what was interrupted, for the error message.
    pub fn check(&self, stage: &str) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(Error::Cancelled(format!("{stage}: cancelled by caller")));
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(Error::Cancelled(format!("{stage}: deadline exceeded")));
        }
        Ok(())
    }

    /// Sleep for `duration`, waking early with `Error::Cancelled` once the
    /// signal fires
    pub fn sleep(&self, duration: Duration, stage: &str) -> Result<()> {
        let until = Instant::now() + duration;
        loop {
            self.check(stage)?;
            let now = Instant::now();
            if now >= until {
                return Ok(());
            }
            std::thread::sleep((until - now).min(SLEEP_SLICE));
        }
    }
}

/// Longest uninterrupted nap inside [`CancelSignal::sleep`]
const SLEEP_SLICE: Duration = Duration::from_millis(50);
