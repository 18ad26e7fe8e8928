//! Cancellation signal
//!
//! A one-shot abort request handed to [`Runner::execute_cancellable`].
//! It moves from `Pending` to `Triggered` exactly once; clones share the same
//! state, so a test can keep one clone and pass another into the call.
//!
//! [`Runner::execute_cancellable`]: crate::runner::Runner::execute_cancellable

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;

/// Observable state of a [`CancellationSignal`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalState {
    Pending,
    Triggered,
}

/// One-shot, monotonic cancellation request
#[derive(Debug, Clone, Default)]
pub struct CancellationSignal {
    token: CancellationToken,
    fired: Arc<AtomicBool>,
}

impl CancellationSignal {
    /// A new signal in the `Pending` state
    pub fn new() -> Self {
        Self::default()
    }

    /// A signal that is already `Triggered`
    pub fn triggered() -> Self {
        let signal = Self::new();
        signal.trigger();
        signal
    }

    /// Request cancellation.
    ///
    /// Returns `true` for the call that performed the Pending→Triggered
    /// transition and `false` for every later call.
    pub fn trigger(&self) -> bool {
        let first = !self.fired.swap(true, Ordering::AcqRel);
        if first {
            self.token.cancel();
        }
        first
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn state(&self) -> SignalState {
        if self.is_triggered() {
            SignalState::Triggered
        } else {
            SignalState::Pending
        }
    }

    /// Resolves once the signal is triggered (immediately if it already is)
    pub async fn wait(&self) {
        self.token.cancelled().await
    }

    /// Trigger the signal after `delay`, from a background task
    pub fn trigger_after(&self, delay: std::time::Duration) -> tokio::task::JoinHandle<bool> {
        let signal = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            signal.trigger()
        })
    }
}
