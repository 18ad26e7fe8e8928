//! Operation outcomes
//!
//! Every cancellable call walks `NotStarted -> InFlight -> terminal`, where the
//! terminal state is one of Completed, Cancelled or Failed. Terminal states
//! are final.

use crate::error::{DbError, DbResult};

/// Terminal classification of one operation call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutcome {
    /// Finished normally; carries rows affected (or returned)
    Completed(u64),
    /// Stopped by the caller's signal
    Cancelled,
    /// Stopped by anything else
    Failed(DbError),
}

impl OperationOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// The terminal state this outcome corresponds to
    pub fn state(&self) -> OperationState {
        match self {
            Self::Completed(_) => OperationState::Completed,
            Self::Cancelled => OperationState::Cancelled,
            Self::Failed(_) => OperationState::Failed,
        }
    }

    /// Collapse into a `Result`, mapping cancellation to [`DbError::Cancelled`]
    pub fn into_result(self) -> DbResult<u64> {
        match self {
            Self::Completed(rows) => Ok(rows),
            Self::Cancelled => Err(DbError::Cancelled),
            Self::Failed(err) => Err(err),
        }
    }
}

impl std::fmt::Display for OperationOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed(rows) => write!(f, "completed ({} rows)", rows),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Failed(err) => write!(f, "failed: {}", err),
        }
    }
}

/// Lifecycle state of one operation call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    NotStarted,
    InFlight,
    Completed,
    Cancelled,
    Failed,
}

impl OperationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }

    /// Whether `self -> next` is a legal step.
    ///
    /// A call may be cancelled before it starts, so `NotStarted -> Cancelled`
    /// is allowed; nothing leaves a terminal state.
    pub fn can_transition_to(self, next: OperationState) -> bool {
        match (self, next) {
            (Self::NotStarted, Self::InFlight) => true,
            (Self::NotStarted, Self::Cancelled | Self::Failed) => true,
            (Self::InFlight, next) => next.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for OperationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::NotStarted => "not-started",
            Self::InFlight => "in-flight",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Tracks one call through its states, refusing illegal transitions
#[derive(Debug)]
pub(crate) struct OperationLifecycle {
    id: u64,
    state: OperationState,
}

impl OperationLifecycle {
    pub(crate) fn new(id: u64) -> Self {
        Self {
            id,
            state: OperationState::NotStarted,
        }
    }

    pub(crate) fn state(&self) -> OperationState {
        self.state
    }

    /// Advance to `next`; returns `false` (and stays put) if the step is illegal
    pub(crate) fn advance(&mut self, next: OperationState) -> bool {
        if !self.state.can_transition_to(next) {
            tracing::warn!(operation = self.id, from = %self.state, to = %next, "Ignoring illegal operation transition");
            return false;
        }
        tracing::debug!(operation = self.id, from = %self.state, to = %next, "Operation state change");
        self.state = next;
        true
    }

    /// Record `outcome` as the terminal state and hand it back
    pub(crate) fn finish(&mut self, outcome: OperationOutcome) -> OperationOutcome {
        self.advance(outcome.state());
        outcome
    }
}
