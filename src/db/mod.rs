//! Database layer
//!
//! The driver session, the cancellation signal, operation outcomes and the
//! schema fixtures the runner works with.

pub mod outcome;
pub mod postgres;
pub mod schema;
pub mod signal;

// Re-export main types
pub use outcome::{OperationOutcome, OperationState};
pub use postgres::{PostgresSession, QueryCanceller};
pub use schema::{PERSONS_DDL, Person, SchemaSource};
pub use signal::{CancellationSignal, SignalState};
