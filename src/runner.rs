//! Cancellable operation runner
//!
//! Issues work against a fixture while honouring a caller-supplied
//! [`CancellationSignal`]:
//!
//! - a signal triggered before the call starts means nothing is sent to the
//!   server and the outcome is `Cancelled`;
//! - a signal triggered while the statement runs abandons it, sends a
//!   server-side cancel request, and reports `Cancelled`;
//! - an untouched signal has no effect on the call.
//!
//! Every call opens its own session, so a cancel request can only ever hit
//! the statement it was meant for. The runner never retries.

use crate::config::ConnectionConfig;
use crate::db::outcome::OperationLifecycle;
use crate::db::postgres::{QueryCanceller, is_query_canceled};
use crate::db::{CancellationSignal, OperationOutcome, OperationState, PostgresSession};
use crate::error::{DbError, DbResult};
use crate::fixture::FixtureHandle;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::future::Future;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_postgres::types::ToSql;
use tokio_util::sync::CancellationToken;

/// How long a server-side cancel request may take before it is abandoned
const CANCEL_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Whether the one-time schema setup has run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupStatus {
    NotRun,
    Completed,
    Failed,
}

/// Runs setup and cancellable operations against one fixture
#[derive(Clone)]
pub struct Runner {
    handle: FixtureHandle,
    /// Held exclusively by setup, shared by operations
    setup_gate: Arc<RwLock<SetupStatus>>,
    statement_timeout: Option<Duration>,
    next_operation: Arc<AtomicU64>,
}

impl Runner {
    pub fn new(handle: FixtureHandle) -> Self {
        Self {
            handle,
            setup_gate: Arc::new(RwLock::new(SetupStatus::NotRun)),
            statement_timeout: None,
            next_operation: Arc::new(AtomicU64::new(1)),
        }
    }

    /// A runner whose sessions carry a server-side statement timeout.
    ///
    /// Shares the setup gate with `self`.
    pub fn with_statement_timeout(&self, timeout: Duration) -> Self {
        Self {
            statement_timeout: Some(timeout),
            ..self.clone()
        }
    }

    pub fn handle(&self) -> &FixtureHandle {
        &self.handle
    }

    pub async fn setup_status(&self) -> SetupStatus {
        *self.setup_gate.read().await
    }

    fn connection(&self) -> DbResult<ConnectionConfig> {
        let connection = self
            .handle
            .connection_info()
            .map_err(|e| DbError::FixtureUnavailable(e.to_string()))?;
        Ok(match self.statement_timeout {
            Some(timeout) => connection.with_statement_timeout(timeout),
            None => connection,
        })
    }

    /// Execute the schema script once.
    ///
    /// Operations issued on this runner while setup runs wait for it to
    /// finish.
    ///
    /// # Errors
    /// Returns `DbError::SetupFailed` on any error, including connectivity
    /// and the fixture being torn down underneath it
    pub async fn run_setup(&self, script: &str) -> DbResult<()> {
        let mut status = self.setup_gate.write().await;
        tracing::info!(fixture = self.handle.id(), "Running schema setup");

        let teardown = self.handle.teardown_token();
        let result = self
            .handle
            .track(async {
                let session = self.open_session(teardown).await?;
                until_teardown(teardown, &session.canceller(), session.batch_execute(script)).await
            })
            .await
            .map_err(|e| DbError::SetupFailed(e.to_string()));

        match &result {
            Ok(()) => {
                *status = SetupStatus::Completed;
                tracing::info!(fixture = self.handle.id(), "Schema setup complete");
            }
            Err(e) => {
                *status = SetupStatus::Failed;
                tracing::error!(fixture = self.handle.id(), error = %e, "Schema setup failed");
            }
        }
        result
    }

    /// Open a session against the fixture, unless teardown forces it first
    async fn open_session(&self, teardown: &CancellationToken) -> DbResult<PostgresSession> {
        let connection = self.connection()?;
        tokio::select! {
            biased;
            _ = teardown.cancelled() => Err(DbError::FixtureDisposed),
            session = PostgresSession::connect(&connection) => session,
        }
    }

    /// Execute one statement bound to `signal`.
    pub async fn execute_cancellable(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
        signal: &CancellationSignal,
    ) -> OperationOutcome {
        let mut op = OperationLifecycle::new(self.next_operation.fetch_add(1, Ordering::Relaxed));

        if signal.is_triggered() {
            tracing::debug!("Signal already triggered, not sending statement");
            return op.finish(OperationOutcome::Cancelled);
        }

        let _setup = tokio::select! {
            biased;
            _ = signal.wait() => return op.finish(OperationOutcome::Cancelled),
            guard = self.setup_gate.read() => guard,
            // Only reached while a setup stuck on the gate is being forced
            _ = self.handle.teardown_token().cancelled() => {
                return op.finish(OperationOutcome::Failed(DbError::FixtureDisposed));
            }
        };

        let outcome = self
            .handle
            .track(self.run_in_flight(&mut op, sql, params, signal))
            .await;
        op.finish(outcome)
    }

    async fn run_in_flight(
        &self,
        op: &mut OperationLifecycle,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
        signal: &CancellationSignal,
    ) -> OperationOutcome {
        let connection = match self.connection() {
            Ok(connection) => connection,
            Err(e) => return OperationOutcome::Failed(e),
        };
        let teardown = self.handle.teardown_token();

        let session = tokio::select! {
            biased;
            _ = signal.wait() => return OperationOutcome::Cancelled,
            _ = teardown.cancelled() => return OperationOutcome::Failed(DbError::FixtureDisposed),
            session = PostgresSession::connect(&connection) => match session {
                Ok(session) => session,
                Err(e) => return OperationOutcome::Failed(e),
            },
        };

        op.advance(OperationState::InFlight);
        let canceller = session.canceller();

        tokio::select! {
            biased;
            _ = signal.wait() => {
                cancel_on_server(&canceller).await;
                OperationOutcome::Cancelled
            }
            _ = teardown.cancelled() => {
                cancel_on_server(&canceller).await;
                OperationOutcome::Failed(DbError::FixtureDisposed)
            }
            result = session.execute(sql, params) => match result {
                Ok(rows) => OperationOutcome::Completed(rows),
                Err(e) if is_query_canceled(&e) && signal.is_triggered() => OperationOutcome::Cancelled,
                Err(e) if is_query_canceled(&e) && self.statement_timeout.is_some() => {
                    OperationOutcome::Failed(DbError::Timeout)
                }
                Err(e) => OperationOutcome::Failed(e),
            },
        }
    }

    /// Run a single-value query such as `select count(*) from Persons`
    pub async fn query_count(&self, sql: &str) -> DbResult<i64> {
        let teardown = self.handle.teardown_token();
        self.handle
            .track(async {
                let session = self.open_session(teardown).await?;
                until_teardown(teardown, &session.canceller(), session.query_i64(sql)).await
            })
            .await
    }
}

/// Run `work` unless teardown forces the fixture first, in which case the
/// statement is cancelled on the server
async fn until_teardown<T>(
    teardown: &CancellationToken,
    canceller: &QueryCanceller,
    work: impl Future<Output = DbResult<T>>,
) -> DbResult<T> {
    tokio::select! {
        biased;
        _ = teardown.cancelled() => {
            cancel_on_server(canceller).await;
            Err(DbError::FixtureDisposed)
        }
        result = work => result,
    }
}

async fn cancel_on_server(canceller: &QueryCanceller) {
    match tokio::time::timeout(CANCEL_REQUEST_TIMEOUT, canceller.cancel()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(error = %e, "Server-side cancel request failed"),
        Err(_) => tracing::warn!("Server-side cancel request timed out"),
    }
}
