//! Cancellation scenarios
//!
//! Each scenario exercises one property of the cancellation contract against
//! a live fixture and reports pass/fail on its own. Scenarios assume the
//! schema defines the `Persons` table and that nothing else created it
//! beforehand.

use crate::db::{CancellationSignal, OperationOutcome, Person};
use crate::error::{DbError, DbResult};
use crate::fixture::FixtureHandle;
use crate::runner::Runner;
use serde::Serialize;
use std::time::{Duration, Instant};

/// How long an in-flight statement may linger after its signal fires
const CANCEL_DEADLINE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Writing before setup fails with a missing-table error
    ExecuteBeforeSetup,
    /// A pre-triggered signal cancels the insert and persists nothing
    PreTriggeredInsert,
    /// An untouched signal lets the insert complete
    UntriggeredInsert,
    /// Triggering mid-statement stops a long `pg_sleep`
    InFlightCancellation,
    /// A server timeout is reported as a timeout, not a cancellation
    StatementTimeout,
    /// A cancelled call does not disturb a concurrent one
    ConcurrentCalls,
}

impl Scenario {
    pub const ALL: [Scenario; 6] = [
        Scenario::ExecuteBeforeSetup,
        Scenario::PreTriggeredInsert,
        Scenario::UntriggeredInsert,
        Scenario::InFlightCancellation,
        Scenario::StatementTimeout,
        Scenario::ConcurrentCalls,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::ExecuteBeforeSetup => "execute-before-setup",
            Self::PreTriggeredInsert => "pre-triggered-insert",
            Self::UntriggeredInsert => "untriggered-insert",
            Self::InFlightCancellation => "in-flight-cancellation",
            Self::StatementTimeout => "statement-timeout",
            Self::ConcurrentCalls => "concurrent-calls",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.name() == name)
    }

    /// Whether the scenario runs after schema setup
    pub fn requires_setup(self) -> bool {
        !matches!(self, Self::ExecuteBeforeSetup)
    }

    /// Run against `runner`; `Ok` carries a short detail line, `Err` the reason it failed
    pub async fn run(self, runner: &Runner) -> Result<String, String> {
        match self {
            Self::ExecuteBeforeSetup => execute_before_setup(runner).await,
            Self::PreTriggeredInsert => pre_triggered_insert(runner).await,
            Self::UntriggeredInsert => untriggered_insert(runner).await,
            Self::InFlightCancellation => in_flight_cancellation(runner).await,
            Self::StatementTimeout => statement_timeout(runner).await,
            Self::ConcurrentCalls => concurrent_calls(runner).await,
        }
    }
}

async fn count_persons(runner: &Runner) -> Result<i64, String> {
    runner
        .query_count(Person::COUNT_SQL)
        .await
        .map_err(|e| format!("count query failed: {}", e))
}

async fn insert_person(runner: &Runner, signal: &CancellationSignal) -> OperationOutcome {
    let person = Person::new("F", "L", 1);
    runner
        .execute_cancellable(Person::INSERT_SQL, &person.params(), signal)
        .await
}

async fn execute_before_setup(runner: &Runner) -> Result<String, String> {
    match insert_person(runner, &CancellationSignal::new()).await {
        OperationOutcome::Failed(e) if e.is_undefined_table() => Ok(e.to_string()),
        other => Err(format!("expected a missing-table error, got {}", other)),
    }
}

async fn pre_triggered_insert(runner: &Runner) -> Result<String, String> {
    let before = count_persons(runner).await?;
    let outcome = insert_person(runner, &CancellationSignal::triggered()).await;
    if !outcome.is_cancelled() {
        return Err(format!("expected cancelled, got {}", outcome));
    }
    let after = count_persons(runner).await?;
    if after != before {
        return Err(format!("row persisted despite cancellation ({} -> {})", before, after));
    }
    Ok(format!("cancelled, {} rows", after))
}

async fn untriggered_insert(runner: &Runner) -> Result<String, String> {
    let before = count_persons(runner).await?;
    let outcome = insert_person(runner, &CancellationSignal::new()).await;
    if outcome != OperationOutcome::Completed(1) {
        return Err(format!("expected completed (1 rows), got {}", outcome));
    }
    let after = count_persons(runner).await?;
    if after != before + 1 {
        return Err(format!("expected {} rows, found {}", before + 1, after));
    }
    Ok(outcome.to_string())
}

async fn in_flight_cancellation(runner: &Runner) -> Result<String, String> {
    let signal = CancellationSignal::new();
    let trigger = signal.trigger_after(Duration::from_millis(200));
    let started = Instant::now();

    let outcome = runner
        .execute_cancellable("select pg_sleep(30)", &[], &signal)
        .await;
    let elapsed = started.elapsed();
    let _ = trigger.await;

    if !outcome.is_cancelled() {
        return Err(format!("expected cancelled, got {}", outcome));
    }
    if elapsed > CANCEL_DEADLINE {
        return Err(format!("cancellation took {:?}", elapsed));
    }
    Ok(format!("cancelled after {}ms", elapsed.as_millis()))
}

async fn statement_timeout(runner: &Runner) -> Result<String, String> {
    let timed = runner.with_statement_timeout(Duration::from_millis(100));
    match timed
        .execute_cancellable("select pg_sleep(5)", &[], &CancellationSignal::new())
        .await
    {
        OperationOutcome::Failed(DbError::Timeout) => Ok("timed out".to_string()),
        other => Err(format!("expected a timeout failure, got {}", other)),
    }
}

async fn concurrent_calls(runner: &Runner) -> Result<String, String> {
    let before = count_persons(runner).await?;
    let triggered = CancellationSignal::triggered();
    let pending = CancellationSignal::new();

    let (cancelled, completed) = tokio::join!(
        insert_person(runner, &triggered),
        insert_person(runner, &pending)
    );

    if !cancelled.is_cancelled() {
        return Err(format!("triggered call: expected cancelled, got {}", cancelled));
    }
    if completed != OperationOutcome::Completed(1) {
        return Err(format!("untriggered call: expected completed, got {}", completed));
    }
    let after = count_persons(runner).await?;
    if after != before + 1 {
        return Err(format!("expected {} rows, found {}", before + 1, after));
    }
    Ok("cancelled + completed".to_string())
}

/// Result of one scenario
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub name: &'static str,
    pub passed: bool,
    pub detail: String,
    pub elapsed_ms: u64,
}

/// Results of a whole run
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub scenarios: Vec<ScenarioReport>,
}

impl RunReport {
    pub fn passed(&self) -> bool {
        self.scenarios.iter().all(|s| s.passed)
    }

    pub fn failures(&self) -> usize {
        self.scenarios.iter().filter(|s| !s.passed).count()
    }

    /// Plain-text summary, one line per scenario
    pub fn render(&self) -> String {
        let width = self
            .scenarios
            .iter()
            .map(|s| s.name.len())
            .max()
            .unwrap_or(0);
        let mut out = String::new();
        for s in &self.scenarios {
            out.push_str(&format!(
                "{} {:<width$} {:>6}ms  {}\n",
                if s.passed { "PASS" } else { "FAIL" },
                s.name,
                s.elapsed_ms,
                s.detail,
                width = width
            ));
        }
        out.push_str(&format!(
            "{} passed, {} failed\n",
            self.scenarios.len() - self.failures(),
            self.failures()
        ));
        out
    }
}

async fn run_one(scenario: Scenario, runner: &Runner) -> ScenarioReport {
    let started = Instant::now();
    let result = scenario.run(runner).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;
    match &result {
        Ok(detail) => tracing::info!(scenario = scenario.name(), elapsed_ms, %detail, "Scenario passed"),
        Err(detail) => tracing::error!(scenario = scenario.name(), elapsed_ms, %detail, "Scenario failed"),
    }
    let passed = result.is_ok();
    ScenarioReport {
        name: scenario.name(),
        passed,
        detail: result.unwrap_or_else(|e| e),
        elapsed_ms,
    }
}

/// Run `scenarios` against a fixture: pre-setup scenarios, then `schema`,
/// then everything else, in the order given.
///
/// # Errors
/// Returns `DbError::SetupFailed` if the schema cannot be applied; the run is
/// aborted at that point.
pub async fn run_suite(
    handle: FixtureHandle,
    schema: &str,
    scenarios: &[Scenario],
) -> DbResult<RunReport> {
    let runner = Runner::new(handle);
    let mut report = RunReport::default();

    for scenario in scenarios.iter().filter(|s| !s.requires_setup()) {
        report.scenarios.push(run_one(*scenario, &runner).await);
    }

    runner.run_setup(schema).await?;

    for scenario in scenarios.iter().filter(|s| s.requires_setup()) {
        report.scenarios.push(run_one(*scenario, &runner).await);
    }
    Ok(report)
}
