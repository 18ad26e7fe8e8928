//! Integration tests for the cancellation contract
//!
//! Each test provisions its own container, applies the Persons schema and
//! issues statements bound to a cancellation signal.

use crate::common::with_fixture;
use fixturegres::db::{CancellationSignal, OperationOutcome, PERSONS_DDL, Person};
use fixturegres::runner::Runner;
use fixturegres::{DbError, HarnessError};
use std::time::{Duration, Instant};

async fn runner_with_schema(handle: fixturegres::fixture::FixtureHandle) -> Result<Runner, HarnessError> {
    let runner = Runner::new(handle);
    runner.run_setup(PERSONS_DDL).await?;
    Ok(runner)
}

#[tokio::test(flavor = "multi_thread")]
async fn test_pre_triggered_insert_is_cancelled_and_persists_nothing() {
    with_fixture(|handle| async move {
        let runner = runner_with_schema(handle).await?;

        let signal = CancellationSignal::new();
        signal.trigger();

        let person = Person::new("F", "L", 1);
        let outcome = runner
            .execute_cancellable(Person::INSERT_SQL, &person.params(), &signal)
            .await;

        assert_eq!(outcome, OperationOutcome::Cancelled);
        assert_eq!(runner.query_count(Person::COUNT_SQL).await?, 0);
        Ok::<_, HarnessError>(())
    })
    .await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_untriggered_insert_completes() {
    with_fixture(|handle| async move {
        let runner = runner_with_schema(handle).await?;

        let person = Person::new("Ada", "Lovelace", 3);
        let outcome = runner
            .execute_cancellable(Person::INSERT_SQL, &person.params(), &CancellationSignal::new())
            .await;

        assert_eq!(outcome, OperationOutcome::Completed(1));
        assert_eq!(runner.query_count(Person::COUNT_SQL).await?, 1);
        Ok::<_, HarnessError>(())
    })
    .await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_untriggered_duplicate_is_query_error_not_cancellation() {
    with_fixture(|handle| async move {
        let runner = runner_with_schema(handle).await?;
        let person = Person::new("F", "L", 1);

        let first = runner
            .execute_cancellable(Person::INSERT_SQL, &person.params(), &CancellationSignal::new())
            .await;
        assert!(first.is_completed(), "first insert: {}", first);

        let second = runner
            .execute_cancellable(Person::INSERT_SQL, &person.params(), &CancellationSignal::new())
            .await;
        match second {
            OperationOutcome::Failed(DbError::QueryFailed { sqlstate, .. }) => {
                assert_eq!(sqlstate.as_deref(), Some("23505"));
            }
            other => panic!("Expected unique violation, got {}", other),
        }
        Ok::<_, HarnessError>(())
    })
    .await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_in_flight_cancellation_stops_long_statement() {
    with_fixture(|handle| async move {
        let runner = runner_with_schema(handle).await?;

        let signal = CancellationSignal::new();
        let trigger = signal.trigger_after(Duration::from_millis(200));
        let started = Instant::now();

        let outcome = runner
            .execute_cancellable("select pg_sleep(30)", &[], &signal)
            .await;

        assert_eq!(outcome, OperationOutcome::Cancelled);
        assert!(
            started.elapsed() < Duration::from_secs(5),
            "cancellation took {:?}",
            started.elapsed()
        );
        assert!(trigger.await.unwrap());

        // The session that was cancelled is gone; the fixture still serves new calls
        let after = runner
            .execute_cancellable("select 1", &[], &CancellationSignal::new())
            .await;
        assert_eq!(after, OperationOutcome::Completed(1));
        Ok::<_, HarnessError>(())
    })
    .await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_statement_timeout_is_not_reported_as_cancellation() {
    with_fixture(|handle| async move {
        let runner = runner_with_schema(handle).await?;
        let timed = runner.with_statement_timeout(Duration::from_millis(100));

        let outcome = timed
            .execute_cancellable("select pg_sleep(5)", &[], &CancellationSignal::new())
            .await;

        assert_eq!(outcome, OperationOutcome::Failed(DbError::Timeout));
        Ok::<_, HarnessError>(())
    })
    .await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_calls_resolve_independently() {
    with_fixture(|handle| async move {
        let runner = runner_with_schema(handle).await?;

        let cancelled_person = Person::new("Cancelled", "Call", 1);
        let completed_person = Person::new("Completed", "Call", 2);
        let triggered = CancellationSignal::triggered();
        let pending = CancellationSignal::new();
        let cancelled_params = cancelled_person.params();
        let completed_params = completed_person.params();

        let (cancelled, completed) = tokio::join!(
            runner.execute_cancellable(Person::INSERT_SQL, &cancelled_params, &triggered),
            runner.execute_cancellable(Person::INSERT_SQL, &completed_params, &pending),
        );

        assert_eq!(cancelled, OperationOutcome::Cancelled);
        assert_eq!(completed, OperationOutcome::Completed(1));
        assert_eq!(runner.query_count(Person::COUNT_SQL).await?, 1);
        Ok::<_, HarnessError>(())
    })
    .await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_in_flight_cancel_does_not_touch_concurrent_sleep() {
    with_fixture(|handle| async move {
        let runner = runner_with_schema(handle).await?;

        let doomed = CancellationSignal::new();
        let trigger = doomed.trigger_after(Duration::from_millis(100));
        let untouched = CancellationSignal::new();

        let (cancelled, completed) = tokio::join!(
            runner.execute_cancellable("select pg_sleep(10)", &[], &doomed),
            runner.execute_cancellable("select pg_sleep(1)", &[], &untouched),
        );

        assert_eq!(cancelled, OperationOutcome::Cancelled);
        assert_eq!(completed, OperationOutcome::Completed(1));
        assert!(trigger.await.unwrap());
        Ok::<_, HarnessError>(())
    })
    .await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_trigger_after_completion_has_no_effect() {
    with_fixture(|handle| async move {
        let runner = runner_with_schema(handle).await?;
        let signal = CancellationSignal::new();

        let outcome = runner
            .execute_cancellable("select 1", &[], &signal)
            .await;
        assert!(signal.trigger());

        assert_eq!(outcome, OperationOutcome::Completed(1));
        Ok::<_, HarnessError>(())
    })
    .await;
}
