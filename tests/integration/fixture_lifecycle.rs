//! Integration tests for the fixture lifecycle
//!
//! Provisioning, teardown, setup ordering and seeding against real containers.

use crate::common::{test_config, with_fixture, with_fixture_config};
use fixturegres::config::FixtureConfig;
use fixturegres::db::{CancellationSignal, OperationOutcome, PERSONS_DDL, Person};
use fixturegres::fixture::FixtureState;
use fixturegres::runner::{Runner, SetupStatus};
use fixturegres::scenario::{self, Scenario};
use fixturegres::{DbError, FixtureError, HarnessError};
use std::time::Duration;

#[tokio::test(flavor = "multi_thread")]
async fn test_ready_fixture_exposes_connection_info() {
    with_fixture(|handle| async move {
        assert_eq!(handle.state(), FixtureState::Ready);

        let info = handle.connection_info()?;
        assert_eq!(info.database, "fixture_db");
        assert_eq!(info.username, "admin");
        assert_ne!(info.port, 0);

        let runner = Runner::new(handle);
        assert_eq!(runner.query_count("select 1::bigint").await?, 1);
        Ok::<_, HarnessError>(())
    })
    .await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_dispose_twice_is_a_no_op() {
    with_fixture(|handle| async move {
        handle.dispose().await?;
        handle.dispose().await?;

        assert_eq!(handle.state(), FixtureState::Disposed);
        assert!(matches!(
            handle.connection_info(),
            Err(FixtureError::InvalidState { .. })
        ));

        // The scope's own teardown runs a third dispose after this body
        let runner = Runner::new(handle);
        let outcome = runner
            .execute_cancellable("select 1", &[], &CancellationSignal::new())
            .await;
        assert!(matches!(
            outcome,
            OperationOutcome::Failed(DbError::FixtureUnavailable(_))
        ));
        Ok::<_, HarnessError>(())
    })
    .await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_execute_before_setup_fails_with_schema_error() {
    with_fixture(|handle| async move {
        let runner = Runner::new(handle);
        assert_eq!(runner.setup_status().await, SetupStatus::NotRun);

        let person = Person::new("F", "L", 1);
        let before = runner
            .execute_cancellable(Person::INSERT_SQL, &person.params(), &CancellationSignal::new())
            .await;
        match before {
            OperationOutcome::Failed(e) => assert!(e.is_undefined_table(), "got {:?}", e),
            other => panic!("Expected a schema error before setup, got {}", other),
        }

        runner.run_setup(PERSONS_DDL).await?;
        assert_eq!(runner.setup_status().await, SetupStatus::Completed);

        let after = runner
            .execute_cancellable(Person::INSERT_SQL, &person.params(), &CancellationSignal::new())
            .await;
        assert_eq!(after, OperationOutcome::Completed(1));
        Ok::<_, HarnessError>(())
    })
    .await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_malformed_setup_is_setup_error() {
    with_fixture(|handle| async move {
        let runner = Runner::new(handle);
        let err = runner.run_setup("create tabel Persons (Id int)").await.unwrap_err();
        assert!(matches!(err, DbError::SetupFailed(_)));
        assert_eq!(runner.setup_status().await, SetupStatus::Failed);
        Ok::<_, HarnessError>(())
    })
    .await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_dispose_waits_for_in_flight_call() {
    with_fixture(|handle| async move {
        let runner = Runner::new(handle.clone());

        let signal = CancellationSignal::new();
        let (outcome, disposed) = tokio::join!(
            runner.execute_cancellable("select pg_sleep(1)", &[], &signal),
            async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                handle.dispose().await
            }
        );

        assert_eq!(outcome, OperationOutcome::Completed(1));
        disposed?;
        assert_eq!(handle.state(), FixtureState::Disposed);
        Ok::<_, HarnessError>(())
    })
    .await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_dispose_forces_stuck_call_after_drain_timeout() {
    let config = FixtureConfig {
        drain_timeout_secs: 1,
        ..test_config()
    };
    with_fixture_config(config, |handle| async move {
        let runner = Runner::new(handle.clone());

        let signal = CancellationSignal::new();
        let (outcome, disposed) = tokio::join!(
            runner.execute_cancellable("select pg_sleep(30)", &[], &signal),
            async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                handle.dispose().await
            }
        );

        assert_eq!(outcome, OperationOutcome::Failed(DbError::FixtureDisposed));
        disposed?;
        Ok::<_, HarnessError>(())
    })
    .await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_seed_scripts_run_on_first_boot() {
    let seed = std::env::temp_dir().join(format!("fixturegres-seed-{}.sql", std::process::id()));
    std::fs::write(&seed, PERSONS_DDL).expect("write seed script");

    let config = FixtureConfig {
        seed_scripts: vec![seed.clone()],
        ..test_config()
    };
    with_fixture_config(config, |handle| async move {
        let runner = Runner::new(handle);
        assert_eq!(runner.query_count(Person::COUNT_SQL).await?, 0);
        Ok::<_, HarnessError>(())
    })
    .await;

    let _ = std::fs::remove_file(&seed);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_full_scenario_suite_passes() {
    with_fixture(|handle| async move {
        let report = scenario::run_suite(handle, PERSONS_DDL, &Scenario::ALL).await?;
        assert_eq!(report.scenarios.len(), Scenario::ALL.len());
        assert!(report.passed(), "{}", report.render());
        Ok::<_, HarnessError>(())
    })
    .await;
}
