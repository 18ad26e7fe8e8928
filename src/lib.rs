//! fixturegres - Disposable PostgreSQL fixtures and a cancellation harness
//!
//! fixturegres spins up a throwaway database in a container, applies a
//! schema, and checks that a data-access call honours a caller's
//! cancellation request instead of completing or hanging.
//!
//! # Features
//!
//! - **Fixture lifecycle**: provision, wait for readiness, hand out a
//!   connection descriptor, tear down exactly once
//! - **Run scope**: teardown on every exit path, including panics
//! - **Cancellation contract**: pre-triggered, in-flight and untouched
//!   signals each get a well-defined outcome
//! - **Scenario suite**: reusable checks with a pass/fail report
//!
//! # Architecture
//!
//! - [`config`]: Connection descriptors and fixture settings
//! - [`fixture`]: Fixture manager, handle, runtime boundary and run scope
//! - [`db`]: Driver session, cancellation signal, outcomes, schema fixtures
//! - [`runner`]: Setup and cancellable execution against a fixture
//! - [`scenario`]: The cancellation scenarios and run report
//! - [`error`]: Error types and result aliases
//! - [`logging`]: Tracing subscriber setup
//!
//! # Example
//!
//! ```no_run
//! use fixturegres::config::FixtureConfig;
//! use fixturegres::db::{CancellationSignal, Person, PERSONS_DDL};
//! use fixturegres::fixture::{FixtureManager, RunScope};
//! use fixturegres::runner::Runner;
//! use fixturegres::HarnessError;
//!
//! # async fn example() -> Result<(), HarnessError> {
//! let config = FixtureConfig::default();
//! let scope = RunScope::new(FixtureManager::docker(), config);
//!
//! scope
//!     .run(|handle| async move {
//!         let runner = Runner::new(handle);
//!         runner.run_setup(PERSONS_DDL).await?;
//!
//!         let person = Person::new("F", "L", 1);
//!         let outcome = runner
//!             .execute_cancellable(Person::INSERT_SQL, &person.params(), &CancellationSignal::triggered())
//!             .await;
//!         assert!(outcome.is_cancelled());
//!         assert_eq!(runner.query_count(Person::COUNT_SQL).await?, 0);
//!         Ok::<_, HarnessError>(())
//!     })
//!     .await
//! # }
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod fixture;
pub mod logging;
pub mod runner;
pub mod scenario;

pub use error::{ConfigError, DbError, FixtureError, HarnessError, Result};
