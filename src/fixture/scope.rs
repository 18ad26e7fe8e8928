//! Run scope
//!
//! Ties one fixture to one test run. `enter` provisions, `exit` tears down,
//! and [`RunScope::run`] wraps both around a body so teardown happens on
//! every exit path: success, error, or panic.

use crate::config::FixtureConfig;
use crate::error::FixtureError;
use crate::fixture::{FixtureHandle, FixtureManager};
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;

pub struct RunScope {
    manager: FixtureManager,
    config: FixtureConfig,
    handle: Option<FixtureHandle>,
}

impl RunScope {
    pub fn new(manager: FixtureManager, config: FixtureConfig) -> Self {
        Self {
            manager,
            config,
            handle: None,
        }
    }

    /// Provision the fixture, or return the one already entered
    pub async fn enter(&mut self) -> Result<FixtureHandle, FixtureError> {
        if let Some(handle) = &self.handle {
            return Ok(handle.clone());
        }
        let handle = self.manager.provision(&self.config).await?;
        self.handle = Some(handle.clone());
        Ok(handle)
    }

    /// The entered fixture, if any
    pub fn handle(&self) -> Option<&FixtureHandle> {
        self.handle.as_ref()
    }

    /// Tear down best-effort. Teardown errors are logged, never returned, so
    /// they cannot mask whatever failure the run is already reporting.
    pub async fn exit(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        if let Err(e) = self.manager.dispose(&handle).await {
            tracing::warn!(fixture = handle.id(), error = %e, "Fixture teardown failed");
        }
    }

    /// Enter, run `body`, and always exit.
    ///
    /// A panic in `body` is resumed after teardown completes.
    pub async fn run<F, Fut, T, E>(mut self, body: F) -> Result<T, E>
    where
        F: FnOnce(FixtureHandle) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<FixtureError>,
    {
        let handle = self.enter().await?;
        let result = AssertUnwindSafe(body(handle)).catch_unwind().await;
        self.exit().await;
        match result {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

impl Drop for RunScope {
    fn drop(&mut self) {
        if let Some(handle) = &self.handle {
            tracing::warn!(fixture = handle.id(), "RunScope dropped without exit");
        }
    }
}
