//! Fixture lifecycle
//!
//! A [`FixtureManager`] provisions one disposable database instance and hands
//! back a [`FixtureHandle`]. The handle exposes the connection descriptor
//! while the instance is ready, tracks operations running against it, and
//! tears the instance down exactly once.
//!
//! ```text
//! Provisioning --ready--> Ready --dispose--> Disposed
//!       \______________failure______________/
//! ```

pub mod readiness;
pub mod runtime;
pub mod scope;

pub use readiness::{PostgresProbe, ReadinessProbe};
pub use runtime::{ContainerRuntime, DockerRuntime, ExternalRuntime, InstanceSpec, RunningInstance};
pub use scope::RunScope;

use crate::config::{ConnectionConfig, FixtureConfig};
use crate::error::{FixtureError, FixtureResult};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tokio_util::task::task_tracker::TrackedFuture;

/// Readiness state of a fixture instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixtureState {
    Provisioning,
    Ready,
    Disposed,
}

impl std::fmt::Display for FixtureState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Provisioning => "provisioning",
            Self::Ready => "ready",
            Self::Disposed => "disposed",
        };
        f.write_str(name)
    }
}

/// Provisions and disposes fixture instances
pub struct FixtureManager {
    runtime: Arc<dyn ContainerRuntime>,
    probe: Arc<dyn ReadinessProbe>,
    probe_interval: Duration,
}

impl FixtureManager {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            runtime,
            probe: Arc::new(PostgresProbe),
            probe_interval: Duration::from_millis(250),
        }
    }

    /// Manager backed by the local Docker daemon
    pub fn docker() -> Self {
        Self::new(Arc::new(DockerRuntime))
    }

    /// Docker, or an external database when the config names one
    pub fn for_config(config: &FixtureConfig) -> FixtureResult<Self> {
        let external = config
            .external_connection()
            .map_err(|e| FixtureError::Provisioning(e.to_string()))?;
        Ok(match external {
            Some(connection) => Self::new(Arc::new(ExternalRuntime::new(connection))),
            None => Self::docker(),
        })
    }

    pub fn with_probe(mut self, probe: Arc<dyn ReadinessProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }

    /// Start an instance and wait until it accepts connections.
    ///
    /// The whole call is bounded by the configured startup timeout. On any
    /// failure the started instance is stopped before the error is returned.
    ///
    /// # Errors
    /// `FixtureError::Provisioning` if the runtime cannot start the instance,
    /// `FixtureError::ReadinessTimeout` if it never becomes ready
    pub async fn provision(&self, config: &FixtureConfig) -> FixtureResult<FixtureHandle> {
        let spec = InstanceSpec::from_config(config)?;
        let timeout = config.startup_timeout();
        let started = Instant::now();

        tracing::info!(runtime = self.runtime.name(), image = %spec.image_ref(), "Starting fixture instance");

        let instance = tokio::time::timeout(timeout, self.runtime.start(&spec))
            .await
            .map_err(|_| FixtureError::ReadinessTimeout(timeout))??;

        let handle = FixtureHandle::provisioning(instance, config.drain_timeout());
        tracing::info!(
            fixture = handle.id(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Fixture instance started, waiting for readiness"
        );

        let remaining = timeout.saturating_sub(started.elapsed());
        let ready = readiness::wait_until_ready(
            self.probe.as_ref(),
            &handle.inner.connection,
            remaining,
            self.probe_interval,
        )
        .await;

        match ready {
            Ok(attempts) => {
                handle.mark_ready();
                tracing::info!(
                    fixture = handle.id(),
                    attempts,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Fixture instance ready"
                );
                Ok(handle)
            }
            Err(_) => {
                tracing::error!(fixture = handle.id(), ?timeout, "Fixture instance never became ready");
                if let Err(e) = handle.dispose().await {
                    tracing::warn!(error = %e, "Failed to stop instance after readiness timeout");
                }
                Err(FixtureError::ReadinessTimeout(timeout))
            }
        }
    }

    /// Connection descriptor of a ready fixture
    pub fn connection_info(&self, handle: &FixtureHandle) -> FixtureResult<ConnectionConfig> {
        handle.connection_info()
    }

    /// Tear down the fixture; safe to call repeatedly
    pub async fn dispose(&self, handle: &FixtureHandle) -> FixtureResult<()> {
        handle.dispose().await
    }
}

/// Shared handle to one provisioned instance.
///
/// Clones are cheap and all observe the same state. Once disposed the
/// instance is released and no clone can reach it again.
#[derive(Clone)]
pub struct FixtureHandle {
    inner: Arc<FixtureInner>,
}

struct FixtureInner {
    id: String,
    connection: ConnectionConfig,
    state: Mutex<FixtureState>,
    instance: tokio::sync::Mutex<Option<Box<dyn RunningInstance>>>,
    in_flight: TaskTracker,
    teardown: CancellationToken,
    /// Fires once the first dispose has finished (or was abandoned)
    disposed: CancellationToken,
    drain_timeout: Duration,
}

impl FixtureHandle {
    fn provisioning(instance: Box<dyn RunningInstance>, drain_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(FixtureInner {
                id: instance.id().to_string(),
                connection: instance.connection().clone(),
                state: Mutex::new(FixtureState::Provisioning),
                instance: tokio::sync::Mutex::new(Some(instance)),
                in_flight: TaskTracker::new(),
                teardown: CancellationToken::new(),
                disposed: CancellationToken::new(),
                drain_timeout,
            }),
        }
    }

    fn mark_ready(&self) {
        let mut state = self.inner.state.lock();
        if *state == FixtureState::Provisioning {
            *state = FixtureState::Ready;
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn state(&self) -> FixtureState {
        *self.inner.state.lock()
    }

    /// Connection descriptor, available only while the fixture is ready
    ///
    /// # Errors
    /// `FixtureError::InvalidState` before readiness or after disposal
    pub fn connection_info(&self) -> FixtureResult<ConnectionConfig> {
        match self.state() {
            FixtureState::Ready => Ok(self.inner.connection.clone()),
            actual => Err(FixtureError::InvalidState {
                expected: FixtureState::Ready,
                actual,
            }),
        }
    }

    /// Number of operations currently running against this fixture
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.len()
    }

    /// Register `future` as in flight until it completes
    pub(crate) fn track<F: Future>(&self, future: F) -> TrackedFuture<F> {
        self.inner.in_flight.track_future(future)
    }

    /// Fires when teardown gives up waiting and cancels in-flight work
    pub(crate) fn teardown_token(&self) -> &CancellationToken {
        &self.inner.teardown
    }

    /// Stop and remove the instance.
    ///
    /// The first call waits for in-flight operations (up to the drain
    /// timeout, then cancels the rest and waits for them to settle) and stops
    /// the instance. Later calls wait for that first call to finish and then
    /// return `Ok(())`; only the first call reports a teardown error.
    pub async fn dispose(&self) -> FixtureResult<()> {
        let previous = std::mem::replace(&mut *self.inner.state.lock(), FixtureState::Disposed);
        if previous == FixtureState::Disposed {
            tracing::debug!(fixture = self.id(), "Fixture already disposed");
            self.inner.disposed.cancelled().await;
            return Ok(());
        }
        let _done = self.inner.disposed.clone().drop_guard();

        let in_flight = &self.inner.in_flight;
        in_flight.close();
        if !in_flight.is_empty() {
            tracing::info!(fixture = self.id(), in_flight = in_flight.len(), "Waiting for in-flight operations");
        }
        if tokio::time::timeout(self.inner.drain_timeout, in_flight.wait())
            .await
            .is_err()
        {
            tracing::warn!(
                fixture = self.id(),
                in_flight = in_flight.len(),
                "Drain timeout reached, cancelling in-flight operations"
            );
            self.inner.teardown.cancel();
            in_flight.wait().await;
        }
        self.inner.teardown.cancel();

        let instance = self.inner.instance.lock().await.take();
        if let Some(mut instance) = instance {
            instance.stop().await?;
        }
        tracing::info!(fixture = self.id(), "Fixture disposed");
        Ok(())
    }
}

impl std::fmt::Debug for FixtureHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixtureHandle")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .field("connection", &self.inner.connection.to_string())
            .finish()
    }
}

impl Drop for FixtureInner {
    fn drop(&mut self) {
        if *self.state.get_mut() != FixtureState::Disposed {
            tracing::warn!(fixture = %self.id, "Fixture dropped without dispose; relying on runtime cleanup");
        }
    }
}
