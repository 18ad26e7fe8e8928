//! Readiness probing
//!
//! A container reporting "started" is not the same as a database accepting
//! connections. The manager keeps probing until one succeeds.

use crate::config::ConnectionConfig;
use crate::db::PostgresSession;
use crate::error::{DbResult, FixtureError, FixtureResult};
use async_trait::async_trait;
use std::time::Duration;

/// Checks whether an instance accepts client connections
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    async fn probe(&self, connection: &ConnectionConfig) -> DbResult<()>;
}

/// Connects and runs `SELECT 1`
#[derive(Debug, Default, Clone, Copy)]
pub struct PostgresProbe;

#[async_trait]
impl ReadinessProbe for PostgresProbe {
    async fn probe(&self, connection: &ConnectionConfig) -> DbResult<()> {
        let session = PostgresSession::connect(connection).await?;
        session.ping().await
    }
}

/// Probe until success or `timeout`; returns the number of attempts made
pub(crate) async fn wait_until_ready(
    probe: &dyn ReadinessProbe,
    connection: &ConnectionConfig,
    timeout: Duration,
    interval: Duration,
) -> FixtureResult<u32> {
    let attempts = async {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match probe.probe(connection).await {
                Ok(()) => return attempt,
                Err(e) => {
                    tracing::debug!(attempt, error = %e, "Instance not ready yet");
                    tokio::time::sleep(interval).await;
                }
            }
        }
    };

    tokio::time::timeout(timeout, attempts)
        .await
        .map_err(|_| FixtureError::ReadinessTimeout(timeout))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbError;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails a fixed number of times, then succeeds
    struct FlakyProbe {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl ReadinessProbe for FlakyProbe {
        async fn probe(&self, _connection: &ConnectionConfig) -> DbResult<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(DbError::ConnectionFailed("starting up".into()))
            } else {
                Ok(())
            }
        }
    }

    fn connection() -> ConnectionConfig {
        ConnectionConfig::local("localhost", 5432, "db", "u", "p")
    }

    #[tokio::test]
    async fn test_ready_after_retries() {
        let probe = FlakyProbe {
            failures: 2,
            calls: AtomicU32::new(0),
        };
        let attempts = wait_until_ready(
            &probe,
            &connection(),
            Duration::from_secs(5),
            Duration::from_millis(1),
        )
        .await
        .unwrap();
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn test_times_out_when_never_ready() {
        let probe = FlakyProbe {
            failures: u32::MAX,
            calls: AtomicU32::new(0),
        };
        let err = wait_until_ready(
            &probe,
            &connection(),
            Duration::from_millis(50),
            Duration::from_millis(5),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, FixtureError::ReadinessTimeout(_)));
    }
}
