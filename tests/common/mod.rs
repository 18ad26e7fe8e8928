//! Common test utilities and helpers
//!
//! Shared fixture setup for the integration tests.

use fixturegres::HarnessError;
use fixturegres::config::FixtureConfig;
use fixturegres::fixture::{FixtureHandle, FixtureManager, RunScope};
use std::future::Future;

/// Whether RUN_CONTAINERS demands that container tests run rather than skip
pub fn containers_required() -> bool {
    std::env::var("RUN_CONTAINERS")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Whether a container runtime looks available
pub fn containers_usable() -> bool {
    if containers_required() {
        return true;
    }
    std::process::Command::new("docker")
        .arg("version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Fixture config for tests: always a fresh container, never a shared database
pub fn test_config() -> FixtureConfig {
    let mut config = FixtureConfig::default();
    if let Err(e) = config.apply_env_overrides() {
        panic!("Invalid FIXTUREGRES_* environment: {}", e);
    }
    config.external_url = None;
    config
}

/// Provision a fixture from `config`, run `body`, and tear down.
///
/// Skips (returns without running `body`) when no container runtime is
/// available or the fixture cannot be provisioned, unless RUN_CONTAINERS is
/// set, in which case a provisioning failure panics. Panics if `body` fails.
pub async fn with_fixture_config<F, Fut>(config: FixtureConfig, body: F)
where
    F: FnOnce(FixtureHandle) -> Fut,
    Fut: Future<Output = Result<(), HarnessError>>,
{
    if !containers_usable() {
        eprintln!("Skipping test: no container runtime available");
        return;
    }
    fixturegres::logging::init_test_logging();

    let mut scope = RunScope::new(FixtureManager::docker(), config);
    if let Err(e) = scope.enter().await {
        if containers_required() {
            panic!("Fixture provisioning failed with RUN_CONTAINERS set: {}", e);
        }
        eprintln!("Skipping test: fixture not available - {}", e);
        return;
    }

    if let Err(e) = scope.run(body).await {
        panic!("Test body failed: {}", e);
    }
}

/// [`with_fixture_config`] with the default test config
pub async fn with_fixture<F, Fut>(body: F)
where
    F: FnOnce(FixtureHandle) -> Fut,
    Fut: Future<Output = Result<(), HarnessError>>,
{
    with_fixture_config(test_config(), body).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::panic::AssertUnwindSafe;

    #[tokio::test]
    async fn test_required_containers_turn_provisioning_failure_into_panic() {
        if !containers_required() {
            return;
        }
        let config = FixtureConfig {
            image: "fixturegres-missing-image".into(),
            startup_timeout_secs: 30,
            ..test_config()
        };
        let outcome = AssertUnwindSafe(with_fixture_config(config, |_handle| async {
            Ok::<_, HarnessError>(())
        }))
        .catch_unwind()
        .await;
        assert!(outcome.is_err());
    }

    #[test]
    fn test_config_never_points_at_external_database() {
        let config = test_config();
        assert!(config.external_url.is_none());
    }
}
