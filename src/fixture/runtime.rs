//! Container runtime boundary
//!
//! The fixture manager only needs three things from a runtime: start an
//! instance, read its connection descriptor, stop it. [`DockerRuntime`] does
//! that with testcontainers; [`ExternalRuntime`] wraps a database somebody
//! else already started (e.g. a docker-compose service).

use crate::config::{ConnectionConfig, FixtureConfig};
use crate::error::{FixtureError, FixtureResult};
use async_trait::async_trait;
use std::time::Duration;
use testcontainers::core::{IntoContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage, ImageExt};

/// Port the postgres image listens on inside the container
pub const POSTGRES_PORT: u16 = 5432;

/// Directory the postgres image executes seed scripts from on first boot
pub const INIT_DIR: &str = "/docker-entrypoint-initdb.d";

/// Everything a runtime needs to start one instance
#[derive(Debug, Clone)]
pub struct InstanceSpec {
    pub image: String,
    pub tag: String,
    pub database: String,
    pub username: String,
    pub password: String,
    pub seed_scripts: Vec<SeedScript>,
    pub startup_timeout: Duration,
}

/// A script copied into [`INIT_DIR`] before the instance boots
#[derive(Debug, Clone)]
pub struct SeedScript {
    pub name: String,
    pub contents: Vec<u8>,
}

impl InstanceSpec {
    /// Build a spec from configuration, reading seed scripts from disk
    pub fn from_config(config: &FixtureConfig) -> FixtureResult<Self> {
        let seed_scripts = config
            .seed_scripts
            .iter()
            .enumerate()
            .map(|(i, path)| {
                let contents = std::fs::read(path).map_err(|e| {
                    FixtureError::Provisioning(format!(
                        "Cannot read seed script {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                let file_name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "seed.sql".to_string());
                // Prefix keeps the configured order; the image runs scripts sorted by name
                Ok(SeedScript {
                    name: format!("{:02}-{}", i, file_name),
                    contents,
                })
            })
            .collect::<FixtureResult<Vec<_>>>()?;

        Ok(Self {
            image: config.image.clone(),
            tag: config.tag.clone(),
            database: config.database.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            seed_scripts,
            startup_timeout: config.startup_timeout(),
        })
    }

    pub fn image_ref(&self) -> String {
        format!("{}:{}", self.image, self.tag)
    }
}

/// Something that can start database instances
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Start an instance.
    ///
    /// # Errors
    /// Returns `FixtureError::Provisioning` if the instance cannot be allocated
    async fn start(&self, spec: &InstanceSpec) -> FixtureResult<Box<dyn RunningInstance>>;
}

/// A started instance
#[async_trait]
pub trait RunningInstance: Send + Sync {
    /// Runtime-specific identifier (container id)
    fn id(&self) -> &str;

    /// How to reach the database inside the instance
    fn connection(&self) -> &ConnectionConfig;

    /// Stop and remove the instance. Calling it again is a no-op.
    async fn stop(&mut self) -> FixtureResult<()>;
}

/// Starts postgres containers through the local Docker daemon
#[derive(Debug, Default, Clone, Copy)]
pub struct DockerRuntime;

struct DockerInstance {
    container: Option<ContainerAsync<GenericImage>>,
    id: String,
    connection: ConnectionConfig,
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn start(&self, spec: &InstanceSpec) -> FixtureResult<Box<dyn RunningInstance>> {
        let provisioning = |e: testcontainers::TestcontainersError| {
            FixtureError::Provisioning(format!("{}: {}", spec.image_ref(), e))
        };

        // The init-time server only listens on the unix socket, so the TCP
        // line shows up once the seeded server is really up.
        let mut request = GenericImage::new(spec.image.as_str(), spec.tag.as_str())
            .with_exposed_port(POSTGRES_PORT.tcp())
            .with_wait_for(WaitFor::message_on_stderr("port 5432"))
            .with_env_var("POSTGRES_USER", spec.username.as_str())
            .with_env_var("POSTGRES_PASSWORD", spec.password.as_str())
            .with_env_var("POSTGRES_DB", spec.database.as_str())
            .with_startup_timeout(spec.startup_timeout);

        for script in &spec.seed_scripts {
            request = request.with_copy_to(
                format!("{}/{}", INIT_DIR, script.name),
                script.contents.clone(),
            );
        }

        let container = request.start().await.map_err(provisioning)?;
        let host = container.get_host().await.map_err(provisioning)?;
        let port = container
            .get_host_port_ipv4(POSTGRES_PORT.tcp())
            .await
            .map_err(provisioning)?;

        let connection = ConnectionConfig::local(
            host.to_string(),
            port,
            spec.database.as_str(),
            spec.username.as_str(),
            spec.password.as_str(),
        );

        Ok(Box::new(DockerInstance {
            id: container.id().to_string(),
            container: Some(container),
            connection,
        }))
    }
}

#[async_trait]
impl RunningInstance for DockerInstance {
    fn id(&self) -> &str {
        &self.id
    }

    fn connection(&self) -> &ConnectionConfig {
        &self.connection
    }

    async fn stop(&mut self) -> FixtureResult<()> {
        let Some(container) = self.container.take() else {
            return Ok(());
        };
        container
            .stop()
            .await
            .map_err(|e| FixtureError::Teardown(format!("{}: {}", self.id, e)))?;
        // Dropping the stopped container removes it
        drop(container);
        Ok(())
    }
}

/// Uses a database that is already running; never starts or stops anything
#[derive(Debug, Clone)]
pub struct ExternalRuntime {
    connection: ConnectionConfig,
}

impl ExternalRuntime {
    pub fn new(connection: ConnectionConfig) -> Self {
        Self { connection }
    }
}

struct ExternalInstance {
    connection: ConnectionConfig,
}

#[async_trait]
impl ContainerRuntime for ExternalRuntime {
    fn name(&self) -> &'static str {
        "external"
    }

    async fn start(&self, spec: &InstanceSpec) -> FixtureResult<Box<dyn RunningInstance>> {
        if !spec.seed_scripts.is_empty() {
            tracing::warn!(
                count = spec.seed_scripts.len(),
                "Seed scripts are ignored for an external database"
            );
        }
        Ok(Box::new(ExternalInstance {
            connection: self.connection.clone(),
        }))
    }
}

#[async_trait]
impl RunningInstance for ExternalInstance {
    fn id(&self) -> &str {
        "external"
    }

    fn connection(&self) -> &ConnectionConfig {
        &self.connection
    }

    async fn stop(&mut self) -> FixtureResult<()> {
        Ok(())
    }
}
