//! Configuration management
//!
//! Handles connection descriptors and fixture settings.

pub mod connections;
pub mod settings;

pub use connections::{ConnectionConfig, SslMode};
pub use settings::{FixtureConfig, load_fixture_config, load_fixture_config_from};
