//! fixturegres - run the cancellation scenarios against a disposable database
//!
//! Exit codes: 0 when every scenario passes, 1 when any fails, 2 when the
//! run is aborted by provisioning, setup or configuration errors.

use anyhow::{Context, Result};
use clap::Parser;
use fixturegres::config::{FixtureConfig, load_fixture_config, load_fixture_config_from};
use fixturegres::db::SchemaSource;
use fixturegres::fixture::{FixtureManager, RunScope};
use fixturegres::scenario::{self, RunReport, Scenario};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(name = "fixturegres", version, about)]
struct Args {
    /// Config file (defaults to ~/.fixturegres/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Container image name
    #[arg(long)]
    image: Option<String>,

    /// Container image tag
    #[arg(long)]
    tag: Option<String>,

    /// Use an already-running database instead of a container
    #[arg(long, value_name = "URL")]
    database_url: Option<String>,

    /// Setup script to run instead of the configured schema
    #[arg(long, value_name = "PATH")]
    schema_file: Option<PathBuf>,

    /// Run only these scenarios (repeatable)
    #[arg(long = "scenario", value_name = "NAME", value_parser = parse_scenario)]
    scenarios: Vec<Scenario>,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

fn parse_scenario(name: &str) -> std::result::Result<Scenario, String> {
    Scenario::from_name(name).ok_or_else(|| {
        let known: Vec<_> = Scenario::ALL.iter().map(|s| s.name()).collect();
        format!("unknown scenario '{}' (known: {})", name, known.join(", "))
    })
}

fn build_config(args: &Args) -> Result<FixtureConfig> {
    let mut config = match &args.config {
        Some(path) => load_fixture_config_from(path)?,
        None => load_fixture_config()?,
    };
    config.apply_env_overrides()?;

    if let Some(image) = &args.image {
        config.image = image.clone();
    }
    if let Some(tag) = &args.tag {
        config.tag = tag.clone();
    }
    if let Some(url) = &args.database_url {
        config.external_url = Some(url.clone());
    }
    if let Some(path) = &args.schema_file {
        config.schema = SchemaSource::File(path.clone());
    }
    Ok(config)
}

async fn run(args: Args) -> Result<RunReport> {
    let config = build_config(&args)?;
    let schema = config.schema.load().context("Loading schema script")?;
    let scenarios = if args.scenarios.is_empty() {
        Scenario::ALL.to_vec()
    } else {
        args.scenarios.clone()
    };

    let manager = FixtureManager::for_config(&config)?;
    let scope = RunScope::new(manager, config);
    let report = scope
        .run(|handle| async move {
            scenario::run_suite(handle, &schema, &scenarios)
                .await
                .map_err(anyhow::Error::from)
        })
        .await?;
    Ok(report)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    fixturegres::logging::init_logging(args.json);
    let json = args.json;

    match run(args).await {
        Ok(report) => {
            if json {
                match serde_json::to_string_pretty(&report) {
                    Ok(text) => println!("{}", text),
                    Err(e) => eprintln!("Failed to encode report: {}", e),
                }
            } else {
                print!("{}", report.render());
            }
            if report.passed() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "Run aborted");
            eprintln!("fixturegres: {:#}", e);
            ExitCode::from(2)
        }
    }
}
