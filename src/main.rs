//! Mock Deployment - CLI Entry Point

use anyhow::Result;
use clap::Parser;
use mock_deployment::scenario::run_scenario;
use mock_deployment::MockDeploymentConfig;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(
    name = "mock-deployment",
    about = "Run a scenario against a mock document-database deployment and report captured command events",
    version
)]
struct Args {
    /// Path to scenario file
    #[arg(short, long, default_value = "scenario.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: Level,

    /// Print the bundled default scenario and exit
    #[arg(long)]
    print_config: bool,

    /// Validate the scenario and exit
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr so the report on stdout stays parseable
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if args.print_config {
        let default_config = include_str!("../demos/default-scenario.yaml");
        println!("{}", default_config);
        return Ok(());
    }

    let config = if args.config.exists() {
        info!(path = ?args.config, "Loading scenario");
        MockDeploymentConfig::from_file(&args.config)?
    } else if args.validate {
        anyhow::bail!("Scenario file not found: {:?}", args.config);
    } else {
        info!("Using bundled default scenario");
        MockDeploymentConfig::from_yaml(include_str!("../demos/default-scenario.yaml"))?
    };

    if args.validate {
        config.validate()?;
        println!(
            "Scenario is valid ({} responses, {} steps)",
            config.responses.len(),
            config.steps.len()
        );
        return Ok(());
    }

    let report = run_scenario(&config).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
