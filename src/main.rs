use anyhow::Context;
use clap::Parser;
use flowprobe::{ChromeLauncher, HarnessConfig, Scenario, ScenarioRunner, ScenarioStatus};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use url::Url;

/// Runs one scripted UI verification scenario against a live web
/// application and reports pass/fail.
#[derive(Parser)]
#[command(name = "flowprobe", version, about)]
struct Cli {
    /// Scenario definition file (JSON)
    #[arg(long)]
    scenario: PathBuf,

    /// Base URL relative navigation targets are resolved against
    #[arg(long)]
    base_url: Option<Url>,

    /// Override the settle delay before each interaction, in milliseconds
    #[arg(long)]
    settle_ms: Option<u64>,

    /// Run with a visible browser window
    #[arg(long)]
    headed: bool,

    /// Print the full result as JSON on stdout
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let raw = tokio::fs::read_to_string(&cli.scenario)
        .await
        .with_context(|| format!("reading scenario file {}", cli.scenario.display()))?;
    let mut scenario: Scenario = serde_json::from_str(&raw)
        .with_context(|| format!("parsing scenario file {}", cli.scenario.display()))?;

    if let Some(base) = &cli.base_url {
        scenario = scenario.with_base_url(base)?;
    }

    let mut config = HarnessConfig::default();
    config.headless = !cli.headed;
    if let Some(settle_ms) = cli.settle_ms {
        config.timing.settle_delay_ms = settle_ms;
    }

    let runner = ScenarioRunner::new(ChromeLauncher, config);
    let result = runner.run(&scenario).await?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    }

    match result.status {
        ScenarioStatus::Passed => {
            info!(scenario = %result.name, "scenario passed");
            Ok(())
        }
        ScenarioStatus::Failed => {
            match result.first_failed_step {
                Some(index) => error!(
                    scenario = %result.name,
                    step = index,
                    diagnostics = ?result.diagnostics,
                    "scenario failed"
                ),
                None => error!(
                    scenario = %result.name,
                    diagnostics = ?result.diagnostics,
                    "scenario failed before any step ran"
                ),
            }
            std::process::exit(1);
        }
    }
}
