//! # Plateau Load Test CLI
//!
//! ```bash
//! # Progressive 2K/6K plateau test
//! plateau-loadtest run --preset progressive --target http://localhost:4000
//!
//! # Custom scenario with exports
//! plateau-loadtest run --config plateau.toml --output report.json --prometheus-output metrics.prom
//!
//! # Dump a preset as TOML
//! plateau-loadtest config --preset endurance
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use plateau_loadtest::{LoadTestConfig, LoadTestRunner, RunReport, ThresholdCheckResult};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "plateau-loadtest")]
#[command(version)]
#[command(about = "Staged virtual-user load generator for cart services", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a load test
    Run {
        /// TOML scenario file (takes precedence over --preset)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Built-in scenario: progressive or endurance
        #[arg(short, long, default_value = "progressive")]
        preset: String,

        /// Override the target base URL
        #[arg(short, long, env = "PLATEAU_TARGET")]
        target: Option<String>,

        /// Write the report as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Write final counters in Prometheus text format
        #[arg(long)]
        prometheus_output: Option<PathBuf>,
    },

    /// Print a preset scenario as TOML
    Config {
        #[arg(short, long, default_value = "progressive")]
        preset: String,
    },
}

fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Run {
            config,
            preset,
            target,
            output,
            prometheus_output,
        } => {
            let mut config = match config {
                Some(path) => LoadTestConfig::from_file(&path)
                    .with_context(|| format!("loading {}", path.display()))?,
                None => LoadTestConfig::preset(&preset)?,
            };
            if let Some(target) = target {
                config.target_url = target;
            }

            let passes = run(config, output, prometheus_output).await?;
            if !passes {
                std::process::exit(1);
            }
        }
        Commands::Config { preset } => {
            print!("{}", LoadTestConfig::preset(&preset)?.to_toml()?);
        }
    }

    Ok(())
}

async fn run(
    config: LoadTestConfig,
    output: Option<PathBuf>,
    prometheus_output: Option<PathBuf>,
) -> anyhow::Result<bool> {
    let runner = LoadTestRunner::new(config)?;
    let snapshot = runner.run().await?;

    let config = runner.config();
    let report = RunReport::from_snapshot(
        &snapshot,
        config.name.as_str(),
        &config.phases,
        runner.timeline(),
    );
    println!("\n{}", report.render());

    let verdict = ThresholdCheckResult::evaluate(&report, &config.thresholds);
    println!("{}", verdict.render());

    if let Some(path) = output {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;
        info!("Report saved to {}", path.display());
    }

    if let Some(path) = prometheus_output {
        std::fs::write(&path, snapshot.to_prometheus()?)
            .with_context(|| format!("writing {}", path.display()))?;
        info!("Prometheus metrics saved to {}", path.display());
    }

    Ok(verdict.passes)
}
