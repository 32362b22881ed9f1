mod metrics;
mod probe;
mod telemetry;
mod view;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use status_api::{Resolver, RuntimeContext};
use status_query::QueryOptions;
use tracing::info;

use crate::probe::Probe;

#[derive(Parser)]
#[command(
    name = "status-probe",
    about = "Status probe — query a backend health endpoint and render its status"
)]
struct Cli {
    /// API base URL. Takes precedence over STATUS_API_BASE_URL.
    #[arg(long, global = true)]
    api_base_url: Option<String>,

    /// Resolve the base URL as if embedded in a page served from this origin.
    #[arg(long, global = true)]
    origin: Option<String>,

    /// Give up on a request after this many seconds.
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Write Prometheus metrics to this file before exiting.
    #[arg(long, global = true)]
    metrics_out: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the health status once (default).
    Check,
    /// Refetch the health status on an interval until interrupted.
    Watch {
        /// Seconds between refetches.
        #[arg(long, default_value_t = 30)]
        interval: u64,
    },
    /// Print the resolved configuration as JSON.
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init();

    let cli = Cli::parse();

    let context = match cli.origin {
        Some(origin) => RuntimeContext::Browser { origin },
        None => RuntimeContext::Headless,
    };
    let resolver = match cli.api_base_url {
        Some(url) => Resolver::new(Some(url), context),
        None => Resolver::from_env(context),
    };
    let config = resolver.resolve();
    let timeout = cli.timeout.map(Duration::from_secs);

    let outcome = match cli.command.unwrap_or(Commands::Check) {
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(config)?);
            return Ok(());
        }
        Commands::Check => {
            let probe = Probe::new(config, QueryOptions::default(), timeout)?;
            let output = probe.subscribe_view(print_lines);
            println!("{}", view::TITLE);
            let result = probe.check().await;
            drop(output);
            result.map(|_| ()).map_err(anyhow::Error::from)
        }
        Commands::Watch { interval } => {
            let options = QueryOptions {
                stale_while_revalidate: true,
            };
            let probe = Probe::new(config, options, timeout)?;
            let _view = probe.subscribe_view(print_lines);
            println!("{}", view::TITLE);
            info!(interval, "watching service health");
            tokio::select! {
                _ = probe.watch(Duration::from_secs(interval)) => Ok(()),
                res = tokio::signal::ctrl_c() => {
                    info!("interrupted, stopping watch");
                    res.map_err(anyhow::Error::from)
                }
            }
        }
    };

    if let Some(path) = &cli.metrics_out {
        metrics::write_textfile(path)?;
        info!(path = %path.display(), "wrote metrics");
    }

    outcome
}

fn print_lines(lines: Vec<String>) {
    for line in lines {
        println!("{line}");
    }
}
