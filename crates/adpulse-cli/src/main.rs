use std::path::PathBuf;

use adpulse_core::{Platform, View};
use adpulse_views::{totals, Dashboard, DashboardConfig};
use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "adpulse-cli")]
#[command(about = "Ad performance dashboard command-line interface")]
struct Cli {
    /// Log filter, e.g. `info` or `adpulse_storage=debug`.
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    log_level: String,

    /// Read rows from `<dir>/<source>/sample.json` instead of the hosted store.
    #[arg(long, global = true)]
    fixtures: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print the campaigns and daily series of a view as JSON.
    View {
        #[arg(default_value = "principal")]
        view: String,
        /// Print headline totals instead of the full result.
        #[arg(long)]
        totals: bool,
    },
    Insights {
        #[arg(default_value = "principal")]
        view: String,
    },
    Dates {
        #[arg(default_value = "principal")]
        view: String,
    },
    /// Probe a source: `google-ads` or `meta-ads`.
    Status { platform: String },
    Serve,
}

fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(level)
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| anyhow!("invalid log level: {}", e))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(filter)
        .init();

    Ok(())
}

fn parse_view(name: &str) -> View {
    name.parse().unwrap_or(View::Other)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(err) = dotenvy::dotenv() {
        if !err.not_found() {
            eprintln!("ignoring .env: {err}");
        }
    }

    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    let mut config = DashboardConfig::from_env();
    if let Some(dir) = cli.fixtures {
        config.fixtures_dir = Some(dir);
    }
    debug!(fixtures = ?config.fixtures_dir, "configuration loaded");

    let command = cli.command.unwrap_or(Commands::View {
        view: View::Principal.to_string(),
        totals: false,
    });
    match command {
        Commands::Serve => adpulse_web::serve(&config).await,
        command => run(command, &config).await,
    }
}

async fn run(command: Commands, config: &DashboardConfig) -> Result<()> {
    let dashboard = Dashboard::from_config(config).await?;
    match command {
        Commands::View { view, totals: true } => {
            let result = dashboard.load_view(parse_view(&view)).await;
            print_json(&totals(&result))?;
        }
        Commands::View { view, totals: false } => {
            print_json(&dashboard.load_view(parse_view(&view)).await)?;
        }
        Commands::Insights { view } => {
            print_json(&dashboard.load_insights(parse_view(&view)).await)?;
        }
        Commands::Dates { view } => {
            print_json(&dashboard.available_dates(parse_view(&view)).await?)?;
        }
        Commands::Status { platform } => {
            let platform = Platform::from_route_slug(&platform)
                .ok_or_else(|| anyhow!("unknown platform {platform:?}; expected google-ads or meta-ads"))?;
            print_json(&dashboard.source_status(platform).await)?;
        }
        Commands::Serve => adpulse_web::serve(config).await?,
    }

    Ok(())
}
