//! Water Quality Dashboard CLI
//!
//! Serves the dashboard, or runs a single fetch or export from the shell.

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use water_quality_dashboard::{
    activity::create_shared_log_with_persistence,
    build_export,
    config::Config,
    fetcher::{run_refresh, Fetcher, FetcherConfig},
    server::{run, ServerConfig},
    store::{create_shared_store, persist, ReadingStore, SharedStore},
    AggregationWidth, DashboardQuery, ExportFormat, PipelineSettings, TimeRange, VERSION,
};

#[derive(Parser)]
#[command(name = "wq-dashboard")]
#[command(version = VERSION)]
#[command(about = "Water quality monitoring dashboard", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the dashboard and poll the upstream API
    Serve {
        /// Port to listen on (overrides PORT)
        #[arg(long)]
        port: Option<u16>,

        /// Upstream API base URL (overrides API_URL)
        #[arg(long)]
        api_url: Option<String>,

        /// Enable debug logging (overrides DEBUG)
        #[arg(long)]
        debug: bool,
    },

    /// Fetch readings from the upstream API once
    Fetch,

    /// Export aggregated readings to a spreadsheet
    Export {
        /// Output directory
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Export format (xlsx or csv)
        #[arg(long, default_value = "xlsx")]
        format: String,

        /// Time range (1H, 6H, 12H, 1D, 1W)
        #[arg(long, default_value = "6H")]
        range: String,

        /// Aggregation (10T, 30T, H, 4H, D)
        #[arg(long, default_value = "10T")]
        aggregation: String,
    },

    /// Show configuration
    Config,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Warning: Could not load config, using defaults: {e}");
            Config::default()
        }
    };

    if let Commands::Serve {
        port,
        ref api_url,
        debug,
    } = cli.command
    {
        if let Some(port) = port {
            config.port = port;
        }
        if let Some(url) = api_url {
            config.api_base_url = url.clone();
        }
        config.debug |= debug;
    }

    init_tracing(config.debug);

    let result = match cli.command {
        Commands::Serve { .. } => cmd_serve(config).await,
        Commands::Fetch => cmd_fetch(config).await,
        Commands::Export {
            output,
            format,
            range,
            aggregation,
        } => cmd_export(config, output, &format, &range, &aggregation).await,
        Commands::Config => cmd_config(&config),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Open the persisted store for this configuration.
fn open_store(config: &Config) -> anyhow::Result<SharedStore> {
    let tz = config.tz()?;
    let store = ReadingStore::with_persistence(config.retention, tz, config.readings_path());
    Ok(create_shared_store(store))
}

async fn cmd_serve(config: Config) -> anyhow::Result<()> {
    println!("Water Quality Dashboard v{VERSION}");
    println!();

    if let Err(e) = config.ensure_directories() {
        eprintln!("Warning: Could not create directories: {e}");
    }

    let store = open_store(&config)?;
    let activity = create_shared_log_with_persistence(config.activity_path());
    let server_config = ServerConfig::from_config(&config)?;

    println!("  Upstream: {}", config.api_url());
    println!("  Refresh interval: {}s", config.refresh_interval.as_secs());
    println!("  Timezone: {}", config.timezone);
    println!("  Retention: {:?}", config.retention);
    println!("  Debug: {}", config.debug);

    let (addr, shutdown_tx) = run(server_config, store.clone(), activity.clone()).await?;

    println!();
    println!("Dashboard available at http://{addr}/dashboard/");
    println!("Press Ctrl+C to stop");
    println!();

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    println!();
    println!("Shutting down...");
    let _ = shutdown_tx.send(());

    if let Err(e) = persist(&store).await {
        eprintln!("Warning: Could not save readings: {e}");
    }
    if let Err(e) = activity.save() {
        eprintln!("Warning: Could not save activity stats: {e}");
    }

    println!();
    println!("{}", activity.summary());
    Ok(())
}

async fn cmd_fetch(config: Config) -> anyhow::Result<()> {
    if let Err(e) = config.ensure_directories() {
        eprintln!("Warning: Could not create directories: {e}");
    }

    let store = open_store(&config)?;
    let activity = create_shared_log_with_persistence(config.activity_path());
    let fetcher = Fetcher::new(FetcherConfig::from_config(&config)?)?;

    println!("Fetching from {}...", fetcher.url());
    let summary = run_refresh(&fetcher, &store, &activity).await?;

    println!("Received: {}", summary.received);
    println!("New readings: {}", summary.added);
    println!("Pruned: {}", summary.pruned);
    println!("Stored: {}", summary.total);

    if let Some(latest) = store.read().await.latest() {
        println!("Latest reading: {}", latest.timestamp.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    Ok(())
}

async fn cmd_export(
    config: Config,
    output: Option<PathBuf>,
    format: &str,
    range: &str,
    aggregation: &str,
) -> anyhow::Result<()> {
    let tz = config.tz()?;
    let store = open_store(&config)?;
    let activity = create_shared_log_with_persistence(config.activity_path());

    // Best effort: export whatever is stored if upstream is unreachable
    let fetcher = Fetcher::new(FetcherConfig::from_config(&config)?)?;
    if let Err(e) = run_refresh(&fetcher, &store, &activity).await {
        eprintln!("Warning: Fetch failed, exporting stored readings: {e}");
    }

    let query = DashboardQuery {
        range: TimeRange::parse(range),
        width: AggregationWidth::parse(aggregation),
        ..DashboardQuery::default()
    };
    let settings = PipelineSettings {
        origin: config.bucket_origin,
        tz,
    };

    let readings = store.read().await.readings(Utc::now());
    let Some(document) =
        build_export(&readings, &query, &settings, ExportFormat::parse(format), Utc::now())?
    else {
        println!("No readings stored; nothing to export.");
        println!("Run 'wq-dashboard fetch' to pull data from the upstream API.");
        return Ok(());
    };

    let export_dir = output.unwrap_or_else(|| config.export_path.clone());
    let path = document.write_to(&export_dir)?;
    activity.record_export();
    if let Err(e) = activity.save() {
        eprintln!("Warning: Could not save activity stats: {e}");
    }

    println!(
        "Exported {} readings ({} / {}) to {:?}",
        readings.len(),
        query.range.label(),
        query.width.label(),
        path
    );
    Ok(())
}

fn cmd_config(config: &Config) -> anyhow::Result<()> {
    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}
