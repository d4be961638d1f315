// RegionGuard Control Plane - Main Entry Point
//
// Command line front end over the control plane:
// - Quota checks and usage reports
// - Region health and nearest-region lookups
// - Failover decisions and execution
// - Metrics and region health HTTP server
//
// Command results go to stdout as JSON; logs go to stderr.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use regionguard_controlplane::clock::system_clock;
use regionguard_controlplane::config::Config;
use regionguard_controlplane::control_plane::ControlPlane;
use regionguard_controlplane::logging;
use regionguard_controlplane::metrics_server;
use regionguard_controlplane::quota::{
    MetricType, QuotaRequest, TimeGranularity, UsageMetrics, UsageQuery, WindowType,
};
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use tracing::{error, info};

/// RegionGuard: multi-region control plane
#[derive(Parser, Debug)]
#[command(name = "regionguard")]
#[command(author = "RegionGuard Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Quota admission and regional failover for multi-region SaaS", long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file (defaults to the XDG config path)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run quota checks against the in-process counter store
    CheckQuota {
        /// Organization id
        #[arg(long)]
        org: String,

        /// Check the user-level quota instead
        #[arg(long)]
        user: Option<String>,

        /// Check the virtual-key quota instead
        #[arg(long, conflicts_with = "user")]
        key: Option<String>,

        /// requests, tokens or images
        #[arg(long, default_value = "requests")]
        metric: MetricType,

        /// minute, hour, day or month
        #[arg(long, default_value = "minute")]
        granularity: TimeGranularity,

        /// fixed or sliding
        #[arg(long, default_value = "fixed")]
        window: WindowType,

        /// Amount each check consumes
        #[arg(long, default_value_t = 1)]
        increment: u64,

        /// Number of consecutive checks
        #[arg(long, default_value_t = 1)]
        repeat: u32,
    },
    /// Record usage and print the usage report
    Usage {
        /// Organization id
        #[arg(long)]
        org: String,

        /// requests, tokens or images
        #[arg(long, default_value = "tokens")]
        metric: MetricType,

        /// Usage to record before reporting
        #[arg(long, default_value_t = 0)]
        record: u64,

        /// Report start (RFC 3339, defaults to now)
        #[arg(long)]
        from: Option<DateTime<Utc>>,

        /// Report end (RFC 3339, defaults to now)
        #[arg(long)]
        to: Option<DateTime<Utc>>,

        /// day or month
        #[arg(long)]
        granularity: Option<TimeGranularity>,
    },
    /// Show region health
    Health {
        /// Single region (all regions when omitted)
        #[arg(long)]
        region: Option<String>,

        /// Regions to treat as down (requires live_probes = false)
        #[arg(long, value_delimiter = ',')]
        down: Vec<String>,
    },
    /// Find the nearest healthy region
    Nearest {
        /// Region to measure from
        #[arg(long)]
        from: String,

        /// Candidate regions
        #[arg(long, value_delimiter = ',', required = true)]
        candidates: Vec<String>,

        /// Regions to treat as down (requires live_probes = false)
        #[arg(long, value_delimiter = ',')]
        down: Vec<String>,
    },
    /// Decide which region should serve a tenant
    SelectRegion {
        /// Organization id
        #[arg(long)]
        org: String,

        /// User id
        #[arg(long)]
        user: Option<String>,

        /// Primary region
        #[arg(long)]
        primary: String,

        /// Regions to treat as down (requires live_probes = false)
        #[arg(long, value_delimiter = ',')]
        down: Vec<String>,
    },
    /// Move a tenant to another region
    Failover {
        /// Organization id
        #[arg(long)]
        org: String,

        /// User id
        #[arg(long)]
        user: Option<String>,

        /// Source region
        #[arg(long)]
        from: String,

        /// Target region
        #[arg(long)]
        to: String,

        /// Regions to treat as down (requires live_probes = false)
        #[arg(long, value_delimiter = ',')]
        down: Vec<String>,
    },
    /// Serve metrics and region health over HTTP until interrupted
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => {
            anyhow::ensure!(path.exists(), "Config file {:?} does not exist", path);
            Config::load_from_path(path)?
        }
        None => Config::load()?,
    };

    // Initialize tracing
    logging::init_logging(args.verbose, &config.logging)?;

    info!("RegionGuard control plane v0.1.0 starting...");

    let Some(command) = args.command else {
        info!("No command specified. Use \"regionguard --help\" for usage.");
        return Ok(());
    };

    let plane = ControlPlane::build(&config, system_clock()).await?;

    match command {
        Commands::CheckQuota {
            org,
            user,
            key,
            metric,
            granularity,
            window,
            increment,
            repeat,
        } => {
            let request = QuotaRequest::new(metric, granularity, window).increment_by(increment);
            let mut results = Vec::with_capacity(repeat as usize);
            for _ in 0..repeat {
                let result = match (&user, &key) {
                    (Some(user), _) => plane.quota.check_user_quota(&org, user, &request).await?,
                    (None, Some(key)) => plane.quota.check_key_quota(&org, key, &request).await?,
                    (None, None) => plane.quota.check_quota(&org, &request).await?,
                };
                results.push(result);
            }
            print_json(&results)?;
        }
        Commands::Usage {
            org,
            metric,
            record,
            from,
            to,
            granularity,
        } => {
            if record > 0 {
                plane
                    .quota
                    .increment_usage(&org, &UsageMetrics::new(metric, record))
                    .await?;
            }
            let to = to.unwrap_or_else(Utc::now);
            let mut query = UsageQuery::new(from.unwrap_or(to), to).metric(metric);
            if let Some(granularity) = granularity {
                query = query.granularity(granularity);
            }
            print_json(&plane.quota.get_usage(&org, &query).await?)?;
        }
        Commands::Health { region, down } => {
            plane.mark_regions_down(&down).await?;
            match region {
                Some(region) => print_json(&plane.monitor.check_region_health(&region).await)?,
                None => print_json(&plane.monitor.get_all_region_health().await)?,
            }
        }
        Commands::Nearest { from, candidates, down } => {
            plane.mark_regions_down(&down).await?;
            let nearest = plane.monitor.get_nearest_healthy_region(&from, &candidates).await;
            print_json(&json!({ "from": from, "nearest": nearest }))?;
        }
        Commands::SelectRegion {
            org,
            user,
            primary,
            down,
        } => {
            plane.mark_regions_down(&down).await?;
            let decision = plane
                .failover
                .select_region(&org, user.as_deref(), &primary)
                .await?;
            print_json(&decision)?;
        }
        Commands::Failover {
            org,
            user,
            from,
            to,
            down,
        } => {
            plane.mark_regions_down(&down).await?;
            let result = plane
                .failover
                .failover(&org, user.as_deref(), &from, &to)
                .await?;
            print_json(&result)?;
        }
        Commands::Serve => serve(&config, plane).await?,
    }

    Ok(())
}

/// Run the background refresher and the HTTP server until Ctrl-C
async fn serve(config: &Config, plane: ControlPlane) -> Result<()> {
    let refresher = config
        .health
        .refresh_interval()
        .map(|interval| plane.monitor.clone().spawn_refresher(interval));

    let outcome = if config.metrics.enabled {
        let addr = config.metrics.socket_addr()?;
        metrics_server::start_metrics_server(addr, plane.monitor.clone(), shutdown_signal()).await
    } else {
        info!("Metrics server disabled, waiting for Ctrl-C");
        shutdown_signal().await;
        Ok(())
    };

    if let Some(refresher) = refresher {
        refresher.stop().await;
    }
    if let Err(e) = &outcome {
        error!("Server error: {:#}", e);
    }
    outcome
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
    }
    info!("Shutdown requested");
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", text);
    Ok(())
}
