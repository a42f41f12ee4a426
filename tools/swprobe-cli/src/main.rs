//! Service worker detection from the command line.
//!
//! Every command prints one JSON document on stdout; logs go to stderr.
//!
//! ## Usage
//!
//! ```bash
//! # Full detection with capability score
//! swprobe detect https://example.com/
//!
//! # Single questions, answered by the browser probe
//! swprobe scope https://example.com/
//! swprobe offline https://example.com/ --log-format json
//!
//! # Fail (exit code 1) when the page has no worker
//! swprobe ensure https://example.com/ --config swprobe.json
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::json;
use swprobe_browser::ChromiumLauncher;
use swprobe_common::{init_logging, LogConfig, LogFormat};
use swprobe_core::DetectorConfig;
use swprobe_engine::DetectionOrchestrator;
use swprobe_net::{LoaderConfig, ResourceLoader};
use tracing::debug;
use url::Url;

#[derive(Parser)]
#[command(name = "swprobe")]
#[command(about = "Detect service workers and their capabilities")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// JSON detector configuration; defaults apply to missing fields
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log output format: pretty, compact or json
    #[arg(long, global = true, default_value = "compact")]
    log_format: LogFormat,

    /// Debug-level logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run both probes and report everything found
    Detect {
        url: Url,
        /// Skip the positive-result cache
        #[arg(long)]
        no_cache: bool,
    },

    /// URL of the worker the page starts
    WorkerUrl { url: Url },

    /// Scope of the page's registration
    Scope { url: Url },

    /// Whether the registration holds a push subscription
    Push { url: Url },

    /// Whether the worker handles periodic background sync
    PeriodicSync { url: Url },

    /// Whether the site serves HTML from Cache Storage
    Offline { url: Url },

    /// Detect, failing when no worker is found
    Ensure { url: Url },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::debug()
    } else {
        LogConfig::default()
    };
    init_logging(log_config.with_format(cli.log_format));

    let config = match &cli.config {
        Some(path) => DetectorConfig::from_file(path)?,
        None => DetectorConfig::default(),
    };
    debug!(?config, "Loaded detector configuration");

    let loader = ResourceLoader::new(LoaderConfig {
        user_agent: config.user_agent.clone(),
        accept_language: config.accept_language.clone(),
        default_timeout: config.http_timeout(),
        ..Default::default()
    })?;
    let orchestrator = DetectionOrchestrator::new(config, Arc::new(loader), Arc::new(ChromiumLauncher))?;

    let output = match cli.command {
        Commands::Detect { url, no_cache } => {
            let result = if no_cache {
                orchestrator
                    .detect_all_with(&url, swprobe_engine::CachePolicy::disabled())
                    .await?
            } else {
                orchestrator.detect_all(&url).await?
            };
            serde_json::to_value(result)?
        }
        Commands::WorkerUrl { url } => json!({ "url": orchestrator.get_worker_url(&url).await? }),
        Commands::Scope { url } => json!({ "scope": orchestrator.get_scope(&url).await? }),
        Commands::Push { url } => {
            json!({ "hasPushRegistration": orchestrator.get_push_status(&url).await? })
        }
        Commands::PeriodicSync { url } => {
            json!({ "hasPeriodicBackgroundSync": orchestrator.get_periodic_sync_status(&url).await? })
        }
        Commands::Offline { url } => {
            let supported = orchestrator.get_offline_support(&url).await?;
            json!({
                "offlineSupport": supported,
                "offlineScore": orchestrator.weights().offline_score(supported),
            })
        }
        Commands::Ensure { url } => serde_json::to_value(orchestrator.ensure_service_worker_found(&url).await?)?,
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
