// src/bin/cli.rs

//! Stockwatch CLI
//!
//! Local execution entry point for the stock monitor.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use stockwatch::{
    error::Result,
    models::Config,
    pipeline::Monitor,
    services::{AlertSink, Classifier, HttpFetcher, LogSink, PageFetcher, WebhookDispatcher},
    storage::{LocalStore, ProductStore},
    targets::TargetProvider,
    utils::url::domain_of,
};

/// Stockwatch - Retail Restock Monitor
#[derive(Parser, Debug)]
#[command(
    name = "stockwatch",
    version,
    about = "Monitors retail product pages and alerts on restocks"
)]
struct Cli {
    /// Path to the state directory containing config and URL files
    #[arg(short, long, default_value = "state")]
    state_dir: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll all targets continuously
    Run,

    /// Run a single scan cycle and exit
    Scan,

    /// Fetch and classify one URL
    Check {
        /// Product or listing page URL
        url: String,
    },

    /// Validate configuration files
    Validate,

    /// Show tracked product state
    Info,
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Wire the monitor from configuration and the state directory.
async fn build_monitor(config: Config, state_dir: &Path) -> Result<Monitor> {
    let provider = TargetProvider::new(state_dir, config.groups.clone());
    let fetcher = HttpFetcher::new(&config)?;
    let store = LocalStore::new(state_dir.join("products.json"));
    let sink: Box<dyn AlertSink> = match WebhookDispatcher::from_config(&config.dispatch)? {
        Some(dispatcher) => Box::new(dispatcher),
        None => {
            log::warn!("No webhook configured; alerts will only reach the log");
            Box::new(LogSink)
        }
    };
    Monitor::new(config, provider, Box::new(fetcher), Box::new(store), sink).await
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    log::info!("Stockwatch starting...");

    let config_path = cli.state_dir.join("config.toml");
    let config = Config::load_or_default(&config_path);

    match cli.command {
        Command::Run => {
            config.validate()?;
            let mut monitor = build_monitor(config, &cli.state_dir).await?;
            monitor.run().await?;
        }

        Command::Scan => {
            config.validate()?;
            let mut monitor = build_monitor(config, &cli.state_dir).await?;
            let stats = monitor.run_cycle().await?;
            log::info!(
                "Scan: {}/{} targets fetched ({} skipped), {} candidates, \
                 {} confirmed, {} products tracked",
                stats.fetched,
                stats.targets,
                stats.skipped,
                stats.candidates,
                stats.confirmed,
                stats.tracked
            );
        }

        Command::Check { url } => {
            let fetcher = HttpFetcher::new(&config)?;
            let classifier = Classifier::new(&config.rules);
            let domain = domain_of(&url).unwrap_or_default();
            let policy = config.policy_for(&domain);

            let page = fetcher.fetch(&url, &policy).await?;
            let result = classifier.classify(&page.html);

            log::info!("HTTP {} from {}", page.status, page.final_url);
            log::info!(
                "Stock state: {:?} (source: {:?})",
                result.kind,
                result.matched_source
            );
            if let Some(name) = &result.name {
                log::info!("Name: {}", name);
            }
            if let Some(price) = &result.price {
                log::info!("Price: {}", price);
            }
        }

        Command::Validate => {
            log::info!("Validating configuration...");
            config.validate()?;
            for group in &config.groups {
                let path = cli.state_dir.join(&group.file);
                if !path.exists() {
                    log::warn!("Group {} URL file missing: {}", group.name, path.display());
                }
            }
            log::info!(
                "Config OK ({} groups, {} domain policies)",
                config.groups.len(),
                config.domains.len()
            );
        }

        Command::Info => {
            let store = LocalStore::new(cli.state_dir.join("products.json"));
            let records = store.load_all().await?;
            if records.is_empty() {
                log::info!("No product state found yet.");
            } else {
                for (group, products) in &records {
                    let available = products.values().filter(|r| r.available).count();
                    log::info!(
                        "Group {}: {} products tracked, {} available",
                        group,
                        products.len(),
                        available
                    );
                }
            }
        }
    }

    log::info!("Done!");

    Ok(())
}
