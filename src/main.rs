//! Sumi-Dispatch main entry point
//!
//! This is the command-line interface for the Sumi-Dispatch crawl governor.

use anyhow::Context;
use clap::Parser;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use sumi_dispatch::config::{load_config_with_hash, Config};
use sumi_dispatch::crawler::{CrawlCoordinator, HttpFetcher, Request};
use sumi_dispatch::output::{print_route_health, print_statistics};
use sumi_dispatch::policy::fetch_robots;
use sumi_dispatch::storage::{open_storage, RunStatus, SqliteStorage, Storage};
use tracing_subscriber::EnvFilter;

/// Sumi-Dispatch: a polite crawl request scheduler
///
/// Sumi-Dispatch crawls from a set of seed URLs while keeping per-domain
/// politeness delays, global and per-domain concurrency limits, rotating
/// outbound identities and health-scored egress routes.
#[derive(Parser, Debug)]
#[command(name = "sumi-dispatch")]
#[command(version = "1.0.0")]
#[command(about = "A polite crawl request scheduler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Extra seed URL (repeatable), added to the seeds in the config
    #[arg(long = "seed", value_name = "URL")]
    seeds: Vec<String>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show what would be dispatched without dispatching
    #[arg(long)]
    dry_run: bool,

    /// Ignore and clear saved resume state
    #[arg(long)]
    fresh: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    let seeds: Vec<String> = config
        .seeds
        .iter()
        .chain(cli.seeds.iter())
        .cloned()
        .collect();

    if cli.dry_run {
        handle_dry_run(&config, &seeds);
        return Ok(());
    }

    if seeds.is_empty() {
        anyhow::bail!("no seed URLs: add `seeds` to the config or pass --seed");
    }

    handle_dispatch(config, &config_hash, &seeds, cli.fresh).await
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("sumi_dispatch=info,warn"),
            1 => EnvFilter::new("sumi_dispatch=debug,info"),
            2 => EnvFilter::new("sumi_dispatch=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: shows the effective configuration
fn handle_dry_run(config: &Config, seeds: &[String]) {
    println!("=== Sumi-Dispatch Dry Run ===\n");

    println!("Scheduler:");
    println!("  Strategy: {:?}", config.scheduler.strategy);
    println!("  Default delay: {}ms", config.scheduler.default_delay_ms);
    println!("  Dedup: {}", config.scheduler.dedup);
    println!("  Max depth: {}", config.scheduler.max_depth);

    println!("\nConcurrency:");
    println!("  Global: {}", config.concurrency.max_concurrent);
    println!("  Per domain: {}", config.concurrency.max_per_domain);

    println!("\nRetry:");
    println!("  Max retries: {}", config.retry.max_retries);
    println!(
        "  Backoff: {}ms doubling up to {}ms",
        config.retry.backoff_base_ms, config.retry.backoff_max_ms
    );

    println!("\nIdentity:");
    println!("  Session persistence: {}", config.identity.session_persistence);
    println!("  Rotation interval: {}", config.identity.rotation_interval);
    println!(
        "  Cache: {} profiles, {}s TTL",
        config.identity.cache_capacity, config.identity.ttl_secs
    );

    println!(
        "\nRoutes ({:?}, {} configured):",
        config.routes.selection,
        config.routes.endpoints.len()
    );
    for endpoint in &config.routes.endpoints {
        println!(
            "  - {} [{}]",
            endpoint.id,
            endpoint.tag.as_deref().unwrap_or("untagged")
        );
    }

    println!("\nBlocked domains ({}):", config.policy.blocked_domains.len());
    for pattern in &config.policy.blocked_domains {
        println!("  - {}", pattern);
    }

    println!("\nDomain overrides ({}):", config.domain.len());
    for entry in &config.domain {
        println!("  - {}: {}ms", entry.domain, entry.delay_ms);
    }

    println!("\nSeeds ({}):", seeds.len());
    for seed in seeds {
        println!("  * {}", seed);
    }

    println!("\n✓ Configuration is valid");
}

/// Runs a dispatch to completion or Ctrl-C, then saves resume state
async fn handle_dispatch(
    config: Config,
    config_hash: &str,
    seeds: &[String],
    fresh: bool,
) -> anyhow::Result<()> {
    let mut storage = open_state(&config, fresh)?;
    let resume = match &storage {
        Some(storage) => storage.load_resume_state()?,
        None => Default::default(),
    };
    let run_id = match storage.as_mut() {
        Some(storage) => Some(storage.create_run(config_hash)?),
        None => None,
    };

    let fetcher = Arc::new(HttpFetcher::new(&config.fetch, &config.policy.robots_agent)?);
    let respect_robots = config.policy.respect_robots;
    let coordinator = CrawlCoordinator::builder(config)
        .fetcher(fetcher.clone())
        .resume(resume)
        .build()
        .await?;

    if respect_robots {
        prefetch_robots(&coordinator, &fetcher, seeds).await;
    }

    let stop = coordinator.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, stopping");
            stop.stop();
        }
    });

    let outcome = coordinator.start(seeds).await;

    if let (Some(storage), Some(run_id)) = (storage.as_mut(), run_id) {
        let status = match &outcome {
            Ok(_) if coordinator.stop_handle().is_stopped() => RunStatus::Interrupted,
            Ok(_) => RunStatus::Completed,
            Err(_) => RunStatus::Failed,
        };
        storage.save_resume_state(run_id, &coordinator.resume_state())?;
        storage.finish_run(run_id, status)?;
        tracing::info!("Run {} saved as {}", run_id, status.to_db_string());
    }

    let stats = outcome?;
    println!();
    print_statistics(&stats);
    print_route_health(&coordinator.get_route_health());

    Ok(())
}

fn open_state(config: &Config, fresh: bool) -> anyhow::Result<Option<SqliteStorage>> {
    let Some(path) = &config.output.state_path else {
        return Ok(None);
    };

    let mut storage =
        open_storage(Path::new(path)).with_context(|| format!("failed to open state {}", path))?;

    if fresh {
        tracing::info!("Clearing saved resume state");
        storage.clear_resume_state()?;
    } else if let Some(run) = storage.get_latest_run()? {
        tracing::info!("Resuming after run {} ({})", run.id, run.status.to_db_string());
    }

    Ok(Some(storage))
}

/// Fetches robots.txt once per seed origin before dispatch starts
async fn prefetch_robots(coordinator: &CrawlCoordinator, fetcher: &HttpFetcher, seeds: &[String]) {
    let mut origins = BTreeSet::new();
    for seed in seeds {
        if let Ok(request) = Request::get(seed) {
            if origins.insert(request.domain().to_string()) {
                let rules = fetch_robots(fetcher.direct_client(), request.url()).await;
                coordinator.register_robots(request.domain(), rules);
            }
        }
    }
    tracing::info!("Loaded robots.txt for {} origins", origins.len());
}
