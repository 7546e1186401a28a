//! Grid-Harvester main entry point
//!
//! This is the command-line interface for the Grid-Harvester catalog crawler.

use anyhow::Context;
use clap::{Parser, ValueEnum};
use grid_harvester::config::{load_config_with_hash, validate, Config};
use grid_harvester::crawler::{run_crawl, store_paths, PhaseSelection};
use grid_harvester::grid::GridPartitioner;
use grid_harvester::output::{load_statistics, print_statistics};
use grid_harvester::storage::StorePaths;
use grid_harvester::Taxonomy;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Grid-Harvester: a grid-partitioned catalog crawler
///
/// Grid-Harvester splits an area into geohash cells, queues them in a
/// persistent task store, and fetches every restaurant and menu in the area
/// with a pool of worker threads. Interrupted crawls resume where they stopped.
#[derive(Parser, Debug)]
#[command(name = "grid-harvester")]
#[command(version = "1.0.0")]
#[command(about = "A grid-partitioned catalog crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Crawl phases to run
    #[arg(long, value_enum, default_value_t = PhaseArg::All)]
    phase: PhaseArg,

    /// Central geohash, overriding [grid].central
    #[arg(long)]
    central: Option<String>,

    /// Expansion depth, overriding [grid].depth
    #[arg(long)]
    depth: Option<u32>,

    /// Store name, overriding [storage].name (e.g. "2024-05-01")
    #[arg(long)]
    db_name: Option<String>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Resume with the existing stores (default behavior)
    #[arg(long, conflicts_with = "fresh")]
    resume: bool,

    /// Drop and recreate the stores before crawling
    #[arg(long, conflicts_with = "resume")]
    fresh: bool,

    /// Validate config and show what would be crawled without actually crawling
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show statistics from the stores and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum PhaseArg {
    All,
    Restaurants,
    Menus,
}

impl From<PhaseArg> for PhaseSelection {
    fn from(arg: PhaseArg) -> Self {
        match arg {
            PhaseArg::All => PhaseSelection::All,
            PhaseArg::Restaurants => PhaseSelection::Restaurants,
            PhaseArg::Menus => PhaseSelection::Menus,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (mut config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load configuration {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    apply_overrides(&mut config, &cli)?;
    let paths = store_paths(&config);

    // Handle different modes
    if cli.dry_run {
        handle_dry_run(&config, &paths)
    } else if cli.stats {
        handle_stats(&config, &paths)
    } else {
        handle_crawl(&config, &paths, &cli, &config_hash)
    }
}

/// Applies command-line overrides and re-validates the result
fn apply_overrides(config: &mut Config, cli: &Cli) -> anyhow::Result<()> {
    if let Some(central) = &cli.central {
        config.grid.central = central.clone();
    }
    if let Some(depth) = cli.depth {
        config.grid.depth = depth;
    }
    if let Some(name) = &cli.db_name {
        config.storage.name = Some(name.clone());
    }

    validate(config).context("Invalid command-line override")?;
    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("grid_harvester=info,warn"),
            1 => EnvFilter::new("grid_harvester=debug,info"),
            2 => EnvFilter::new("grid_harvester=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: validates config and shows what would be crawled
fn handle_dry_run(config: &Config, paths: &StorePaths) -> anyhow::Result<()> {
    let partitioner = GridPartitioner::new(&config.grid.central, config.grid.depth)
        .context("Invalid crawl area")?;
    let cells = partitioner.count();
    let taxonomy = Taxonomy::from_config(&config.taxonomy);

    println!("=== Grid-Harvester Dry Run ===\n");

    println!("Grid:");
    println!("  Central cell: {}", config.grid.central);
    println!("  Depth: {}", config.grid.depth);
    println!("  Cells: {}", cells);

    println!("\nPool:");
    println!("  Worker groups: {}", config.pool.processes);
    println!("  Threads per group: {}", config.pool.threads);
    println!("  Busy timeout: {}s", config.pool.busy_timeout_secs);
    match config.pool.lease_timeout_secs {
        Some(secs) => println!("  Lease timeout: {}s", secs),
        None => println!("  Lease timeout: none"),
    }

    println!("\nRemote:");
    println!("  Base URL: {}", config.remote.base_url);
    println!("  Request timeout: {}s", config.remote.request_timeout_secs);
    match config.retry.max_attempts {
        0 => println!("  Retries: unlimited"),
        n => println!("  Attempts per request: {}", n),
    }

    println!("\nUser Agent:");
    println!("  Name: {}", config.user_agent.crawler_name);
    println!("  Version: {}", config.user_agent.crawler_version);
    println!("  Contact URL: {}", config.user_agent.contact_url);
    println!("  Contact Email: {}", config.user_agent.contact_email);

    println!("\nTaxonomy ({} categories):", taxonomy.len());
    for major in taxonomy.majors() {
        println!("  - {} {} ({} minors)", major.id, major.name, major.minors.len());
    }

    println!("\nStores:");
    println!("  Status: {}", paths.status.display());
    println!("  Data: {}", paths.data.display());
    println!("  Log: {}", paths.log.display());

    println!("\n✓ Configuration is valid");
    println!(
        "✓ Would issue {} restaurant requests ({} cells x {} categories)",
        cells as u64 * taxonomy.len() as u64,
        cells,
        taxonomy.len()
    );

    Ok(())
}

/// Handles the --stats mode: shows statistics from the stores
fn handle_stats(config: &Config, paths: &StorePaths) -> anyhow::Result<()> {
    if !paths.exist() {
        anyhow::bail!("No stores found at {}", paths.status.display());
    }

    println!("Status store: {}\n", paths.status.display());

    let stats = load_statistics(paths, config.pool.busy_timeout())
        .context("Failed to load statistics")?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the main crawl operation
fn handle_crawl(
    config: &Config,
    paths: &StorePaths,
    cli: &Cli,
    config_hash: &str,
) -> anyhow::Result<()> {
    if cli.fresh {
        tracing::info!("Starting fresh crawl (existing stores are reset)");
    } else if paths.exist() {
        tracing::info!("Resuming crawl with stores at {}", paths.status.display());
    } else {
        tracing::info!("Starting crawl with new stores at {}", paths.status.display());
    }

    tracing::info!(
        "Central {}, depth {}, {} groups x {} threads",
        config.grid.central,
        config.grid.depth,
        config.pool.processes,
        config.pool.threads
    );

    let summary = run_crawl(
        config,
        paths,
        cli.phase.into(),
        cli.fresh,
        Some(config_hash),
    )
    .context("Crawl failed")?;

    if let Some(phase) = &summary.restaurants {
        tracing::info!(
            "Restaurants phase: {} cells done, {} failed",
            phase.units.done,
            phase.units.failed
        );
    }
    if let Some(phase) = &summary.menus {
        tracing::info!(
            "Menus phase: {} restaurants done, {} not found, {} failed",
            phase.units.done,
            phase.units.not_found,
            phase.units.failed
        );
    }
    tracing::info!("Crawl completed successfully");

    Ok(())
}
