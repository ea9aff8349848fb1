//! Crawlbeat main entry point
//!
//! This is the command-line interface for the Crawlbeat crawl orchestrator.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use crawlbeat::clock::Clock;
use crawlbeat::config::load_settings;
use crawlbeat::output::{
    render_cleanup, render_failed_tasks, render_listing, render_queue_counts, render_scheduled,
};
use crawlbeat::{AppContext, Settings};
use std::path::PathBuf;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

/// Crawlbeat: scheduled, incremental crawl pipelines
///
/// Crawlers are described in TOML files. `beat` starts them on their
/// schedules, `process` runs their stages from the shared task queue.
#[derive(Parser, Debug)]
#[command(name = "crawlbeat")]
#[command(version)]
#[command(about = "Crawl pipeline orchestrator", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalFlags,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct GlobalFlags {
    /// Enable debug logging
    #[arg(long, global = true, overrides_with = "no_debug")]
    debug: bool,

    #[arg(long, global = true, hide = true)]
    no_debug: bool,

    /// Use the HTTP response cache
    #[arg(long, global = true, overrides_with = "no_cache")]
    cache: bool,

    /// Bypass the HTTP response cache
    #[arg(long, global = true)]
    no_cache: bool,

    /// Skip items processed by earlier runs
    #[arg(long, global = true, overrides_with = "non_incremental")]
    incremental: bool,

    /// Process every item, even if seen before
    #[arg(long, global = true)]
    non_incremental: bool,

    /// Crawler definition directory or file
    #[arg(long, global = true, value_name = "DIR", env = "CRAWLBEAT_CONFIG_PATH")]
    config: Option<PathBuf>,
}

impl GlobalFlags {
    /// Applies flags given on the command line over environment settings
    fn apply(&self, settings: &mut Settings) {
        if let Some(v) = flag(self.debug, self.no_debug) {
            settings.debug = v;
        }
        if let Some(v) = flag(self.cache, self.no_cache) {
            settings.http_cache = v;
        }
        if let Some(v) = flag(self.incremental, self.non_incremental) {
            settings.incremental = v;
        }
        if let Some(path) = &self.config {
            settings.config_path = path.clone();
        }
    }
}

fn flag(on: bool, off: bool) -> Option<bool> {
    match (on, off) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a crawler run (enqueue its entry stage)
    Run {
        /// Crawler name
        crawler: String,
    },

    /// Delete all queued tasks and stored state of a crawler
    Flush {
        /// Crawler name
        crawler: String,
    },

    /// Execute queued tasks until interrupted
    Process {
        /// Number of workers (defaults to CRAWLBEAT_WORKERS)
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Start due crawlers periodically until interrupted
    Beat,

    /// List crawlers and whether they are due
    List,

    /// Requeue abandoned tasks and clear finished runs
    Cleanup,

    /// Start every due crawler once
    Scheduled,

    /// Show the failed tasks of a crawler
    Failed {
        /// Crawler name
        crawler: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = load_settings().context("Failed to load settings")?;
    cli.global.apply(&mut settings);

    setup_logging(settings.debug);

    let ctx = AppContext::init(settings).context("Failed to initialize")?;

    match cli.command {
        Command::Run { crawler } => handle_run(&ctx, &crawler),
        Command::Flush { crawler } => handle_flush(&ctx, &crawler),
        Command::Process { workers } => handle_process(&ctx, workers).await,
        Command::Beat => handle_beat(&ctx).await,
        Command::List => handle_list(&ctx),
        Command::Cleanup => handle_cleanup(&ctx),
        Command::Scheduled => handle_scheduled(&ctx),
        Command::Failed { crawler } => handle_failed(&ctx, &crawler),
    }
}

/// Sets up the tracing subscriber; `RUST_LOG` takes precedence
fn setup_logging(debug: bool) {
    let default = if debug {
        "crawlbeat=debug,info"
    } else {
        "crawlbeat=info,warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(debug)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

fn handle_run(ctx: &AppContext, name: &str) -> anyhow::Result<()> {
    let crawler = ctx.crawler(name)?;
    let run_id = crawler.start()?;
    println!("Queued run {} of {}", run_id, crawler.name());
    Ok(())
}

fn handle_flush(ctx: &AppContext, name: &str) -> anyhow::Result<()> {
    let crawler = ctx.crawler(name)?;
    let report = crawler.flush()?;
    println!("Flushed {}:", crawler.name());
    println!("  Tasks: {}", report.tasks);
    println!("  Fingerprints: {}", report.fingerprints);
    println!("  Cache entries: {}", report.cache_entries);
    Ok(())
}

async fn handle_process(ctx: &AppContext, workers: Option<usize>) -> anyhow::Result<()> {
    let workers = workers.unwrap_or(ctx.settings().workers).max(1);
    let counts = ctx.services.queue.counts()?;
    tracing::info!(
        workers,
        http_cache = ctx.services.cache.is_enabled(),
        incremental = ctx.services.incremental.is_enabled(),
        "Processing tasks ({})",
        render_queue_counts(&counts)
    );

    let shutdown = shutdown_on_ctrl_c();
    ctx.runner().run(workers, shutdown).await?;
    Ok(())
}

async fn handle_beat(ctx: &AppContext) -> anyhow::Result<()> {
    let shutdown = shutdown_on_ctrl_c();
    ctx.beat().run(shutdown).await?;
    Ok(())
}

fn handle_list(ctx: &AppContext) -> anyhow::Result<()> {
    let rows = ctx.registry.listing(ctx.services.clock.now())?;
    print!("{}", render_listing(&rows));
    Ok(())
}

fn handle_cleanup(ctx: &AppContext) -> anyhow::Result<()> {
    let reports = ctx.registry.run_cleanup()?;
    print!("{}", render_cleanup(&reports));
    Ok(())
}

fn handle_scheduled(ctx: &AppContext) -> anyhow::Result<()> {
    let report = ctx.registry.run_scheduled()?;
    print!("{}", render_scheduled(&report));
    Ok(())
}

fn handle_failed(ctx: &AppContext, name: &str) -> anyhow::Result<()> {
    let crawler = ctx.crawler(name)?;
    print!("{}", render_failed_tasks(&crawler.failed_tasks()?));
    Ok(())
}

/// Returns a receiver that flips to true on the first Ctrl-C
fn shutdown_on_ctrl_c() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            // Dropping the sender would stop the loops; keep running instead
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
        tracing::info!("Shutdown requested, finishing current tasks");
        let _ = tx.send(true);
    });
    rx
}
