//! pagefan CLI: enumerate paginated sources through the worker pool.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Args, Parser, Subcommand};
use pagefan::config::Config;
use pagefan::engine::{CancellationController, Dispatcher};
use pagefan::paginate::Paginator;
use pagefan::paginate::synthetic::SyntheticSource;
use pagefan::telemetry::init_telemetry;

#[derive(Parser)]
#[command(name = "pagefan", version, about = "Fan paginated fetches out over a worker pool")]
struct Cli {
    /// TOML config file (environment variables still apply on top)
    #[arg(long, global = true, env = "PAGEFAN_CONFIG")]
    config: Option<PathBuf>,
    /// Number of queue workers
    #[arg(long, global = true)]
    workers: Option<usize>,
    /// Job queue capacity
    #[arg(long, global = true)]
    queue_buffer: Option<usize>,
    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch every page of one or more synthetic sources
    Fetch(FetchArgs),
    /// Print the effective configuration
    Config,
}

#[derive(Args)]
struct FetchArgs {
    /// Pages per source
    #[arg(long, default_value_t = 10)]
    pages: u32,
    /// Records per page
    #[arg(long, default_value_t = 20)]
    per_page: usize,
    /// Simulated latency of every page fetch
    #[arg(long, default_value_t = 50)]
    latency_ms: u64,
    /// Make this page fail on every source (repeatable)
    #[arg(long = "fail-page")]
    fail_pages: Vec<u32>,
    /// Number of sources to fetch into one aggregate
    #[arg(long, default_value_t = 1)]
    sources: usize,
    /// Don't report total page counts (forces a sequential walk)
    #[arg(long)]
    hide_total: bool,
    /// Print every fetched record
    #[arg(long)]
    show_items: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::from_env()?,
    };
    if let Some(workers) = cli.workers {
        config.queue.workers = workers;
    }
    if let Some(job_buffer) = cli.queue_buffer {
        config.queue.job_buffer = job_buffer;
    }
    config.queue.validate()?;

    match cli.command {
        Command::Fetch(args) => cmd_fetch(config, cli.quiet, args).await,
        Command::Config => cmd_config(&config),
    }
}

async fn cmd_fetch(config: Config, quiet: bool, args: FetchArgs) -> anyhow::Result<()> {
    let _telemetry = init_telemetry(&config, quiet)?;

    let controller = CancellationController::new();
    let signals = controller.listen_for_signals();

    let dispatcher = Arc::new(Dispatcher::start(&config.queue, &controller));
    let paginator = Paginator::new(Arc::clone(&dispatcher), controller.clone());

    let sources = build_sources(&args);

    let started = Instant::now();
    let result = paginator.fetch_each(sources).await;
    let elapsed = started.elapsed();

    dispatcher.abort();
    dispatcher.join().await?;
    signals.abort();

    let mut agg = result?;

    if args.show_items {
        agg.items.sort_by_key(|record| record.id);
        println!("{:<10}  {:<12}  PAGE", "ID", "SOURCE");
        println!("{}", "-".repeat(32));
        for record in &agg.items {
            println!("{:<10}  {:<12}  {}", record.id, record.source, record.page);
        }
        println!();
    }

    println!("Items:      {}", agg.items.len());
    println!("Pages:      {}", agg.pages_fetched);
    println!("Failed:     {}", agg.pages_failed);
    println!("Workers:    {}", config.queue.workers);
    println!("Elapsed:    {}ms", elapsed.as_millis());
    if agg.cancelled {
        println!("Cancelled:  yes (partial result)");
    }

    Ok(())
}

/// One synthetic source per `--sources`, with disjoint record id ranges.
fn build_sources(args: &FetchArgs) -> Vec<Arc<SyntheticSource>> {
    (0..args.sources.max(1))
        .map(|i| {
            let mut source = SyntheticSource::new(format!("source-{i}"), args.pages, args.per_page)
                .latency(Duration::from_millis(args.latency_ms));
            let base = 1 + i as u64 * source.total_records() as u64;
            source = source.first_id(base);
            for page in &args.fail_pages {
                source = source.fail_page(*page);
            }
            if args.hide_total {
                source = source.hide_total();
            }
            Arc::new(source)
        })
        .collect()
}

fn cmd_config(config: &Config) -> anyhow::Result<()> {
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}
