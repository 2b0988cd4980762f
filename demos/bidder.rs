//! Reader side: polls campaign budgets the way a bidder would on each
//! request, until Ctrl+C.
//!
//! cargo run --example bidder -- --campaigns 1,2,42

use clap::Parser;
use rtb_datacache::Metrics::MetricsSink;
use rtb_datacache::{AttachMode, CacheConfig, CampaignCache};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bidder")]
#[command(about = "Read campaign budgets from shared memory", long_about = None)]
struct Cli {
    /// Segment name under /dev/shm
    #[arg(long, env = "RTB_CACHE_IPC_NAME", default_value = "rtb_datacache")]
    name: String,

    /// Segment capacity in bytes; must match the campaign manager's
    #[arg(long, env = "RTB_CACHE_CAPACITY", default_value_t = 64 * 1024 * 1024)]
    capacity: usize,

    /// Campaign ids to look up; all campaigns if empty
    #[arg(long, value_delimiter = ',')]
    campaigns: Vec<u32>,

    /// Milliseconds between passes
    #[arg(long, default_value_t = 1000)]
    interval_ms: u64,

    /// Print prometheus metrics on exit
    #[arg(long)]
    metrics: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // A bidder that cannot see budgets must not start bidding.
    let config = CacheConfig::new()
        .ipc_name(&cli.name)
        .capacity(cli.capacity)
        .attach_mode(AttachMode::Open);
    let mut cache = CampaignCache::new(&config)?;
    if let Some(metrics) = MetricsSink::global() {
        cache = cache.with_sink(Arc::new(metrics.clone()));
    }

    let running = Arc::new(AtomicBool::new(true));
    let running_for_handler = Arc::clone(&running);
    ctrlc::set_handler(move || {
        running_for_handler.store(false, Ordering::SeqCst);
    })?;

    println!("Bidder: attached {} ({} campaigns)", cli.name, cache.len()?);
    let mut passes = 0u64;
    while running.load(Ordering::SeqCst) {
        let start = Instant::now();
        let budgets = if cli.campaigns.is_empty() {
            cache.retrieve_all()?
        } else {
            let mut found = Vec::with_capacity(cli.campaigns.len());
            for &id in &cli.campaigns {
                let hit = cache.retrieve(id)?;
                if hit.is_empty() {
                    println!("campaign {id}: no budget, not bidding");
                }
                found.extend(hit);
            }
            found
        };
        let elapsed = start.elapsed();

        for budget in &budgets {
            let remaining = budget.day_budget_limit.saturating_sub(budget.day_budget_spent);
            println!("{budget}  remaining={remaining}");
        }
        println!("--- pass {passes}: {} budgets in {:.2?} ---", budgets.len(), elapsed);
        passes += 1;

        std::thread::sleep(Duration::from_millis(cli.interval_ms));
    }

    if cli.metrics {
        if let Some(metrics) = MetricsSink::global() {
            println!("{}", metrics.gather_text()?);
        }
    }
    println!("Bidder: stopped after {passes} passes");
    Ok(())
}
