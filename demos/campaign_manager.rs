//! Writer side: maintains campaign budgets in the shared segment.
//!
//! cargo run --example campaign_manager -- seed --count 100
//! cargo run --example campaign_manager -- update 42 --spent 500000
//! cargo run --example campaign_manager -- list

use clap::{Args, Parser, Subcommand};
use rtb_datacache::Metrics::TracingSink;
use rtb_datacache::{AttachMode, CacheConfig, CampaignBudget, CampaignCache};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "campaign_manager")]
#[command(about = "Maintain campaign budgets in shared memory", long_about = None)]
struct Cli {
    /// Segment name under /dev/shm
    #[arg(global = true, long, env = "RTB_CACHE_IPC_NAME", default_value = "rtb_datacache")]
    name: String,

    /// Segment capacity in bytes
    #[arg(global = true, long, env = "RTB_CACHE_CAPACITY", default_value_t = 64 * 1024 * 1024)]
    capacity: usize,

    /// Log every cache call
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct BudgetArgs {
    /// Daily budget limit in micro-currency units
    #[arg(long, default_value_t = 1_000_000)]
    limit: u64,

    /// Spend so far today in micro-currency units
    #[arg(long, default_value_t = 0)]
    spent: u64,

    /// Daily impression cap
    #[arg(long, default_value_t = 10_000)]
    shows: u32,

    /// Daily click cap
    #[arg(long, default_value_t = 500)]
    clicks: u32,
}

impl BudgetArgs {
    fn budget(&self, campaign_id: u32) -> CampaignBudget {
        CampaignBudget {
            campaign_id,
            day_budget_limit: self.limit,
            day_budget_spent: self.spent,
            day_show_limit: self.shows,
            day_click_limit: self.clicks,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Add a campaign
    Insert {
        id: u32,
        #[command(flatten)]
        budget: BudgetArgs,
    },
    /// Replace a campaign's budget
    Update {
        id: u32,
        #[command(flatten)]
        budget: BudgetArgs,
    },
    /// Move a campaign to a new id, replacing its budget
    Rekey {
        old_id: u32,
        new_id: u32,
        #[command(flatten)]
        budget: BudgetArgs,
    },
    /// Drop a campaign
    Remove { id: u32 },
    /// Print every campaign
    List,
    /// Insert campaigns 1..=count with default budgets
    Seed {
        #[arg(long, default_value_t = 100)]
        count: u32,
    },
    /// Check index and record consistency
    Verify,
    /// Unlink the segment
    Destroy,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Commands::Destroy = cli.command {
        let removed = rtb_datacache::Core::Segment::destroy(&cli.name)?;
        println!("{}: {}", cli.name, if removed { "destroyed" } else { "not found" });
        return Ok(());
    }

    let config = CacheConfig::new()
        .ipc_name(&cli.name)
        .capacity(cli.capacity)
        .attach_mode(AttachMode::OpenOrCreate);
    let mut cache = CampaignCache::new(&config)?;
    if cli.verbose {
        cache = cache.with_sink(Arc::new(TracingSink));
    }

    match cli.command {
        Commands::Insert { id, budget } => {
            report("insert", id, cache.insert(&budget.budget(id), id)?);
        }
        Commands::Update { id, budget } => {
            report("update", id, cache.update(&budget.budget(id), id)?);
        }
        Commands::Rekey {
            old_id,
            new_id,
            budget,
        } => {
            let ok = cache.update_id(&budget.budget(new_id), old_id, new_id)?;
            report("rekey", old_id, ok);
        }
        Commands::Remove { id } => {
            report("remove", id, cache.remove(id)?);
        }
        Commands::List => {
            let mut budgets = cache.retrieve_all()?;
            budgets.sort_by_key(|b| b.campaign_id);
            println!("{:<10} {}", "Campaign", "id|limit|spent|show|click");
            println!("{}", "=".repeat(60));
            for budget in &budgets {
                println!("{:<10} {}", budget.campaign_id, budget);
            }
            println!("{} campaigns", budgets.len());
        }
        Commands::Seed { count } => {
            let defaults = BudgetArgs {
                limit: 1_000_000,
                spent: 0,
                shows: 10_000,
                clicks: 500,
            };
            let mut inserted = 0;
            for id in 1..=count {
                if cache.insert(&defaults.budget(id), id)? {
                    inserted += 1;
                }
            }
            println!("seeded {inserted} of {count} campaigns");
        }
        Commands::Verify => {
            cache.cache().verify()?;
            println!("{} campaigns, indexes consistent", cache.len()?);
        }
        Commands::Destroy => {}
    }
    Ok(())
}

fn report(operation: &str, id: u32, ok: bool) {
    if ok {
        println!("{operation} {id}: ok");
    } else {
        println!("{operation} {id}: rejected (key taken or missing)");
    }
}
