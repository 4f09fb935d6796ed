mod daemon;
mod handlers;

use clap::{Parser, Subcommand};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use leasehold_core::config::Config;
use leasehold_core::error::CoordResult;

use crate::handlers::*;

#[derive(Parser)]
#[command(
    name = "leasehold",
    about = "Leasehold: worker coordination over a shared store",
    version
)]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true, env = "LEASEHOLD_CONFIG")]
    config: Option<String>,

    /// SQLite database shared by all workers. In-memory when omitted.
    #[arg(long, global = true, env = "LEASEHOLD_DB")]
    db: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Periodically evict stale workers and expired locks
    Reaper {
        /// Run a single pass and exit
        #[arg(long)]
        once: bool,
    },

    /// Register a worker and heartbeat until interrupted
    Worker {
        #[arg(long, env = "LEASEHOLD_WORKER_ID")]
        worker_id: String,

        #[arg(long)]
        campaign: String,

        #[arg(long, default_value = "generic")]
        worker_type: String,
    },

    /// List live workers of a campaign
    Workers {
        #[arg(long)]
        campaign: String,
    },

    /// List live leases
    Locks,

    /// Acquire (or renew) a lease
    Acquire {
        #[arg(long)]
        holder: String,

        #[arg(long)]
        resource_type: String,

        #[arg(long)]
        resource_id: String,

        /// EXCLUSIVE or SHARED
        #[arg(long, default_value = "EXCLUSIVE")]
        mode: String,

        /// Time-to-live in milliseconds
        #[arg(long, default_value = "30000")]
        ttl: u64,
    },

    /// Release a lease
    Release {
        #[arg(long)]
        holder: String,

        #[arg(long)]
        resource_type: String,

        #[arg(long)]
        resource_id: String,

        #[arg(long, default_value = "EXCLUSIVE")]
        mode: String,
    },

    /// Print worker and lease counts
    Stats,

    /// Print version information
    Version,
}

fn load_config(path: Option<&str>) -> CoordResult<Config> {
    match path {
        Some(path) => Config::load(path),
        None => Ok(Config::default()),
    }
}

async fn run(cli: Cli) -> CoordResult<()> {
    let config = load_config(cli.config.as_deref())?;
    let db = cli.db.as_deref();

    match cli.command {
        Commands::Reaper { once } => {
            let coordinator = daemon::open_coordinator(db, CLI_IDENTITY, config)?;
            daemon::run_reaper(&coordinator, once).await
        }
        Commands::Worker {
            worker_id,
            campaign,
            worker_type,
        } => {
            require("worker_id", &worker_id)?;
            require("campaign", &campaign)?;
            let coordinator = daemon::open_coordinator(db, &worker_id, config)?;
            daemon::run_worker(&coordinator, &campaign, &worker_type).await
        }
        Commands::Workers { campaign } => {
            let coordinator = daemon::open_coordinator(db, CLI_IDENTITY, config)?;
            let workers: Vec<WorkerInfo> = coordinator
                .registry()
                .get_active_workers(&campaign)?
                .into_iter()
                .map(WorkerInfo::from)
                .collect();
            print_json(&workers)
        }
        Commands::Locks => {
            let coordinator = daemon::open_coordinator(db, CLI_IDENTITY, config)?;
            let leases: Vec<ActiveLeaseInfo> = coordinator
                .locks()
                .active_leases()?
                .into_iter()
                .map(ActiveLeaseInfo::from)
                .collect();
            print_json(&leases)
        }
        Commands::Acquire {
            holder,
            resource_type,
            resource_id,
            mode,
            ttl,
        } => {
            let request = AcquireLeaseRequest {
                holder,
                resource_type,
                resource_id,
                mode,
                ttl,
            };
            let mode = request.validate()?;
            let coordinator = daemon::open_coordinator(db, &request.holder, config)?;
            let lease_id = coordinator.locks().acquire_resource_lock(
                &request.resource_type,
                &request.resource_id,
                mode,
                std::time::Duration::from_millis(request.ttl),
            )?;
            print_json(&LeaseResponse {
                lease_id,
                holder: request.holder,
                resource: format!("{}:{}", request.resource_type, request.resource_id),
                mode: mode.to_string(),
            })
        }
        Commands::Release {
            holder,
            resource_type,
            resource_id,
            mode,
        } => {
            require("holder", &holder)?;
            let mode = parse_mode(&mode)?;
            let coordinator = daemon::open_coordinator(db, &holder, config)?;
            coordinator
                .locks()
                .release_resource_lock(&resource_type, &resource_id, mode)?;
            print_json(&ReleaseResponse { released: true })
        }
        Commands::Stats => {
            let coordinator = daemon::open_coordinator(db, CLI_IDENTITY, config)?;
            let workers = coordinator.registry().worker_stats()?;
            let active_leases = coordinator.locks().active_leases()?.len();
            print_json(&StatsResponse {
                workers,
                active_leases,
                version: env!("CARGO_PKG_VERSION").to_string(),
            })
        }
        Commands::Version => {
            println!("leasehold {}", env!("CARGO_PKG_VERSION"));
            println!("Lease-based coordination for campaign workers");
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
