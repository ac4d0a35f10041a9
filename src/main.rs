use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::{Parser, ValueEnum};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use baton::config::{default_node_id, CoordinatorConfig};
use baton::lock::{LockProvider, MemoryLockProvider, RedisLockProvider};
use baton::node::Coordinator;
use baton::scheduler::evaluator;
use baton::scheduler::schedule::{CronSchedule, IntervalSchedule};
use baton::shutdown::install_shutdown_handler;
use baton::store::{CronScheduleStore, IntervalScheduleStore, MemoryStore, Stores};
use baton::transport::{MemoryBus, Transport};

#[derive(Parser, Debug)]
#[command(name = "baton")]
#[command(version)]
#[command(about = "A clustered job coordinator with lease-based leader election")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start a single-process coordinator on in-process stores and transport
    ///
    /// Jobs, schedules and messages live in this process only, so separate
    /// `server` processes never share work. Use `local-cluster` to run
    /// cooperating nodes.
    Server(ServerArgs),

    /// Run several coordinators in one process on shared in-memory backends
    LocalCluster(LocalClusterArgs),

    /// Cron expression tools
    Cron {
        #[command(subcommand)]
        command: CronCommands,
    },
}

// =============================================================================
// Server Arguments
// =============================================================================

#[derive(Parser, Debug, Clone)]
struct TimingArgs {
    /// Heartbeat interval in milliseconds; lease, renew and dead timeouts derive from it
    #[arg(long, env = "BATON_HEARTBEAT_INTERVAL_MS", default_value = "10000")]
    heartbeat_interval_ms: u64,

    /// Schedule scan interval in milliseconds
    #[arg(long, env = "BATON_SCHEDULE_SCAN_INTERVAL_MS", default_value = "10000")]
    schedule_scan_interval_ms: u64,

    /// Job queue scan interval in milliseconds
    #[arg(long, env = "BATON_JOB_QUEUE_SCAN_INTERVAL_MS", default_value = "5000")]
    job_queue_scan_interval_ms: u64,

    /// Maximum jobs dispatched per queue scan
    #[arg(long, env = "BATON_BATCH_SIZE", default_value = "100")]
    batch_size: usize,

    /// Prefix for every pub/sub channel name
    #[arg(long, env = "BATON_CHANNEL_PREFIX", default_value = "baton")]
    channel_prefix: String,

    /// Prefix for cache keys
    #[arg(long, env = "BATON_CACHE_PREFIX", default_value = "baton")]
    cache_prefix: String,
}

impl TimingArgs {
    fn apply(&self, config: CoordinatorConfig) -> CoordinatorConfig {
        let mut config = config
            .with_heartbeat_interval(Duration::from_millis(self.heartbeat_interval_ms))
            .with_scan_intervals(
                Duration::from_millis(self.schedule_scan_interval_ms),
                Duration::from_millis(self.job_queue_scan_interval_ms),
            )
            .with_batch_size(self.batch_size)
            .with_channel_prefix(self.channel_prefix.clone());
        config.cache_prefix = self.cache_prefix.clone();
        config
    }
}

#[derive(Parser, Debug)]
struct ServerArgs {
    /// Node ID (defaults to the hostname)
    #[arg(long, env = "BATON_NODE_ID")]
    node_id: Option<String>,

    /// Redis URL for the leader lease; a second `server` on the same lease
    /// stays on standby instead of leading over its own private stores
    /// (in-memory lease when omitted)
    #[arg(long, env = "BATON_REDIS_URL")]
    redis_url: Option<String>,

    /// Port for the status API (optional)
    #[arg(long, env = "BATON_DASHBOARD_PORT")]
    dashboard_port: Option<u16>,

    #[command(flatten)]
    timing: TimingArgs,
}

#[derive(Parser, Debug)]
struct LocalClusterArgs {
    /// Number of coordinators to start
    #[arg(long, default_value = "3")]
    nodes: usize,

    /// First status API port; node N listens on this port + N - 1
    #[arg(long)]
    dashboard_port: Option<u16>,

    /// Seed a cron schedule with this expression
    #[arg(long)]
    cron: Option<String>,

    /// Seed an interval schedule firing every this many seconds
    #[arg(long)]
    every_secs: Option<u64>,

    #[command(flatten)]
    timing: TimingArgs,
}

// =============================================================================
// Cron Commands
// =============================================================================

#[derive(clap::Subcommand, Debug)]
enum CronCommands {
    /// Print the next occurrences of a cron expression
    Next {
        /// Cron expression (5, 6 or 7 fields, or a macro such as @daily)
        expression: String,

        /// IANA timezone the expression is evaluated in
        #[arg(long, default_value = "UTC")]
        tz: String,

        /// Number of occurrences to print
        #[arg(long, short = 'n', default_value = "5")]
        count: usize,

        /// Output format
        #[arg(long, short = 'o', default_value = "table")]
        output: OutputFormat,
    },
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

// =============================================================================
// Server Implementation
// =============================================================================

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

fn dashboard_addr(port: u16) -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], port))
}

async fn run_server(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    let mut config = args
        .timing
        .apply(CoordinatorConfig::new(args.node_id.unwrap_or_else(default_node_id)));
    if let Some(port) = args.dashboard_port {
        config = config.with_dashboard(dashboard_addr(port));
    }

    let lock_provider: Arc<dyn LockProvider> = match &args.redis_url {
        Some(url) => {
            let provider = RedisLockProvider::connect(url, &config.cache_prefix).await?;
            tracing::info!(url = %url, "Using Redis leader lease");
            tracing::warn!("Stores and transport are local to this process; peers on the same lease only act as standbys");
            Arc::new(provider)
        }
        None => {
            tracing::warn!("No Redis URL given, leader lease is local to this process");
            Arc::new(MemoryLockProvider::new())
        }
    };
    let transport: Arc<dyn Transport> = Arc::new(MemoryBus::new().connect());

    tracing::info!(
        node_id = %config.node_id,
        heartbeat_ms = config.heartbeat_interval_ms,
        lease_ms = config.leader_lease_duration_ms,
        "Starting coordinator"
    );

    let coordinator = Arc::new(Coordinator::new(
        config,
        Stores::in_memory(),
        lock_provider,
        transport,
    )?);
    let shutdown = install_shutdown_handler()?;
    coordinator.run(shutdown).await;
    Ok(())
}

async fn run_local_cluster(args: LocalClusterArgs) -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    if args.nodes == 0 {
        return Err("--nodes must be at least 1".into());
    }

    let store = MemoryStore::new();
    let bus = MemoryBus::new();
    let locks = MemoryLockProvider::new();
    let stores = Stores::from_memory(store);

    if let Some(expression) = &args.cron {
        evaluator::parse_cron(expression)?;
        let next = evaluator::next_occurrence(expression, Utc::now(), "UTC");
        let mut schedule = CronSchedule::new("local-cron", expression.clone(), "demo", "default");
        schedule.next_run_time = next;
        stores.cron_schedules.add(schedule).await?;
        tracing::info!(expression = %expression, next_run = ?next, "Seeded cron schedule");
    }
    if let Some(secs) = args.every_secs {
        let schedule =
            IntervalSchedule::new("local-interval", Duration::from_secs(secs), "demo", "default")
                .with_next_run(Utc::now());
        stores.interval_schedules.add(schedule).await?;
        tracing::info!(every_secs = secs, "Seeded interval schedule");
    }

    let shutdown = install_shutdown_handler()?;
    let mut handles = Vec::with_capacity(args.nodes);
    for index in 0..args.nodes {
        let mut config = args
            .timing
            .apply(CoordinatorConfig::new(format!("node-{}", index + 1)));
        if let Some(base) = args.dashboard_port {
            let port = base.checked_add(index as u16).ok_or("dashboard port out of range")?;
            config = config.with_dashboard(dashboard_addr(port));
        }

        let coordinator = Arc::new(Coordinator::new(
            config,
            stores.clone(),
            Arc::new(locks.clone()),
            Arc::new(bus.connect()),
        )?);
        handles.push(tokio::spawn(coordinator.run(shutdown.clone())));
    }

    tracing::info!(nodes = args.nodes, "Local cluster running, press Ctrl-C to stop");
    for handle in handles {
        handle.await?;
    }
    Ok(())
}

// =============================================================================
// Cron Implementation
// =============================================================================

#[derive(Serialize)]
struct CronNextOutput {
    expression: String,
    timezone: String,
    occurrences: Vec<String>,
}

fn handle_cron_next(
    expression: String,
    tz: String,
    count: usize,
    output: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    evaluator::parse_cron(&expression)?;
    let zone = evaluator::resolve_timezone(&tz);
    let occurrences = evaluator::next_occurrences(&expression, Utc::now(), &tz, count);

    match output {
        OutputFormat::Json => {
            let output = CronNextOutput {
                expression,
                timezone: zone.to_string(),
                occurrences: occurrences.iter().map(|at| at.to_rfc3339()).collect(),
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            if occurrences.is_empty() {
                println!("No upcoming occurrences.");
                return Ok(());
            }
            println!("{:<4} {:<28} {}", "#", "UTC", zone);
            println!("{}", "-".repeat(64));
            for (i, at) in occurrences.iter().enumerate() {
                println!(
                    "{:<4} {:<28} {}",
                    i + 1,
                    at.to_rfc3339(),
                    at.with_timezone(&zone).format("%Y-%m-%d %H:%M:%S %Z")
                );
            }
        }
    }
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Server(server_args) => {
            run_server(server_args).await?;
        }
        Commands::LocalCluster(cluster_args) => {
            run_local_cluster(cluster_args).await?;
        }
        Commands::Cron { command } => match command {
            CronCommands::Next {
                expression,
                tz,
                count,
                output,
            } => {
                handle_cron_next(expression, tz, count, &output)?;
            }
        },
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Args::command().debug_assert();
    }

    #[test]
    fn server_help_states_single_process_scope() {
        let command = Args::command();
        let server = command
            .find_subcommand("server")
            .expect("server subcommand");
        let about = server.get_about().map(|a| a.to_string()).unwrap_or_default();
        assert!(about.contains("single-process"));
        let long_about = server
            .get_long_about()
            .map(|a| a.to_string())
            .unwrap_or_default();
        assert!(long_about.contains("local-cluster"));
    }

    #[test]
    fn server_accepts_redis_lease_and_timing_flags() {
        let args = Args::try_parse_from([
            "baton",
            "server",
            "--node-id",
            "node-a",
            "--redis-url",
            "redis://127.0.0.1/",
            "--heartbeat-interval-ms",
            "500",
        ])
        .unwrap();
        match args.command {
            Commands::Server(server) => {
                assert_eq!(server.node_id.as_deref(), Some("node-a"));
                assert_eq!(server.redis_url.as_deref(), Some("redis://127.0.0.1/"));
                let config = server.timing.apply(CoordinatorConfig::new("node-a"));
                assert_eq!(config.leader_lease_duration_ms, 1_500);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
