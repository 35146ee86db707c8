use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use batch_lite::config::ServerConfig;
use batch_lite::node::Node;
use batch_lite::refresh::{self, LoopbackAgent, RefreshWorker};
use batch_lite::scheduler::seed::load_table;
use batch_lite::scheduler::JobTable;
use batch_lite::select::{Criterion, QueryKind, Reply, Requester, Role, SelectEngine, SelectRequest};

#[derive(Parser, Debug)]
#[command(name = "batch-lite")]
#[command(version)]
#[command(about = "Job selection and status queries for a batch server")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start a batch server answering select requests over HTTP
    Server(ServerArgs),

    /// Run one select request against a seed file and print the reply
    Select(SelectArgs),
}

// =============================================================================
// Server Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ServerArgs {
    /// Server name, used as the job-id suffix
    #[arg(long, default_value = "localhost")]
    server_name: String,

    /// Port to listen on for the HTTP API
    #[arg(long, default_value = "15001")]
    port: u16,

    /// Seconds before a running job's cached status counts as stale
    #[arg(long, default_value = "30")]
    job_stat_rate: u64,

    /// The server polls execution hosts itself; never refresh on query
    #[arg(long)]
    poll_jobs: bool,

    /// Let any user see every job
    #[arg(long)]
    query_others: bool,

    /// Capacity of the refresh request queue
    #[arg(long, default_value = "1024")]
    refresh_queue_depth: usize,

    /// JSON file with queues and jobs to load at startup
    #[arg(long)]
    seed: Option<PathBuf>,
}

// =============================================================================
// Select Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct SelectArgs {
    /// JSON file with queues and jobs
    #[arg(long)]
    seed: PathBuf,

    /// Server name, used as the job-id suffix
    #[arg(long, default_value = "localhost")]
    server_name: String,

    /// Criterion, `name[.resource].op.value` or `queue=<dest>` (repeatable)
    /// Example: -c job_state.eq.R -c Resource_List.walltime.ge.01:00:00
    #[arg(long = "criterion", short = 'c')]
    criteria: Vec<Criterion>,

    /// Return full status records instead of job ids
    #[arg(long)]
    status: bool,

    /// Only report jobs in execution queues
    #[arg(long)]
    exec_queue_only: bool,

    /// Collapse job arrays to one entry each
    #[arg(long)]
    summarize_arrays: bool,

    /// Requesting user
    #[arg(long, short = 'u', default_value = "root")]
    user: String,

    /// Requesting host
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Requester privilege: user, operator or manager
    #[arg(long, default_value = "user")]
    role: Role,

    /// Let any user see every job
    #[arg(long)]
    query_others: bool,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

// =============================================================================
// Helper Functions
// =============================================================================

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn open_table(seed: Option<&Path>, server_name: &str) -> Result<JobTable, Box<dyn std::error::Error>> {
    match seed {
        Some(path) => {
            let table = load_table(path, server_name)?;
            tracing::info!(path = %path.display(), jobs = table.len(), "Loaded seed");
            Ok(table)
        }
        None => Ok(JobTable::new(server_name)),
    }
}

fn print_reply(reply: &Reply) {
    match reply {
        Reply::SelectedIds(ids) => {
            if ids.is_empty() {
                println!("No jobs selected.");
            }
            for id in ids {
                println!("{}", id);
            }
        }
        Reply::StatusRecords(records) => {
            if records.is_empty() {
                println!("No jobs selected.");
                return;
            }
            println!("{:<24} {:<6} {:<16} {:<16} NAME", "JOB ID", "STATE", "QUEUE", "OWNER");
            println!("{}", "-".repeat(78));
            for record in records {
                println!(
                    "{:<24} {:<6} {:<16} {:<16} {}",
                    record.job_id,
                    record.value("job_state").unwrap_or("-"),
                    record.value("queue").unwrap_or("-"),
                    record.value("Job_Owner").unwrap_or("-"),
                    record.value("Job_Name").unwrap_or("-"),
                );
            }
            println!();
            println!("{} job(s)", records.len());
        }
    }
}

// =============================================================================
// Command Handlers
// =============================================================================

async fn run_server(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    let listen_addr: SocketAddr = format!("0.0.0.0:{}", args.port).parse()?;
    let config = ServerConfig::new(args.server_name, listen_addr)
        .with_job_stat_rate(Duration::from_secs(args.job_stat_rate))
        .with_poll_jobs(args.poll_jobs)
        .with_query_others(args.query_others)
        .with_refresh_queue_depth(args.refresh_queue_depth);

    let table = Arc::new(open_table(args.seed.as_deref(), &config.server_name)?);
    let node = Node::new(config, table);

    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Received interrupt, shutting down"),
            Err(e) => tracing::error!(error = %e, "Failed to listen for interrupt"),
        }
        token.cancel();
    });

    node.run(shutdown).await?;
    Ok(())
}

async fn run_select(args: SelectArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = ServerConfig::default()
        .with_query_others(args.query_others);
    let table = Arc::new(open_table(Some(&args.seed), &args.server_name)?);

    let (gate, rx) = refresh::channel(config.refresh_queue_depth);
    let worker = RefreshWorker::new(table.clone(), Arc::new(LoopbackAgent), rx);
    let shutdown = CancellationToken::new();
    let worker_handle = tokio::spawn(worker.run(shutdown.clone()));

    let engine = SelectEngine::new(table, Arc::new(gate), config);
    let kind = if args.status {
        QueryKind::SelectStatus
    } else {
        QueryKind::Select
    };
    let mut request = SelectRequest::new(
        Requester::new(args.user, args.host, args.role.permission()),
        kind,
        args.criteria,
    );
    request.exec_queue_only = args.exec_queue_only;
    request.summarize_arrays = args.summarize_arrays;

    let result = engine.handle_select(&request).await;
    shutdown.cancel();
    worker_handle.await?;

    let reply = match result {
        Ok(reply) => reply,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    match args.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&reply)?),
        OutputFormat::Table => print_reply(&reply),
    }
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging();

    match args.command {
        Commands::Server(server_args) => run_server(server_args).await?,
        Commands::Select(select_args) => run_select(select_args).await?,
    }

    Ok(())
}
