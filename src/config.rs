use std::net::SocketAddr;
use std::time::Duration;

/// Default maximum age of a running job's cached status before a select-status
/// query asks the execution host for a fresh one.
pub const DEFAULT_JOB_STAT_RATE: Duration = Duration::from_secs(30);

/// Server-wide settings consulted by the select engine and the node.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Name of this server. Used as the job-id suffix and for `@server` destinations.
    pub server_name: String,
    pub listen_addr: SocketAddr,
    /// Staleness threshold for running jobs' cached status.
    pub job_stat_rate: Duration,
    /// Server polls execution hosts on its own; select-status skips the refresh pass.
    pub poll_jobs: bool,
    /// Any requester may view any job.
    pub query_others: bool,
    /// Capacity of the refresh request channel. A full channel counts as
    /// resource exhaustion.
    pub refresh_queue_depth: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_name: "localhost".to_string(),
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 15001)),
            job_stat_rate: DEFAULT_JOB_STAT_RATE,
            poll_jobs: false,
            query_others: false,
            refresh_queue_depth: 1024,
        }
    }
}

impl ServerConfig {
    pub fn new(server_name: impl Into<String>, listen_addr: SocketAddr) -> Self {
        Self {
            server_name: server_name.into(),
            listen_addr,
            ..Default::default()
        }
    }

    pub fn with_job_stat_rate(mut self, rate: Duration) -> Self {
        self.job_stat_rate = rate;
        self
    }

    pub fn with_poll_jobs(mut self, poll_jobs: bool) -> Self {
        self.poll_jobs = poll_jobs;
        self
    }

    pub fn with_query_others(mut self, query_others: bool) -> Self {
        self.query_others = query_others;
        self
    }

    pub fn with_refresh_queue_depth(mut self, depth: usize) -> Self {
        self.refresh_queue_depth = depth.max(1);
        self
    }
}
