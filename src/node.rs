use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::api::{run_api, ApiState};
use crate::config::ServerConfig;
use crate::error::Result;
use crate::refresh::{self, CachedStatusGate, LoopbackAgent, RefreshWorker, RemoteStatusGate, StatusAgent};
use crate::scheduler::JobTable;
use crate::select::SelectEngine;

/// A batch server: job table, select engine, refresh worker and API.
pub struct Node {
    pub config: ServerConfig,
    pub table: Arc<JobTable>,
    pub engine: Arc<SelectEngine>,
    refresh_worker: Option<RefreshWorker>,
}

impl Node {
    /// Build a node around `table` with the loopback status agent.
    pub fn new(config: ServerConfig, table: Arc<JobTable>) -> Self {
        Self::with_agent(config, table, Arc::new(LoopbackAgent))
    }

    /// Build a node whose stale-status refreshes go to `agent`.
    ///
    /// With `poll_jobs` set no refresh worker is started and every cached
    /// status is taken as current.
    pub fn with_agent(config: ServerConfig, table: Arc<JobTable>, agent: Arc<dyn StatusAgent>) -> Self {
        let (gate, refresh_worker): (Arc<dyn RemoteStatusGate>, _) = if config.poll_jobs {
            (Arc::new(CachedStatusGate), None)
        } else {
            let (gate, rx) = refresh::channel(config.refresh_queue_depth);
            let worker = RefreshWorker::new(table.clone(), agent, rx);
            (Arc::new(gate), Some(worker))
        };
        let engine = Arc::new(SelectEngine::new(table.clone(), gate, config.clone()));

        Self {
            config,
            table,
            engine,
            refresh_worker,
        }
    }

    /// Run the node until `shutdown` fires.
    ///
    /// 1. Spawns the refresh worker (unless the server polls on its own)
    /// 2. Runs the API server (blocking) with graceful shutdown
    ///
    /// # Errors
    ///
    /// Returns an error if the API server cannot bind or fails while serving.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        tracing::info!(
            server = %self.config.server_name,
            addr = %self.config.listen_addr,
            jobs = self.table.len(),
            job_stat_rate_secs = self.config.job_stat_rate.as_secs(),
            poll_jobs = self.config.poll_jobs,
            "Starting batch server"
        );

        let worker_handle = self.refresh_worker.map(|worker| {
            let token = shutdown.clone();
            tokio::spawn(async move { worker.run(token).await })
        });

        let state = ApiState {
            engine: self.engine.clone(),
        };
        let result = run_api(self.config.listen_addr, state, shutdown.clone()).await;

        // Bind failures return before shutdown was requested; stop the worker too.
        shutdown.cancel();
        if let Some(handle) = worker_handle {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Refresh worker task failed");
            }
        }
        result
    }
}
