use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::attribute::JobAttr;
use crate::refresh::agent::{AgentError, StatusAgent};
use crate::refresh::{RefreshOutcome, RefreshRequest};
use crate::scheduler::{JobId, JobTable};

/// Serves queued refresh requests until shutdown or until every gate is
/// dropped.
pub struct RefreshWorker {
    table: Arc<JobTable>,
    agent: Arc<dyn StatusAgent>,
    rx: mpsc::Receiver<RefreshRequest>,
}

impl RefreshWorker {
    pub fn new(
        table: Arc<JobTable>,
        agent: Arc<dyn StatusAgent>,
        rx: mpsc::Receiver<RefreshRequest>,
    ) -> Self {
        Self { table, agent, rx }
    }

    /// Run until `shutdown` fires or the request channel closes. Each request
    /// is served on its own task so one slow host does not hold up the rest.
    pub async fn run(mut self, shutdown: CancellationToken) {
        tracing::info!("Refresh worker started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Refresh worker shutting down");
                    break;
                }
                request = self.rx.recv() => {
                    let Some(request) = request else {
                        tracing::debug!("Refresh channel closed");
                        break;
                    };
                    let table = self.table.clone();
                    let agent = self.agent.clone();
                    tokio::spawn(async move {
                        let outcome = refresh_job(&table, agent.as_ref(), &request.job_id).await;
                        // The query may have gone away; nobody left to tell.
                        let _ = request.reply.send(outcome);
                    });
                }
            }
        }
    }
}

/// Fetch a job's live status and write it back. The job lock is taken twice,
/// once to read the execution host and once to apply the report, and is
/// never held while the agent is awaited.
pub async fn refresh_job(
    table: &JobTable,
    agent: &dyn StatusAgent,
    job_id: &JobId,
) -> RefreshOutcome {
    let looked_up = table.with_job(job_id, |job| {
        job.attr(JobAttr::ExecHost)
            .and_then(|v| v.as_str().map(str::to_string))
    });
    let Some(exec_host) = looked_up else {
        tracing::debug!(job_id = %job_id, "Job gone before refresh");
        return RefreshOutcome::Failed(format!("job {} not found", job_id));
    };

    let Some(exec_host) = exec_host else {
        let e = AgentError::NoExecHost(job_id.to_string());
        tracing::warn!(job_id = %job_id, error = %e, "Status refresh failed");
        return RefreshOutcome::Failed(e.to_string());
    };

    let report = match agent.fetch_status(job_id, &exec_host).await {
        Ok(report) => report,
        Err(e) => {
            tracing::warn!(job_id = %job_id, error = %e, "Status refresh failed");
            return RefreshOutcome::Failed(e.to_string());
        }
    };

    let applied = table.with_job_mut(job_id, |job| {
        report.apply(job, Utc::now());
        job.state
    });
    match applied {
        Some(state) => {
            tracing::debug!(job_id = %job_id, state = %state, "Status refreshed");
            RefreshOutcome::Refreshed
        }
        None => {
            tracing::debug!(job_id = %job_id, "Job gone before refresh applied");
            RefreshOutcome::Failed(format!("job {} not found", job_id))
        }
    }
}
