use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::attribute::{AttrValue, JobAttr};
use crate::scheduler::{Job, JobId, JobState};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AgentError {
    #[error("Execution host {0} unreachable")]
    Unreachable(String),

    #[error("Job {0} has no execution host")]
    NoExecHost(String),
}

/// Live status of one job as reported by its execution host.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentReport {
    pub state: Option<JobState>,
    pub substate: Option<u32>,
    pub updates: Vec<(JobAttr, AttrValue)>,
}

impl AgentReport {
    pub fn with_state(mut self, state: JobState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_update(mut self, attr: JobAttr, value: AttrValue) -> Self {
        self.updates.push((attr, value));
        self
    }

    /// Write the report into `job` and mark its status fresh as of `now`.
    pub fn apply(self, job: &mut Job, now: DateTime<Utc>) {
        if let Some(state) = self.state {
            job.set_state(state);
        }
        if let Some(substate) = self.substate {
            job.substate = substate;
        }
        for (attr, value) in self.updates {
            job.attrs.insert(attr, value);
        }
        job.last_status_refresh = now;
    }
}

/// Client for a job's execution-host agent.
#[async_trait]
pub trait StatusAgent: Send + Sync {
    async fn fetch_status(
        &self,
        job_id: &JobId,
        exec_host: &str,
    ) -> Result<AgentReport, AgentError>;
}

/// Agent that confirms the cached status of every job it is asked about.
/// Used when the node has no transport to real execution hosts.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoopbackAgent;

#[async_trait]
impl StatusAgent for LoopbackAgent {
    async fn fetch_status(
        &self,
        _job_id: &JobId,
        _exec_host: &str,
    ) -> Result<AgentReport, AgentError> {
        Ok(AgentReport::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::job::substate;
    use chrono::Duration;

    #[test]
    fn apply_updates_state_attributes_and_timestamp() {
        let stale = Utc::now() - Duration::minutes(10);
        let mut job = Job::new("1.s", "batch", "a@h")
            .with_state(JobState::Running)
            .with_last_refresh(stale);
        let now = Utc::now();

        AgentReport::default()
            .with_state(JobState::Exiting)
            .with_update(JobAttr::SessionId, AttrValue::Long(4242))
            .apply(&mut job, now);

        assert_eq!(job.state, JobState::Exiting);
        assert_eq!(job.substate, substate::EXITING);
        assert_eq!(job.attrs.get(&JobAttr::SessionId), Some(&AttrValue::Long(4242)));
        assert_eq!(job.last_status_refresh, now);
    }

    #[tokio::test]
    async fn loopback_confirms_cached_status() {
        let report = LoopbackAgent
            .fetch_status(&JobId::from("1.s"), "node01")
            .await
            .unwrap();
        assert_eq!(report, AgentReport::default());
    }
}
