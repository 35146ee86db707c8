use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::attribute::{acl, Permission};
use crate::config::ServerConfig;
use crate::error::{BatchError, Result};
use crate::refresh::{RefreshError, RefreshOutcome, RefreshTicket, RemoteStatusGate};
use crate::scheduler::{Job, JobId, JobTable};
use crate::select::compile::{compile, CompiledSelect, Criterion};
use crate::select::evaluate::matches;
use crate::select::status::{AttributeStatusFormatter, StatusFormatter, StatusRecord};

/// Plain selection returns job ids; select-status returns full records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    #[default]
    Select,
    SelectStatus,
}

/// Privilege level a requester authenticates as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Operator,
    Manager,
}

impl Role {
    pub fn permission(self) -> Permission {
        match self {
            Role::User => Permission::USER,
            Role::Operator => Permission::OPERATOR,
            Role::Manager => Permission::MANAGER,
        }
    }
}

impl FromStr for Role {
    type Err = BatchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "user" => Ok(Role::User),
            "operator" => Ok(Role::Operator),
            "manager" => Ok(Role::Manager),
            _ => Err(BatchError::InvalidRequest(format!("unknown role {:?}", s))),
        }
    }
}

/// Who is asking, and with what privileges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requester {
    pub user: String,
    pub host: String,
    pub permission: Permission,
}

impl Requester {
    pub fn new(user: impl Into<String>, host: impl Into<String>, permission: Permission) -> Self {
        Self {
            user: user.into(),
            host: host.into(),
            permission,
        }
    }

    /// Owners see their own jobs; operators and managers see everything, as
    /// does anyone when the server allows `query_others`.
    pub fn may_view(&self, job: &Job, query_others: bool) -> bool {
        if query_others || self.permission.can_read_others() {
            return true;
        }
        let (owner, _) = acl::split_owner(&job.owner);
        owner == self.user
    }
}

/// One select or select-status request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectRequest {
    pub requester: Requester,
    #[serde(default)]
    pub kind: QueryKind,
    #[serde(default)]
    pub criteria: Vec<Criterion>,
    /// Only report jobs sitting in execution queues.
    #[serde(default)]
    pub exec_queue_only: bool,
    /// Collapse job arrays to one representative each.
    #[serde(default)]
    pub summarize_arrays: bool,
}

impl SelectRequest {
    pub fn new(requester: Requester, kind: QueryKind, criteria: Vec<Criterion>) -> Self {
        Self {
            requester,
            kind,
            criteria,
            exec_queue_only: false,
            summarize_arrays: false,
        }
    }

    pub fn exec_queue_only(mut self) -> Self {
        self.exec_queue_only = true;
        self
    }

    pub fn summarize_arrays(mut self) -> Self {
        self.summarize_arrays = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reply {
    SelectedIds(Vec<JobId>),
    StatusRecords(Vec<StatusRecord>),
}

impl Reply {
    pub fn len(&self) -> usize {
        match self {
            Reply::SelectedIds(ids) => ids.len(),
            Reply::StatusRecords(records) => records.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids of every job in the reply, in reply order.
    pub fn job_ids(&self) -> Vec<&JobId> {
        match self {
            Reply::SelectedIds(ids) => ids.iter().collect(),
            Reply::StatusRecords(records) => records.iter().map(|r| &r.job_id).collect(),
        }
    }
}

/// Entry point for select requests against a shared job table.
///
/// Cheap to share behind an `Arc`; every request gets its own controller
/// state and the engine itself is never mutated.
pub struct SelectEngine {
    table: Arc<JobTable>,
    gate: Arc<dyn RemoteStatusGate>,
    formatter: Arc<dyn StatusFormatter>,
    config: ServerConfig,
}

impl SelectEngine {
    pub fn new(table: Arc<JobTable>, gate: Arc<dyn RemoteStatusGate>, config: ServerConfig) -> Self {
        let formatter = Arc::new(AttributeStatusFormatter::new(config.query_others));
        Self {
            table,
            gate,
            formatter,
            config,
        }
    }

    pub fn with_formatter(mut self, formatter: Arc<dyn StatusFormatter>) -> Self {
        self.formatter = formatter;
        self
    }

    pub fn table(&self) -> &Arc<JobTable> {
        &self.table
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Compile the request's criteria, then scan and answer.
    ///
    /// A select-status request may suspend here while running jobs with stale
    /// status are refreshed. No job or queue lock is held while suspended.
    pub async fn handle_select(&self, request: &SelectRequest) -> Result<Reply> {
        let request_id = Uuid::new_v4();
        tracing::debug!(
            request_id = %request_id,
            user = %request.requester.user,
            kind = ?request.kind,
            criteria = request.criteria.len(),
            "Select request received"
        );

        let compiled = match compile(&request.criteria, request.requester.permission, &self.table) {
            Ok(compiled) => compiled,
            Err(e) => {
                tracing::warn!(
                    request_id = %request_id,
                    index = ?e.criterion_index(),
                    error = %e,
                    "Select request rejected"
                );
                return Err(e);
            }
        };

        let mut cntl = StatControl::new(self, request, compiled, request_id);
        match cntl.run().await {
            Ok(reply) => {
                tracing::info!(
                    request_id = %request_id,
                    matched = reply.len(),
                    refreshes = cntl.refreshes,
                    "Select request answered"
                );
                Ok(reply)
            }
            Err(e) => {
                tracing::error!(request_id = %request_id, error = %e, "Select request aborted");
                Err(e)
            }
        }
    }
}

enum Phase {
    ScanningForStale,
    SuspendedOnRefresh {
        job_id: JobId,
        ticket: oneshot::Receiver<RefreshOutcome>,
    },
    Finalizing,
    Done(Reply),
}

enum Visit {
    Skip,
    Match { stale: bool },
}

/// Per-request controller state. Owned by one request; dropped when it ends.
struct StatControl<'a> {
    engine: &'a SelectEngine,
    request: &'a SelectRequest,
    compiled: CompiledSelect,
    request_id: Uuid,
    /// Last matching job seen by the current stale scan. Reset on restart.
    last_seen: Option<JobId>,
    /// Jobs this request has already asked to refresh. Never asked twice.
    refreshed: HashSet<JobId>,
    refreshes: usize,
}

impl<'a> StatControl<'a> {
    fn new(
        engine: &'a SelectEngine,
        request: &'a SelectRequest,
        compiled: CompiledSelect,
        request_id: Uuid,
    ) -> Self {
        Self {
            engine,
            request,
            compiled,
            request_id,
            last_seen: None,
            refreshed: HashSet::new(),
            refreshes: 0,
        }
    }

    fn initial_phase(&self) -> Phase {
        if self.request.kind == QueryKind::Select || self.engine.config.poll_jobs {
            Phase::Finalizing
        } else {
            Phase::ScanningForStale
        }
    }

    async fn run(&mut self) -> Result<Reply> {
        let mut phase = self.initial_phase();
        loop {
            phase = match phase {
                Phase::ScanningForStale => self.scan_for_stale()?,
                Phase::SuspendedOnRefresh { job_id, ticket } => {
                    self.await_refresh(&job_id, ticket).await;
                    Phase::ScanningForStale
                }
                Phase::Finalizing => Phase::Done(self.finalize()?),
                Phase::Done(reply) => return Ok(reply),
            };
        }
    }

    fn scope_ids(&self) -> Vec<JobId> {
        self.engine
            .table
            .scope_ids(&self.compiled.scope, self.request.summarize_arrays)
    }

    /// Exec-queue filter, view permission and the predicate chain. Called
    /// with the job locked; may briefly lock the job's queue.
    fn selects(&self, job: &Job) -> bool {
        if self.request.exec_queue_only {
            let exec = self
                .engine
                .table
                .with_queue(&job.queue, |q| q.is_execution())
                .unwrap_or(false);
            if !exec {
                return false;
            }
        }
        if !self
            .request
            .requester
            .may_view(job, self.engine.config.query_others)
        {
            return false;
        }
        matches(job, &self.compiled.chain)
    }

    fn visit(&self, job: &Job, now: DateTime<Utc>) -> Visit {
        if !self.selects(job) {
            return Visit::Skip;
        }
        let stale = job.is_running()
            && (now - job.last_status_refresh)
                .to_std()
                .map(|age| age > self.engine.config.job_stat_rate)
                .unwrap_or(false);
        Visit::Match { stale }
    }

    /// Phase one. Looks for the first matching running job whose status is
    /// stale and hands it to the gate; the scan restarts from the top after
    /// each refresh.
    fn scan_for_stale(&mut self) -> Result<Phase> {
        let now = Utc::now();
        self.last_seen = None;

        for id in self.scope_ids() {
            let visit = self.engine.table.with_job(&id, |job| self.visit(job, now));
            let stale = match visit {
                None => {
                    tracing::debug!(request_id = %self.request_id, job_id = %id, "Job vanished during scan");
                    continue;
                }
                Some(Visit::Skip) => continue,
                Some(Visit::Match { stale }) => {
                    self.last_seen = Some(id.clone());
                    stale
                }
            };
            if !stale || self.refreshed.contains(&id) {
                continue;
            }

            // Marked before the call: a job the gate turns away is not retried in this request.
            self.refreshed.insert(id.clone());
            match self.engine.gate.request_refresh(&id) {
                Ok(RefreshTicket::Pending(ticket)) => {
                    self.refreshes += 1;
                    tracing::info!(request_id = %self.request_id, job_id = %id, "Refreshing stale job status");
                    return Ok(Phase::SuspendedOnRefresh { job_id: id, ticket });
                }
                Ok(RefreshTicket::Ready) => continue,
                Err(RefreshError::OutOfMemory(reason)) => {
                    return Err(BatchError::OutOfMemory(reason));
                }
                Err(e @ RefreshError::Unavailable(_)) => {
                    tracing::warn!(request_id = %self.request_id, job_id = %id, error = %e, "Skipping refresh");
                }
            }
        }

        tracing::debug!(
            request_id = %self.request_id,
            last_seen = ?self.last_seen,
            refreshes = self.refreshes,
            "Stale scan finished"
        );
        Ok(Phase::Finalizing)
    }

    async fn await_refresh(&self, job_id: &JobId, ticket: oneshot::Receiver<RefreshOutcome>) {
        match ticket.await {
            Ok(RefreshOutcome::Refreshed) => {
                tracing::debug!(request_id = %self.request_id, job_id = %job_id, "Refresh complete, rescanning");
            }
            Ok(RefreshOutcome::Failed(reason)) => {
                tracing::warn!(request_id = %self.request_id, job_id = %job_id, reason = %reason, "Refresh failed, rescanning");
            }
            Err(_) => {
                tracing::warn!(request_id = %self.request_id, job_id = %job_id, "Refresh dropped, rescanning");
            }
        }
    }

    /// Phase two. A fresh pass over the scope that builds the reply.
    fn finalize(&self) -> Result<Reply> {
        let ids = self.scope_ids();
        match self.request.kind {
            QueryKind::Select => {
                let mut selected = Vec::new();
                for id in ids {
                    match self.engine.table.with_job(&id, |job| self.selects(job)) {
                        None => self.log_vanished(&id),
                        Some(false) => {}
                        Some(true) => {
                            reserve_one(&mut selected)?;
                            selected.push(id);
                        }
                    }
                }
                Ok(Reply::SelectedIds(selected))
            }
            QueryKind::SelectStatus => {
                let mut records = Vec::new();
                for id in ids {
                    let built = self.engine.table.with_job(&id, |job| {
                        self.selects(job).then(|| {
                            self.engine
                                .formatter
                                .status_job(job, &self.request.requester)
                        })
                    });
                    match built {
                        None => self.log_vanished(&id),
                        Some(None) => {}
                        Some(Some(Ok(record))) => {
                            reserve_one(&mut records)?;
                            records.push(record);
                        }
                        Some(Some(Err(BatchError::PermissionDenied(reason)))) => {
                            tracing::debug!(request_id = %self.request_id, job_id = %id, reason = %reason, "Status withheld");
                        }
                        Some(Some(Err(e))) => return Err(e),
                    }
                }
                Ok(Reply::StatusRecords(records))
            }
        }
    }

    fn log_vanished(&self, id: &JobId) {
        let e = BatchError::JobNotFound(id.to_string());
        tracing::debug!(request_id = %self.request_id, error = %e, "Skipping job");
    }
}

fn reserve_one<T>(v: &mut Vec<T>) -> Result<()> {
    v.try_reserve(1)
        .map_err(|e| BatchError::OutOfMemory(format!("reply: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refresh::CachedStatusGate;
    use crate::scheduler::{JobState, Queue, QueueKind};
    use crate::select::compile::Op;

    fn engine() -> SelectEngine {
        let table = JobTable::new("s");
        table.add_queue(Queue::new("batch", QueueKind::Execution));
        table
            .insert_job(Job::new("1.s", "batch", "alice@h").with_state(JobState::Running))
            .unwrap();
        table.insert_job(Job::new("2.s", "batch", "bob@h")).unwrap();
        SelectEngine::new(
            Arc::new(table),
            Arc::new(CachedStatusGate),
            ServerConfig::default(),
        )
    }

    #[test]
    fn roles_map_to_permissions() {
        assert_eq!("operator".parse::<Role>().unwrap().permission(), Permission::OPERATOR);
        assert_eq!(Role::default().permission(), Permission::USER);
        assert!("root".parse::<Role>().is_err());
    }

    #[test]
    fn owner_and_privileged_visibility() {
        let job = Job::new("1.s", "batch", "alice@h");
        assert!(Requester::new("alice", "x", Permission::USER).may_view(&job, false));
        assert!(!Requester::new("bob", "x", Permission::USER).may_view(&job, false));
        assert!(Requester::new("bob", "x", Permission::USER).may_view(&job, true));
        assert!(Requester::new("op", "x", Permission::OPERATOR).may_view(&job, false));
    }

    #[tokio::test]
    async fn plain_user_only_sees_own_jobs() {
        let request = SelectRequest::new(
            Requester::new("alice", "h", Permission::USER),
            QueryKind::Select,
            vec![],
        );
        let reply = engine().handle_select(&request).await.unwrap();
        assert_eq!(reply, Reply::SelectedIds(vec![JobId::from("1.s")]));
    }

    #[tokio::test]
    async fn compile_error_is_returned_with_index() {
        let request = SelectRequest::new(
            Requester::new("root", "h", Permission::MANAGER),
            QueryKind::Select,
            vec![
                Criterion::new("job_state", Op::Eq, "R"),
                Criterion::new("Bogus", Op::Eq, "1"),
            ],
        );
        let err = engine().handle_select(&request).await.unwrap_err();
        assert_eq!(err.criterion_index(), Some(2));
    }

    #[test]
    fn reply_reports_ids_in_order() {
        let reply = Reply::SelectedIds(vec![JobId::from("2.s"), JobId::from("1.s")]);
        assert_eq!(reply.len(), 2);
        assert_eq!(reply.job_ids(), vec![&JobId::from("2.s"), &JobId::from("1.s")]);
        assert!(Reply::StatusRecords(vec![]).is_empty());
    }
}
