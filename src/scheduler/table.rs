use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::error::{BatchError, Result};
use crate::scheduler::job::{Job, JobId};
use crate::scheduler::queue::Queue;

const DEFAULT_MAX_JOBS: usize = 100_000;

/// The set of jobs a query iterates over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    Server,
    Queue(String),
}

struct Slot {
    job: Arc<Mutex<Job>>,
    array_id: Option<String>,
}

#[derive(Default)]
struct JobIndex {
    order: Vec<JobId>,
    slots: HashMap<JobId, Slot>,
}

/// Shared job and queue table.
///
/// Each job and each queue has its own lock. Access goes through closures
/// (`with_job`, `with_job_mut`, `with_queue`) so a lock can never outlive the
/// call that took it, and in particular can never be held across an `.await`.
///
/// Lock order: a job lock may be held while a queue lock is taken, never the
/// reverse. The index locks are only ever held on their own.
pub struct JobTable {
    server_name: String,
    jobs: RwLock<JobIndex>,
    queues: RwLock<HashMap<String, Arc<Mutex<Queue>>>>,
    max_jobs: usize,
}

impl JobTable {
    pub fn new(server_name: impl Into<String>) -> Self {
        Self::with_capacity(server_name, DEFAULT_MAX_JOBS)
    }

    pub fn with_capacity(server_name: impl Into<String>, max_jobs: usize) -> Self {
        Self {
            server_name: server_name.into(),
            jobs: RwLock::new(JobIndex::default()),
            queues: RwLock::new(HashMap::new()),
            max_jobs,
        }
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Add a queue. Returns false if one with that name already exists.
    pub fn add_queue(&self, queue: Queue) -> bool {
        let mut queues = self.queues.write();
        if queues.contains_key(&queue.name) {
            return false;
        }
        tracing::debug!(queue = %queue.name, kind = %queue.kind, "Queue created");
        queues.insert(queue.name.clone(), Arc::new(Mutex::new(queue)));
        true
    }

    fn queue_entry(&self, name: &str) -> Option<Arc<Mutex<Queue>>> {
        self.queues.read().get(name).cloned()
    }

    fn job_entry(&self, id: &JobId) -> Option<Arc<Mutex<Job>>> {
        self.jobs.read().slots.get(id).map(|s| s.job.clone())
    }

    /// Insert a job into the table and its queue.
    pub fn insert_job(&self, job: Job) -> Result<()> {
        let queue = self
            .queue_entry(&job.queue)
            .ok_or_else(|| BatchError::UnknownQueue(job.queue.clone()))?;
        let id = job.id.clone();
        {
            let mut index = self.jobs.write();
            if index.slots.contains_key(&id) {
                return Err(BatchError::InvalidRequest(format!("job {} already exists", id)));
            }
            if index.slots.len() >= self.max_jobs {
                return Err(BatchError::OutOfMemory(format!(
                    "job table at capacity ({})",
                    self.max_jobs
                )));
            }
            let slot = Slot {
                array_id: job.array_id.clone(),
                job: Arc::new(Mutex::new(job)),
            };
            index.order.push(id.clone());
            index.slots.insert(id.clone(), slot);
        }
        queue.lock().enqueue(id.clone());
        tracing::debug!(job_id = %id, "Job added to table");
        Ok(())
    }

    /// Remove a job from the table and its queue, returning it.
    pub fn remove_job(&self, id: &JobId) -> Option<Job> {
        let slot = {
            let mut index = self.jobs.write();
            let slot = index.slots.remove(id)?;
            index.order.retain(|j| j != id);
            slot
        };
        let job = slot.job.lock().clone();
        if let Some(queue) = self.queue_entry(&job.queue) {
            queue.lock().dequeue(id);
        }
        tracing::debug!(job_id = %id, "Job removed from table");
        Some(job)
    }

    /// Run `f` with the job locked. `None` if the job does not exist.
    pub fn with_job<R>(&self, id: &JobId, f: impl FnOnce(&Job) -> R) -> Option<R> {
        let entry = self.job_entry(id)?;
        let job = entry.lock();
        Some(f(&job))
    }

    /// Run `f` with the job locked for mutation. `None` if the job does not exist.
    pub fn with_job_mut<R>(&self, id: &JobId, f: impl FnOnce(&mut Job) -> R) -> Option<R> {
        let entry = self.job_entry(id)?;
        let mut job = entry.lock();
        Some(f(&mut job))
    }

    /// Run `f` with the queue locked. `None` if no such queue.
    pub fn with_queue<R>(&self, name: &str, f: impl FnOnce(&Queue) -> R) -> Option<R> {
        let entry = self.queue_entry(name)?;
        let queue = entry.lock();
        Some(f(&queue))
    }

    /// Snapshot the ids of the jobs in `scope`, in table order. With
    /// `summarize_arrays`, array subjobs are collapsed to the first member of
    /// each array.
    pub fn scope_ids(&self, scope: &Scope, summarize_arrays: bool) -> Vec<JobId> {
        let ids = match scope {
            Scope::Server => self.jobs.read().order.clone(),
            Scope::Queue(name) => self
                .with_queue(name, |q| q.jobs().to_vec())
                .unwrap_or_default(),
        };
        if !summarize_arrays {
            return ids;
        }

        let index = self.jobs.read();
        let mut seen_arrays = HashSet::new();
        ids.into_iter()
            .filter(|id| match index.slots.get(id).map(|s| s.array_id.as_ref()) {
                Some(Some(array)) => seen_arrays.insert(array.clone()),
                Some(None) => true,
                None => false,
            })
            .collect()
    }

    pub fn contains(&self, id: &JobId) -> bool {
        self.jobs.read().slots.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.jobs.read().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.queues.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for JobTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobTable")
            .field("server_name", &self.server_name)
            .field("jobs", &self.len())
            .field("queues", &self.queue_names())
            .finish()
    }
}
