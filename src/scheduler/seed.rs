//! Loading queues and jobs into a [`JobTable`] from a JSON description.
//!
//! The seed format is what the `server` and `select` commands accept via
//! `--seed`:
//!
//! ```json
//! {
//!   "queues": [{ "name": "batch", "kind": "execution" }],
//!   "jobs": [{
//!     "id": "1.headnode", "queue": "batch", "state": "R", "owner": "alice@login1",
//!     "attributes": { "Job_Name": "sim", "Checkpoint": "c=30" },
//!     "resources": { "walltime": "01:00:00" },
//!     "environment": { "PBS_O_HOME": "/home/alice", "pbs_var_OMP_NUM_THREADS": "4" },
//!     "refreshed_secs_ago": 120
//!   }]
//! }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use crate::attribute::{self, checkpoint, AttrEntry, AttrValue, JobAttr, Resource};
use crate::error::{BatchError, Result};
use crate::scheduler::job::{Job, JobState};
use crate::scheduler::queue::{Queue, QueueKind};
use crate::scheduler::table::JobTable;
use crate::wire::attropl::build_var_list;

#[derive(Debug, Default, Deserialize)]
pub struct TableSeed {
    #[serde(default)]
    pub queues: Vec<QueueSeed>,
    #[serde(default)]
    pub jobs: Vec<JobSeed>,
}

#[derive(Debug, Deserialize)]
pub struct QueueSeed {
    pub name: String,
    pub kind: QueueKind,
}

#[derive(Debug, Deserialize)]
pub struct JobSeed {
    pub id: String,
    pub queue: String,
    #[serde(default = "default_state")]
    pub state: String,
    pub owner: String,
    #[serde(default)]
    pub array_id: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub resources: BTreeMap<String, String>,
    #[serde(default)]
    pub resources_used: BTreeMap<String, String>,
    /// `PBS_O_*` and `pbs_var_*` entries folded into `Variable_List`.
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    #[serde(default)]
    pub refreshed_secs_ago: Option<i64>,
}

fn default_state() -> String {
    "Q".to_string()
}

/// Attributes derived from job fields rather than stored in the map.
const IDENTITY_ATTRS: &[JobAttr] = &[
    JobAttr::State,
    JobAttr::Substate,
    JobAttr::Queue,
    JobAttr::JobOwner,
    JobAttr::ArrayId,
];

impl TableSeed {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Add every queue and job to `table`. Returns the number of jobs added.
    pub fn apply(self, table: &JobTable) -> Result<usize> {
        for q in self.queues {
            if !table.add_queue(Queue::new(q.name.clone(), q.kind)) {
                tracing::warn!(queue = %q.name, "Duplicate queue in seed, keeping first");
            }
        }
        let mut added = 0;
        for seed in self.jobs {
            table.insert_job(seed.into_job()?)?;
            added += 1;
        }
        tracing::info!(jobs = added, queues = table.queue_names().len(), "Seed applied");
        Ok(added)
    }
}

impl JobSeed {
    pub fn into_job(self) -> Result<Job> {
        let state = single_letter(&self.state)
            .and_then(JobState::from_letter)
            .ok_or_else(|| BatchError::invalid_value("job_state", self.state.clone()))?;

        let mut job = Job::new(self.id, self.queue, self.owner).with_state(state);
        job.array_id = self.array_id;
        if let Some(ago) = self.refreshed_secs_ago {
            job.last_status_refresh = refreshed_at(ago)?;
        }

        for (name, value) in &self.attributes {
            let def =
                attribute::find_attr(name).ok_or_else(|| BatchError::UnknownAttribute(name.clone()))?;
            if IDENTITY_ATTRS.contains(&def.attr) {
                return Err(BatchError::InvalidRequest(format!(
                    "{} is set from the job's own fields",
                    def.name
                )));
            }
            if def.attr == JobAttr::Checkpoint {
                checkpoint::validate(value)?;
            }
            if let Some(v) = def.decode(None, value)? {
                job.attrs.insert(def.attr, v);
            }
        }

        if let Some(list) = decode_resources(&self.resources)? {
            job.attrs.insert(JobAttr::ResourceList, list);
        }
        if let Some(list) = decode_resources(&self.resources_used)? {
            job.attrs.insert(JobAttr::ResourcesUsed, list);
        }
        if !self.environment.is_empty() {
            let existing = job.attrs.remove(&JobAttr::VariableList);
            let vars = fold_environment(&self.environment, existing)?;
            job.attrs.insert(JobAttr::VariableList, AttrValue::Str(vars));
        }
        Ok(job)
    }
}

/// Timestamp `ago` seconds in the past. Negative ages would never go stale.
fn refreshed_at(ago: i64) -> Result<DateTime<Utc>> {
    if ago < 0 {
        return Err(BatchError::invalid_value("refreshed_secs_ago", ago.to_string()));
    }
    Duration::try_seconds(ago)
        .and_then(|age| Utc::now().checked_sub_signed(age))
        .ok_or_else(|| BatchError::invalid_value("refreshed_secs_ago", ago.to_string()))
}

fn single_letter(s: &str) -> Option<char> {
    let mut chars = s.trim().chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Some(c),
        _ => None,
    }
}

fn decode_resources(values: &BTreeMap<String, String>) -> Result<Option<AttrValue>> {
    let mut list = Vec::with_capacity(values.len());
    for (name, value) in values {
        let def = attribute::find_resource(name)
            .ok_or_else(|| BatchError::UnknownResource(name.clone()))?;
        if let Some(v) = def.decode(value)? {
            list.push(Resource { def, value: v });
        }
    }
    Ok((!list.is_empty()).then_some(AttrValue::Resources(list)))
}

fn fold_environment(
    environment: &BTreeMap<String, String>,
    existing: Option<AttrValue>,
) -> Result<String> {
    let mut entries: Vec<AttrEntry> = environment
        .iter()
        .map(|(name, value)| AttrEntry::new(name, value))
        .collect();
    if let Some(AttrValue::Str(existing)) = existing {
        entries.push(AttrEntry::new(attribute::ATTR_VARIABLE_LIST, existing));
    }
    let vars = build_var_list(&mut entries);
    if let Some(stray) = entries.first() {
        return Err(BatchError::InvalidRequest(format!(
            "environment entry {} is neither PBS_O_* nor pbs_var_*",
            stray.name
        )));
    }
    Ok(vars)
}

/// Build a table named `server_name` from a seed file.
pub fn load_table(path: &Path, server_name: &str) -> Result<JobTable> {
    let table = JobTable::new(server_name);
    TableSeed::from_file(path)?.apply(&table)?;
    Ok(table)
}
