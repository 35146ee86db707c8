use serde::{Deserialize, Serialize};

use crate::attribute::{job_attributes, AttrEntry};
use crate::error::{BatchError, Result};
use crate::scheduler::{Job, JobId};
use crate::select::controller::Requester;

/// Full status of one job as sent back for a select-status query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub job_id: JobId,
    pub attributes: Vec<AttrEntry>,
}

impl StatusRecord {
    /// The value of the first entry named `name`, if any.
    pub fn value(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|e| e.name == name && e.resource.is_none())
            .map(|e| e.value.as_str())
    }

    pub fn resource_value(&self, name: &str, resource: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|e| e.name == name && e.resource.as_deref() == Some(resource))
            .map(|e| e.value.as_str())
    }
}

/// Builds a status record for a job the engine has selected.
///
/// Called with the job locked, so implementations must not touch the table.
/// Returning [`BatchError::PermissionDenied`] drops just this job from the
/// reply; any other error aborts the whole request.
pub trait StatusFormatter: Send + Sync {
    fn status_job(&self, job: &Job, requester: &Requester) -> Result<StatusRecord>;
}

/// Encodes every attribute the requester is allowed to read, in attribute
/// registration order.
#[derive(Debug, Clone, Default)]
pub struct AttributeStatusFormatter {
    query_others: bool,
}

impl AttributeStatusFormatter {
    pub fn new(query_others: bool) -> Self {
        Self { query_others }
    }
}

impl StatusFormatter for AttributeStatusFormatter {
    fn status_job(&self, job: &Job, requester: &Requester) -> Result<StatusRecord> {
        if !requester.may_view(job, self.query_others) {
            return Err(BatchError::PermissionDenied(format!(
                "{} may not view job {}",
                requester.user, job.id
            )));
        }

        let mut attributes = Vec::new();
        for def in job_attributes() {
            if !def.readable_by(requester.permission) {
                continue;
            }
            if let Some(value) = job.attr(def.attr) {
                attributes.extend(def.encode(&value));
            }
        }
        Ok(StatusRecord {
            job_id: job.id.clone(),
            attributes,
        })
    }
}
