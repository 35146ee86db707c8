use std::fmt;

use serde::{Deserialize, Serialize};

use crate::scheduler::job::JobId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueKind {
    Execution,
    Route,
}

impl fmt::Display for QueueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueKind::Execution => write!(f, "execution"),
            QueueKind::Route => write!(f, "route"),
        }
    }
}

/// A named container of jobs. Membership is kept in insertion order.
#[derive(Debug, Clone)]
pub struct Queue {
    pub name: String,
    pub kind: QueueKind,
    jobs: Vec<JobId>,
}

impl Queue {
    pub fn new(name: impl Into<String>, kind: QueueKind) -> Self {
        Self {
            name: name.into(),
            kind,
            jobs: Vec::new(),
        }
    }

    pub fn is_execution(&self) -> bool {
        self.kind == QueueKind::Execution
    }

    pub fn jobs(&self) -> &[JobId] {
        &self.jobs
    }

    pub(crate) fn enqueue(&mut self, id: JobId) {
        if !self.jobs.contains(&id) {
            self.jobs.push(id);
        }
    }

    pub(crate) fn dequeue(&mut self, id: &JobId) -> bool {
        let before = self.jobs.len();
        self.jobs.retain(|j| j != id);
        before != self.jobs.len()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
