use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::attribute::{AttrValue, JobAttr};

/// Server-assigned job identifier, e.g. `42.headnode`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    Transit,
    Queued,
    Held,
    Waiting,
    Running,
    Exiting,
    Complete,
}

impl JobState {
    pub fn letter(self) -> char {
        match self {
            JobState::Transit => 'T',
            JobState::Queued => 'Q',
            JobState::Held => 'H',
            JobState::Waiting => 'W',
            JobState::Running => 'R',
            JobState::Exiting => 'E',
            JobState::Complete => 'C',
        }
    }

    pub fn from_letter(c: char) -> Option<Self> {
        Some(match c.to_ascii_uppercase() {
            'T' => JobState::Transit,
            'Q' => JobState::Queued,
            'H' => JobState::Held,
            'W' => JobState::Waiting,
            'R' => JobState::Running,
            'E' => JobState::Exiting,
            'C' => JobState::Complete,
            _ => return None,
        })
    }

    /// Substate a job enters with when it reaches this state.
    pub fn default_substate(self) -> u32 {
        match self {
            JobState::Transit => substate::TRANSIN,
            JobState::Queued => substate::QUEUED,
            JobState::Held => substate::HELD,
            JobState::Waiting => substate::WAITING,
            JobState::Running => substate::RUNNING,
            JobState::Exiting => substate::EXITING,
            JobState::Complete => substate::COMPLETE,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Transit => write!(f, "transit"),
            JobState::Queued => write!(f, "queued"),
            JobState::Held => write!(f, "held"),
            JobState::Waiting => write!(f, "waiting"),
            JobState::Running => write!(f, "running"),
            JobState::Exiting => write!(f, "exiting"),
            JobState::Complete => write!(f, "complete"),
        }
    }
}

pub mod substate {
    pub const TRANSIN: u32 = 0;
    pub const QUEUED: u32 = 10;
    pub const HELD: u32 = 20;
    pub const WAITING: u32 = 30;
    pub const PRERUN: u32 = 41;
    pub const RUNNING: u32 = 42;
    pub const EXITING: u32 = 50;
    pub const COMPLETE: u32 = 59;
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    /// Name of the queue the job currently sits in.
    pub queue: String,
    pub state: JobState,
    pub substate: u32,
    /// `user@host` of the submitter.
    pub owner: String,
    /// Parent array, for array subjobs.
    pub array_id: Option<String>,
    pub attrs: HashMap<JobAttr, AttrValue>,
    /// When the execution host last reported this job's status.
    pub last_status_refresh: DateTime<Utc>,
}

impl Job {
    pub fn new(id: impl Into<JobId>, queue: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            queue: queue.into(),
            state: JobState::Queued,
            substate: substate::QUEUED,
            owner: owner.into(),
            array_id: None,
            attrs: HashMap::new(),
            last_status_refresh: Utc::now(),
        }
    }

    pub fn with_state(mut self, state: JobState) -> Self {
        self.set_state(state);
        self
    }

    pub fn with_attr(mut self, attr: JobAttr, value: AttrValue) -> Self {
        self.attrs.insert(attr, value);
        self
    }

    pub fn with_array(mut self, array_id: impl Into<String>) -> Self {
        self.array_id = Some(array_id.into());
        self
    }

    pub fn with_last_refresh(mut self, at: DateTime<Utc>) -> Self {
        self.last_status_refresh = at;
        self
    }

    pub fn set_state(&mut self, state: JobState) {
        self.state = state;
        self.substate = state.default_substate();
    }

    /// Running as far as the execution host is concerned.
    pub fn is_running(&self) -> bool {
        self.substate == substate::RUNNING
    }

    /// The job's value for `attr`. Identity attributes are derived from the
    /// job's own fields; everything else comes from the attribute map.
    pub fn attr(&self, attr: JobAttr) -> Option<Cow<'_, AttrValue>> {
        match attr {
            JobAttr::State => Some(Cow::Owned(AttrValue::Char(self.state.letter()))),
            JobAttr::Substate => Some(Cow::Owned(AttrValue::Long(i64::from(self.substate)))),
            JobAttr::Queue => Some(Cow::Owned(AttrValue::Str(self.queue.clone()))),
            JobAttr::JobOwner => Some(Cow::Owned(AttrValue::Str(self.owner.clone()))),
            JobAttr::ArrayId => self
                .array_id
                .as_ref()
                .map(|a| Cow::Owned(AttrValue::Str(a.clone()))),
            other => self.attrs.get(&other).map(Cow::Borrowed),
        }
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}
