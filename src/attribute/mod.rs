//! Job attribute definitions.
//!
//! Every selectable job attribute has a process-wide [`AttributeDef`] that
//! knows how to decode a client-supplied string into an [`AttrValue`], how to
//! three-way compare a job's value against a decoded one, and how to encode a
//! value back into [`AttrEntry`] form for status replies.
//!
//! # Components
//!
//! - [`checkpoint`]: category ordering and validation of checkpoint values
//! - [`resource`]: resource definitions (`walltime`, `mem`, ...) nested under
//!   `Resource_List` / `resources_used`
//! - [`acl`]: `user[@host]` access list matching

pub mod acl;
pub mod checkpoint;
pub mod resource;

use std::cmp::Ordering;
use std::ops::BitOr;

use serde::{Deserialize, Serialize};

use crate::error::{BatchError, Result};
pub use resource::{find_resource, Resource, ResourceDef, ResourceKind, ResourceValue};

/// Access permission bits carried by a requester and required by an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Permission(u32);

impl Permission {
    pub const NONE: Self = Self(0);
    pub const USER_READ: Self = Self(0x01);
    pub const USER_WRITE: Self = Self(0x02);
    pub const OPERATOR_READ: Self = Self(0x04);
    pub const OPERATOR_WRITE: Self = Self(0x08);
    pub const MANAGER_READ: Self = Self(0x10);
    pub const MANAGER_WRITE: Self = Self(0x20);

    pub const USER: Self = Self(0x03);
    pub const OPERATOR: Self = Self(0x0f);
    pub const MANAGER: Self = Self(0x3f);

    /// Readable by everyone.
    pub const READ_ALL: Self = Self(0x15);
    /// Readable by operators and managers only.
    pub const READ_PRIVILEGED: Self = Self(0x14);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Operator or manager read access lets a requester look at other users' jobs.
    pub const fn can_read_others(self) -> bool {
        self.intersects(Self::READ_PRIVILEGED)
    }
}

impl BitOr for Permission {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Index of a job attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum JobAttr {
    JobName,
    JobOwner,
    State,
    Queue,
    Server,
    Checkpoint,
    HoldTypes,
    Priority,
    UserList,
    ResourceList,
    ResourcesUsed,
    ExecHost,
    Account,
    Euser,
    Egroup,
    Ctime,
    Mtime,
    Qtime,
    SessionId,
    Rerunable,
    Interactive,
    ArrayId,
    VariableList,
    Substate,
    Comment,
}

/// Value representation and comparator family of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrKind {
    Long,
    Str,
    Bool,
    Checkpoint,
    /// The job's single-letter state.
    State,
    /// Selection-only view of the state: a set of acceptable letters.
    StateSet,
    Acl,
    Resources,
}

/// A decoded attribute value. An unset attribute is simply absent.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Long(i64),
    Str(String),
    Bool(bool),
    Char(char),
    Acl(Vec<String>),
    Resources(Vec<Resource>),
}

impl AttrValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// The entry for `def` in a resource list value, if the value carries one.
    pub fn find_resource(&self, def: &ResourceDef) -> Option<&Resource> {
        match self {
            AttrValue::Resources(list) => list.iter().find(|r| r.def.name == def.name),
            _ => None,
        }
    }
}

/// One `(name, resource, value, op)` entry, the unit every attribute list is
/// made of on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttrEntry {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    pub value: String,
    #[serde(default)]
    pub op: u32,
}

impl AttrEntry {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resource: None,
            value: value.into(),
            op: 0,
        }
    }

    pub fn with_resource(
        name: impl Into<String>,
        resource: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            resource: Some(resource.into()),
            value: value.into(),
            op: 0,
        }
    }
}

/// Definition of one job attribute.
#[derive(Debug)]
pub struct AttributeDef {
    pub attr: JobAttr,
    pub name: &'static str,
    pub kind: AttrKind,
    /// Permission bits any one of which grants read access.
    pub access: Permission,
    /// Only `eq` / `ne` selection is meaningful for this attribute.
    pub select_eq_only: bool,
}

pub const ATTR_DESTINATION: &str = "queue";
pub const ATTR_RESOURCE_LIST: &str = "Resource_List";
pub const ATTR_VARIABLE_LIST: &str = "Variable_List";

const fn def(
    attr: JobAttr,
    name: &'static str,
    kind: AttrKind,
    access: Permission,
    select_eq_only: bool,
) -> AttributeDef {
    AttributeDef {
        attr,
        name,
        kind,
        access,
        select_eq_only,
    }
}

static JOB_ATTRIBUTES: &[AttributeDef] = &[
    def(JobAttr::JobName, "Job_Name", AttrKind::Str, Permission::READ_ALL, false),
    def(JobAttr::JobOwner, "Job_Owner", AttrKind::Str, Permission::READ_ALL, true),
    def(JobAttr::State, "job_state", AttrKind::State, Permission::READ_ALL, true),
    def(JobAttr::Queue, ATTR_DESTINATION, AttrKind::Str, Permission::READ_ALL, true),
    def(JobAttr::Server, "server", AttrKind::Str, Permission::READ_ALL, true),
    def(JobAttr::Checkpoint, "Checkpoint", AttrKind::Checkpoint, Permission::READ_ALL, false),
    def(JobAttr::HoldTypes, "Hold_Types", AttrKind::Str, Permission::READ_ALL, true),
    def(JobAttr::Priority, "Priority", AttrKind::Long, Permission::READ_ALL, false),
    def(JobAttr::UserList, "User_List", AttrKind::Acl, Permission::READ_ALL, true),
    def(JobAttr::ResourceList, ATTR_RESOURCE_LIST, AttrKind::Resources, Permission::READ_ALL, false),
    def(JobAttr::ResourcesUsed, "resources_used", AttrKind::Resources, Permission::READ_ALL, false),
    def(JobAttr::ExecHost, "exec_host", AttrKind::Str, Permission::READ_ALL, true),
    def(JobAttr::Account, "Account_Name", AttrKind::Str, Permission::READ_ALL, false),
    def(JobAttr::Euser, "euser", AttrKind::Str, Permission::READ_PRIVILEGED, false),
    def(JobAttr::Egroup, "egroup", AttrKind::Str, Permission::READ_PRIVILEGED, false),
    def(JobAttr::Ctime, "ctime", AttrKind::Long, Permission::READ_ALL, false),
    def(JobAttr::Mtime, "mtime", AttrKind::Long, Permission::READ_ALL, false),
    def(JobAttr::Qtime, "qtime", AttrKind::Long, Permission::READ_ALL, false),
    def(JobAttr::SessionId, "session_id", AttrKind::Long, Permission::READ_ALL, false),
    def(JobAttr::Rerunable, "Rerunable", AttrKind::Bool, Permission::READ_ALL, false),
    def(JobAttr::Interactive, "interactive", AttrKind::Bool, Permission::READ_ALL, false),
    def(JobAttr::ArrayId, "job_array_id", AttrKind::Str, Permission::READ_ALL, true),
    def(JobAttr::VariableList, ATTR_VARIABLE_LIST, AttrKind::Str, Permission::READ_ALL, true),
    def(JobAttr::Substate, "substate", AttrKind::Long, Permission::READ_PRIVILEGED, false),
    def(JobAttr::Comment, "comment", AttrKind::Str, Permission::READ_ALL, false),
];

/// Selection stand-in for `job_state`: the decoded value is a set of letters.
pub static STATE_SELECT: AttributeDef = def(
    JobAttr::State,
    "job_state",
    AttrKind::StateSet,
    Permission::READ_ALL,
    true,
);

/// Look up an attribute definition by name (case-insensitive).
pub fn find_attr(name: &str) -> Option<&'static AttributeDef> {
    JOB_ATTRIBUTES
        .iter()
        .find(|d| d.name.eq_ignore_ascii_case(name))
}

/// The definition for a known attribute index. The table is laid out in
/// `JobAttr` declaration order.
pub fn attr_def(attr: JobAttr) -> &'static AttributeDef {
    &JOB_ATTRIBUTES[attr as usize]
}

/// All registered job attributes, in registration order.
pub fn job_attributes() -> &'static [AttributeDef] {
    JOB_ATTRIBUTES
}

impl AttributeDef {
    pub fn readable_by(&self, perm: Permission) -> bool {
        self.access.intersects(perm)
    }

    /// Decode a client-supplied value. `Ok(None)` means the value decoded to
    /// "unset" (for example an empty string).
    pub fn decode(&self, resource: Option<&str>, value: &str) -> Result<Option<AttrValue>> {
        let trimmed = value.trim();
        match self.kind {
            AttrKind::Long => {
                if trimmed.is_empty() {
                    return Ok(None);
                }
                trimmed
                    .parse::<i64>()
                    .map(|v| Some(AttrValue::Long(v)))
                    .map_err(|_| BatchError::invalid_value(self.name, value))
            }
            AttrKind::Str | AttrKind::Checkpoint | AttrKind::StateSet => {
                if value.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(AttrValue::Str(value.to_string())))
                }
            }
            AttrKind::Bool => {
                if trimmed.is_empty() {
                    return Ok(None);
                }
                match trimmed.to_ascii_lowercase().as_str() {
                    "true" | "t" | "y" | "1" => Ok(Some(AttrValue::Bool(true))),
                    "false" | "f" | "n" | "0" => Ok(Some(AttrValue::Bool(false))),
                    _ => Err(BatchError::invalid_value(self.name, value)),
                }
            }
            AttrKind::State => {
                let mut chars = trimmed.chars();
                match (chars.next(), chars.next()) {
                    (None, _) => Ok(None),
                    (Some(c), None) if "TQHWREC".contains(c) => Ok(Some(AttrValue::Char(c))),
                    _ => Err(BatchError::invalid_value(self.name, value)),
                }
            }
            AttrKind::Acl => {
                let entries: Vec<String> = value
                    .split(',')
                    .map(str::trim)
                    .filter(|e| !e.is_empty())
                    .map(str::to_string)
                    .collect();
                if entries.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(AttrValue::Acl(entries)))
                }
            }
            AttrKind::Resources => {
                let name = resource.ok_or_else(|| BatchError::UnknownResource(String::new()))?;
                let rdef =
                    find_resource(name).ok_or_else(|| BatchError::UnknownResource(name.to_string()))?;
                Ok(rdef.decode(value)?.map(|v| {
                    AttrValue::Resources(vec![Resource {
                        def: rdef,
                        value: v,
                    }])
                }))
            }
        }
    }

    /// Three-way compare a job's value (possibly unset) against a decoded
    /// selection value. Unset job values compare less, except for checkpoint
    /// where unset is simply the lowest category.
    pub fn compare(&self, job_value: Option<&AttrValue>, with: &AttrValue) -> Ordering {
        match self.kind {
            AttrKind::Checkpoint => checkpoint::compare(
                job_value.and_then(AttrValue::as_str),
                with.as_str(),
            ),
            AttrKind::StateSet => match (job_value, with) {
                (Some(AttrValue::Char(state)), AttrValue::Str(set)) => compare_state(*state, set),
                _ => Ordering::Less,
            },
            _ => match (job_value, with) {
                (Some(AttrValue::Long(a)), AttrValue::Long(b)) => a.cmp(b),
                (Some(AttrValue::Str(a)), AttrValue::Str(b)) => a.cmp(b),
                (Some(AttrValue::Bool(a)), AttrValue::Bool(b)) => a.cmp(b),
                (Some(AttrValue::Char(a)), AttrValue::Char(b)) => a.cmp(b),
                (Some(AttrValue::Acl(a)), AttrValue::Acl(b)) => a.cmp(b),
                _ => Ordering::Less,
            },
        }
    }

    /// Encode a value as wire entries. Resource lists produce one entry per
    /// resource.
    pub fn encode(&self, value: &AttrValue) -> Vec<AttrEntry> {
        match value {
            AttrValue::Resources(list) => list
                .iter()
                .map(|r| AttrEntry::with_resource(self.name, r.def.name, r.def.encode(&r.value)))
                .collect(),
            other => vec![AttrEntry::new(self.name, encode_scalar(other))],
        }
    }
}

/// Set-membership comparator for `job_state` selection: equal iff the job's
/// state letter is one of the letters in `set`. A miss is reported as
/// `Greater`, which carries no ordering meaning; only eq/ne are allowed on
/// this attribute.
pub fn compare_state(state: char, set: &str) -> Ordering {
    if set.contains(state) {
        Ordering::Equal
    } else {
        Ordering::Greater
    }
}

fn encode_scalar(value: &AttrValue) -> String {
    match value {
        AttrValue::Long(v) => v.to_string(),
        AttrValue::Str(s) => s.clone(),
        AttrValue::Bool(true) => "True".to_string(),
        AttrValue::Bool(false) => "False".to_string(),
        AttrValue::Char(c) => c.to_string(),
        AttrValue::Acl(entries) => entries.join(","),
        AttrValue::Resources(_) => String::new(),
    }
}
