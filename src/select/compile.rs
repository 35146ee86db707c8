use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::attribute::{
    self, AttrKind, AttrValue, AttributeDef, JobAttr, Permission, ResourceDef, ATTR_DESTINATION,
    STATE_SELECT,
};
use crate::error::{BatchError, Result};
use crate::scheduler::{JobTable, Scope};

/// Selection operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Op {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl Op {
    pub const ALL: [Op; 6] = [Op::Eq, Op::Ne, Op::Gt, Op::Ge, Op::Lt, Op::Le];

    /// Batch-operation code used on the wire.
    pub fn code(self) -> u32 {
        match self {
            Op::Eq => 4,
            Op::Ne => 5,
            Op::Ge => 6,
            Op::Gt => 7,
            Op::Le => 8,
            Op::Lt => 9,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        Op::ALL.into_iter().find(|op| op.code() == code)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Op::Eq => "eq",
            Op::Ne => "ne",
            Op::Gt => "gt",
            Op::Ge => "ge",
            Op::Lt => "lt",
            Op::Le => "le",
        }
    }

    pub fn is_equality(self) -> bool {
        matches!(self, Op::Eq | Op::Ne)
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Op {
    type Err = BatchError;

    fn from_str(s: &str) -> Result<Self> {
        Op::ALL
            .into_iter()
            .find(|op| op.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| BatchError::InvalidRequest(format!("unknown operator {:?}", s)))
    }
}

/// One client-supplied selection criterion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Criterion {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(default)]
    pub value: String,
    #[serde(default = "default_op")]
    pub op: Op,
}

fn default_op() -> Op {
    Op::Eq
}

impl Criterion {
    pub fn new(name: impl Into<String>, op: Op, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resource: None,
            value: value.into(),
            op,
        }
    }

    pub fn resource(
        name: impl Into<String>,
        resource: impl Into<String>,
        op: Op,
        value: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            resource: Some(resource.into()),
            value: value.into(),
            op,
        }
    }

    pub fn destination(dest: impl Into<String>) -> Self {
        Self::new(ATTR_DESTINATION, Op::Eq, dest)
    }

    fn is_destination(&self) -> bool {
        self.name.eq_ignore_ascii_case(ATTR_DESTINATION)
    }
}

/// Parses `name[.resource].op.value` (for example `Resource_List.walltime.ge.01:00:00`)
/// or the `queue=<destination>` shorthand.
impl FromStr for Criterion {
    type Err = BatchError;

    fn from_str(s: &str) -> Result<Self> {
        if let Some(dest) = s.strip_prefix("queue=") {
            return Ok(Criterion::destination(dest));
        }
        let found = Op::ALL
            .into_iter()
            .filter_map(|op| s.find(&format!(".{}.", op.as_str())).map(|pos| (pos, op)))
            .min_by_key(|(pos, _)| *pos);
        let (pos, op) =
            found.ok_or_else(|| BatchError::InvalidRequest(format!("no operator in {:?}", s)))?;
        let lhs = &s[..pos];
        let value = &s[pos + op.as_str().len() + 2..];
        if lhs.is_empty() {
            return Err(BatchError::InvalidRequest(format!("no attribute in {:?}", s)));
        }
        Ok(match lhs.split_once('.') {
            Some((name, resource)) => Criterion::resource(name, resource, op, value),
            None => Criterion::new(lhs, op, value),
        })
    }
}

/// One compiled comparison.
#[derive(Debug, Clone)]
pub struct SelectPredicate {
    pub attr: JobAttr,
    pub def: &'static AttributeDef,
    /// Set for resource predicates: the specific resource compared.
    pub resource: Option<&'static ResourceDef>,
    pub value: AttrValue,
    pub op: Op,
}

/// Ordered, immutable predicate chain.
#[derive(Debug, Clone, Default)]
pub struct SelectList {
    predicates: Vec<SelectPredicate>,
}

impl SelectList {
    pub fn iter(&self) -> std::slice::Iter<'_, SelectPredicate> {
        self.predicates.iter()
    }

    pub fn len(&self) -> usize {
        self.predicates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }
}

impl<'a> IntoIterator for &'a SelectList {
    type Item = &'a SelectPredicate;
    type IntoIter = std::slice::Iter<'a, SelectPredicate>;

    fn into_iter(self) -> Self::IntoIter {
        self.predicates.iter()
    }
}

/// Result of compiling a criteria list.
#[derive(Debug, Clone)]
pub struct CompiledSelect {
    pub chain: SelectList,
    pub scope: Scope,
}

/// Compile `criteria` into a predicate chain and a query scope.
///
/// Fails on the first bad criterion with [`BatchError::BadCriterion`]
/// carrying its 1-based position; nothing built so far survives.
pub fn compile(criteria: &[Criterion], perm: Permission, table: &JobTable) -> Result<CompiledSelect> {
    let mut predicates = Vec::with_capacity(criteria.len());
    let mut scope = Scope::Server;

    for (i, criterion) in criteria.iter().enumerate() {
        let index = i + 1;
        if criterion.is_destination() {
            if let Some(resolved) = resolve_destination(&criterion.value, table) {
                scope = resolved.map_err(|e| e.at_criterion(index))?;
            }
            continue;
        }
        let predicate = build_predicate(criterion, perm).map_err(|e| e.at_criterion(index))?;
        predicates.push(predicate);
    }

    tracing::debug!(predicates = predicates.len(), scope = ?scope, "Select list compiled");
    Ok(CompiledSelect {
        chain: SelectList { predicates },
        scope,
    })
}

/// `None` for a whole-server destination (empty or `@server`), otherwise the
/// named queue, which must exist. `None` leaves the current scope alone, so
/// the last queue destination wins.
fn resolve_destination(dest: &str, table: &JobTable) -> Option<Result<Scope>> {
    let dest = dest.trim();
    if dest.is_empty() || dest.starts_with('@') {
        return None;
    }
    let name = dest.split('@').next().unwrap_or(dest);
    let resolved = table
        .with_queue(name, |q| Scope::Queue(q.name.clone()))
        .ok_or_else(|| BatchError::UnknownQueue(name.to_string()));
    Some(resolved)
}

fn build_predicate(criterion: &Criterion, perm: Permission) -> Result<SelectPredicate> {
    let found = attribute::find_attr(&criterion.name)
        .ok_or_else(|| BatchError::UnknownAttribute(criterion.name.clone()))?;
    let def: &'static AttributeDef = if found.attr == JobAttr::State {
        &STATE_SELECT
    } else {
        found
    };

    if !def.readable_by(perm) {
        return Err(BatchError::PermissionDenied(format!(
            "attribute {} is not readable",
            def.name
        )));
    }

    if def.select_eq_only && !criterion.op.is_equality() {
        tracing::warn!(attribute = def.name, op = %criterion.op, "Attribute only selectable with eq/ne");
        return Err(BatchError::InvalidRequest(format!(
            "{} can only be selected with eq or ne",
            def.name
        )));
    }

    let value = def
        .decode(criterion.resource.as_deref(), &criterion.value)?
        .ok_or_else(|| BatchError::invalid_value(def.name, criterion.value.clone()))?;

    let resource = if def.kind == AttrKind::Resources {
        let name = criterion.resource.as_deref().unwrap_or_default();
        Some(
            attribute::find_resource(name)
                .ok_or_else(|| BatchError::UnknownResource(name.to_string()))?,
        )
    } else {
        None
    };

    Ok(SelectPredicate {
        attr: def.attr,
        def,
        resource,
        value,
        op: criterion.op,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::scheduler::{Queue, QueueKind};

    fn table() -> JobTable {
        let table = JobTable::new("server");
        table.add_queue(Queue::new("batch", QueueKind::Execution));
        table
    }

    #[test]
    fn parse_criterion_syntax() {
        let c: Criterion = "Resource_List.walltime.ge.01:00:00".parse().unwrap();
        assert_eq!(c, Criterion::resource("Resource_List", "walltime", Op::Ge, "01:00:00"));

        let c: Criterion = "job_state.eq.QR".parse().unwrap();
        assert_eq!(c, Criterion::new("job_state", Op::Eq, "QR"));

        let c: Criterion = "Job_Name.ne.run.v2".parse().unwrap();
        assert_eq!(c, Criterion::new("Job_Name", Op::Ne, "run.v2"));

        let c: Criterion = "queue=batch@server".parse().unwrap();
        assert_eq!(c, Criterion::destination("batch@server"));

        assert!("job_state=Q".parse::<Criterion>().is_err());
        assert!(".eq.Q".parse::<Criterion>().is_err());
    }

    #[test]
    fn op_codes_round_trip() {
        for op in Op::ALL {
            assert_eq!(Op::from_code(op.code()), Some(op));
            assert_eq!(op.as_str().parse::<Op>().unwrap(), op);
        }
        assert_eq!(Op::from_code(0), None);
    }

    #[test]
    fn compiles_chain_in_order() {
        let criteria = vec![
            Criterion::new("job_state", Op::Eq, "QR"),
            Criterion::new("Priority", Op::Gt, "10"),
            Criterion::resource("Resource_List", "walltime", Op::Le, "02:00:00"),
        ];
        let compiled = compile(&criteria, Permission::USER, &table()).unwrap();
        assert_eq!(compiled.scope, Scope::Server);
        let attrs: Vec<JobAttr> = compiled.chain.iter().map(|p| p.attr).collect();
        assert_eq!(
            attrs,
            vec![JobAttr::State, JobAttr::Priority, JobAttr::ResourceList]
        );
        let first = compiled.chain.iter().next().unwrap();
        assert_eq!(first.def.kind, AttrKind::StateSet);
        let last = compiled.chain.iter().last().unwrap();
        assert_eq!(last.resource.map(|r| r.name), Some("walltime"));
    }

    #[test]
    fn destination_sets_scope_without_predicate() {
        let table = table();
        let compiled = compile(&[Criterion::destination("batch@server")], Permission::USER, &table)
            .unwrap();
        assert_eq!(compiled.scope, Scope::Queue("batch".to_string()));
        assert!(compiled.chain.is_empty());

        let compiled =
            compile(&[Criterion::destination("@server")], Permission::USER, &table).unwrap();
        assert_eq!(compiled.scope, Scope::Server);
    }

    #[test]
    fn last_queue_destination_wins() {
        let table = table();
        table.add_queue(Queue::new("route", QueueKind::Route));

        let compiled = compile(
            &[Criterion::destination("batch"), Criterion::destination("route")],
            Permission::USER,
            &table,
        )
        .unwrap();
        assert_eq!(compiled.scope, Scope::Queue("route".to_string()));

        // A whole-server destination never widens an earlier queue scope.
        let compiled = compile(
            &[Criterion::destination("batch"), Criterion::destination("@server")],
            Permission::USER,
            &table,
        )
        .unwrap();
        assert_eq!(compiled.scope, Scope::Queue("batch".to_string()));
    }

    #[test]
    fn unknown_queue_fails() {
        let err = compile(
            &[
                Criterion::new("Priority", Op::Eq, "1"),
                Criterion::destination("nowhere"),
            ],
            Permission::USER,
            &table(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownQueue);
        assert_eq!(err.criterion_index(), Some(2));
    }

    #[test]
    fn unknown_attribute_reports_position() {
        let err = compile(
            &[
                Criterion::destination("batch"),
                Criterion::new("Priority", Op::Eq, "1"),
                Criterion::new("Colour", Op::Eq, "blue"),
            ],
            Permission::USER,
            &table(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownAttribute);
        assert_eq!(err.criterion_index(), Some(3));
    }

    #[test]
    fn unreadable_attribute_is_permission_denied() {
        let criteria = [Criterion::new("euser", Op::Eq, "alice")];
        let err = compile(&criteria, Permission::USER, &table()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
        assert!(compile(&criteria, Permission::OPERATOR, &table()).is_ok());
    }

    #[test]
    fn empty_value_is_invalid() {
        let err = compile(&[Criterion::new("Job_Name", Op::Eq, "")], Permission::USER, &table())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidAttributeValue);
        assert_eq!(err.criterion_index(), Some(1));
    }

    #[test]
    fn equality_only_attribute_rejects_ordering_ops() {
        let err = compile(&[Criterion::new("job_state", Op::Gt, "Q")], Permission::USER, &table())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
        assert!(compile(&[Criterion::new("job_state", Op::Ne, "Q")], Permission::USER, &table())
            .is_ok());
    }

    #[test]
    fn unknown_resource_fails() {
        let err = compile(
            &[Criterion::resource("Resource_List", "gpus_of_doom", Op::Eq, "1")],
            Permission::USER,
            &table(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownResource);
    }
}
