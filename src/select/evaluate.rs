use std::cmp::Ordering;

use crate::attribute::{acl, AttrValue, JobAttr};
use crate::scheduler::Job;
use crate::select::compile::{Op, SelectList, SelectPredicate};

impl Op {
    /// Whether a three-way comparison outcome satisfies this operator.
    pub fn accepts(self, ord: Ordering) -> bool {
        match ord {
            Ordering::Less => matches!(self, Op::Ne | Op::Lt | Op::Le),
            Ordering::Equal => matches!(self, Op::Eq | Op::Ge | Op::Le),
            Ordering::Greater => matches!(self, Op::Ne | Op::Gt | Op::Ge),
        }
    }
}

/// True iff `job` satisfies every predicate in `chain`. Stops at the first miss.
pub fn matches(job: &Job, chain: &SelectList) -> bool {
    chain.iter().all(|predicate| predicate_matches(job, predicate))
}

fn predicate_matches(job: &Job, predicate: &SelectPredicate) -> bool {
    if predicate.attr == JobAttr::UserList {
        return match &predicate.value {
            AttrValue::Acl(entries) => acl::acl_check(entries, &job.owner),
            _ => false,
        };
    }
    predicate.op.accepts(compare(job, predicate))
}

fn compare(job: &Job, predicate: &SelectPredicate) -> Ordering {
    let job_value = job.attr(predicate.attr);

    match predicate.resource {
        Some(rdef) => {
            let wanted = predicate.value.find_resource(rdef);
            let held = job_value.as_deref().and_then(|v| v.find_resource(rdef));
            match (held, wanted) {
                (Some(held), Some(wanted)) => rdef.compare(&held.value, &wanted.value),
                // A job without the resource sorts below any requested amount
                _ => Ordering::Less,
            }
        }
        None => predicate.def.compare(job_value.as_deref(), &predicate.value),
    }
}
