//! Job selection: compile a criteria list, match it against jobs, and answer
//! select / select-status requests.
//!
//! # Components
//!
//! - [`compile`]: criteria to a typed predicate chain plus query scope
//! - [`evaluate`]: `matches(job, chain)` and the operator table
//! - [`controller`]: [`SelectEngine`], the two-phase scan that refreshes
//!   stale running jobs before building the reply
//! - [`status`]: per-job status records for select-status replies
//!
//! # Request Flow
//!
//! 1. [`compile::compile`] validates every criterion; the first bad one
//!    rejects the request with its 1-based index
//! 2. Select-status only: scan the scope for matching running jobs whose
//!    status is stale, refreshing one at a time and rescanning after each
//! 3. Scan the scope again and build the reply

pub mod compile;
pub mod controller;
pub mod evaluate;
pub mod status;

pub use compile::{compile, CompiledSelect, Criterion, Op, SelectList, SelectPredicate};
pub use controller::{QueryKind, Reply, Requester, Role, SelectEngine, SelectRequest};
pub use evaluate::matches;
pub use status::{AttributeStatusFormatter, StatusFormatter, StatusRecord};
