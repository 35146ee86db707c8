pub mod job;
pub mod queue;
pub mod seed;
pub mod table;

pub use job::{Job, JobId, JobState};
pub use queue::{Queue, QueueKind};
pub use table::{JobTable, Scope};
