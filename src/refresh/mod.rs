//! Remote status refresh for running jobs.
//!
//! A select-status query that finds a running job whose cached status is
//! older than `job_stat_rate` asks the job's execution host for a fresh one
//! before answering. This module is the hand-off point:
//!
//! - [`RemoteStatusGate`]: what the select engine calls. It either hands back
//!   a [`RefreshTicket`] to await, or fails immediately.
//! - [`ChannelStatusGate`]: the gate used by the node. Requests go over a
//!   bounded channel to a [`RefreshWorker`].
//! - [`RefreshWorker`]: drains the channel, asks a [`StatusAgent`] for each
//!   job's live status and writes it back into the table.
//!
//! # Flow
//!
//! 1. Engine calls [`RemoteStatusGate::request_refresh`] with no locks held
//! 2. Gate queues a [`RefreshRequest`] and returns [`RefreshTicket::Pending`]
//! 3. Worker fetches the report and applies it under the job's lock
//! 4. Worker completes the ticket with a [`RefreshOutcome`]
//! 5. Engine resumes its scan

pub mod agent;
pub mod worker;

pub use agent::{AgentError, AgentReport, LoopbackAgent, StatusAgent};
pub use worker::RefreshWorker;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::scheduler::JobId;

/// How a refresh ended, as reported back to the waiting query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The job's status was replaced and its refresh timestamp advanced.
    Refreshed,
    /// The agent could not be reached or did not know the job. The job is
    /// left as it was.
    Failed(String),
}

/// What a successfully issued refresh hands back.
#[derive(Debug)]
pub enum RefreshTicket {
    /// Refresh is in flight; the receiver completes when it is done.
    Pending(oneshot::Receiver<RefreshOutcome>),
    /// Nothing to wait for; the cached status can be used as is.
    Ready,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    /// No room to queue the refresh. Fatal to the query that asked.
    #[error("Refresh queue exhausted: {0}")]
    OutOfMemory(String),

    /// The refresh path is gone (worker stopped). The job is skipped.
    #[error("Refresh unavailable: {0}")]
    Unavailable(String),
}

/// Issues status refreshes on behalf of the select engine.
///
/// Must not block: the caller is in the middle of a scan and only awaits the
/// returned ticket after its own locks are gone.
pub trait RemoteStatusGate: Send + Sync {
    fn request_refresh(&self, job_id: &JobId) -> Result<RefreshTicket, RefreshError>;
}

/// One queued refresh.
#[derive(Debug)]
pub struct RefreshRequest {
    pub job_id: JobId,
    pub reply: oneshot::Sender<RefreshOutcome>,
}

/// Gate that queues refreshes for a [`RefreshWorker`] on a bounded channel.
#[derive(Debug, Clone)]
pub struct ChannelStatusGate {
    tx: mpsc::Sender<RefreshRequest>,
}

impl ChannelStatusGate {
    pub fn new(tx: mpsc::Sender<RefreshRequest>) -> Self {
        Self { tx }
    }
}

/// Create a gate and the receiving end a [`RefreshWorker`] consumes.
pub fn channel(depth: usize) -> (ChannelStatusGate, mpsc::Receiver<RefreshRequest>) {
    let (tx, rx) = mpsc::channel(depth.max(1));
    (ChannelStatusGate::new(tx), rx)
}

impl RemoteStatusGate for ChannelStatusGate {
    fn request_refresh(&self, job_id: &JobId) -> Result<RefreshTicket, RefreshError> {
        let (reply, rx) = oneshot::channel();
        let request = RefreshRequest {
            job_id: job_id.clone(),
            reply,
        };
        match self.tx.try_send(request) {
            Ok(()) => {
                tracing::debug!(job_id = %job_id, "Refresh queued");
                Ok(RefreshTicket::Pending(rx))
            }
            Err(mpsc::error::TrySendError::Full(_)) => Err(RefreshError::OutOfMemory(format!(
                "refresh queue full ({} slots)",
                self.tx.max_capacity()
            ))),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(RefreshError::Unavailable(
                "refresh worker stopped".to_string(),
            )),
        }
    }
}

/// Gate for servers that poll execution hosts on their own: every job's
/// cached status is taken as current.
#[derive(Debug, Clone, Copy, Default)]
pub struct CachedStatusGate;

impl RemoteStatusGate for CachedStatusGate {
    fn request_refresh(&self, _job_id: &JobId) -> Result<RefreshTicket, RefreshError> {
        Ok(RefreshTicket::Ready)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queued_request_carries_job_id() {
        let (gate, mut rx) = channel(4);
        let ticket = gate.request_refresh(&JobId::from("1.s")).unwrap();
        assert!(matches!(ticket, RefreshTicket::Pending(_)));
        let request = rx.try_recv().unwrap();
        assert_eq!(request.job_id, JobId::from("1.s"));
    }

    #[test]
    fn full_queue_is_out_of_memory() {
        let (gate, _rx) = channel(1);
        gate.request_refresh(&JobId::from("1.s")).unwrap();
        let err = gate.request_refresh(&JobId::from("2.s")).unwrap_err();
        assert!(matches!(err, RefreshError::OutOfMemory(_)));
    }

    #[test]
    fn closed_queue_is_unavailable() {
        let (gate, rx) = channel(1);
        drop(rx);
        let err = gate.request_refresh(&JobId::from("1.s")).unwrap_err();
        assert!(matches!(err, RefreshError::Unavailable(_)));
    }

    #[tokio::test]
    async fn ticket_completes_with_worker_outcome() {
        let (gate, mut rx) = channel(1);
        let RefreshTicket::Pending(ticket) = gate.request_refresh(&JobId::from("1.s")).unwrap()
        else {
            panic!("expected a pending ticket");
        };
        let request = rx.recv().await.unwrap();
        request.reply.send(RefreshOutcome::Refreshed).unwrap();
        assert_eq!(ticket.await.unwrap(), RefreshOutcome::Refreshed);
    }

    #[test]
    fn cached_gate_never_waits() {
        let ticket = CachedStatusGate.request_refresh(&JobId::from("1.s")).unwrap();
        assert!(matches!(ticket, RefreshTicket::Ready));
    }
}
