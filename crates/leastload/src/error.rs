//! Error types for the dispatcher.
//!
//! This module defines the central [`Error`] enum, covering every failure a
//! requester, the balancer, or the worker pool can surface.
//!
//! ## Error Cases
//! - `ChannelError`: An internal channel closed while a task still needed it.
//! - `ServiceShutdown`: A request arrived after the balancer stopped.
//! - `Transform`: The payload transformation failed; delivered as the reply.
//! - `ReplyDropped`: A reply channel was dropped without being written.
//! - `WorkerTerminated`: A worker panicked or its inbound queue was found closed.
//! - `EmptyPool`: Extract-min on an empty load index (state corruption).
//! - `LoadUnderflow`: A completion arrived for a worker with nothing pending.
//! - `AlreadyIndexed` / `UnknownWorker`: Load index contract violations.
//! - `Timeout`: The requester's reply deadline expired.
//! - `InvalidConfig`: The pool configuration was rejected.
//! - `ShutdownIncomplete`: Workers failed to stop within the timeout.

use crate::{index::WorkerId, transform::TransformError};
use core::time::Duration;

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the dispatcher.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// Internal channel send/receive failure.
    #[error("Channel error: {context}")]
    ChannelError { context: String },

    /// The balancer has exited and no longer accepts requests.
    #[error("Balancer is shut down")]
    ServiceShutdown,

    /// The transformation function rejected the payload.
    #[error("Transformation failed: {0}")]
    Transform(#[from] TransformError),

    /// The request was dropped before any worker replied to it, either because
    /// its worker terminated or because the balancer stopped first.
    #[error("Request dropped before a reply was sent")]
    ReplyDropped,

    /// A worker terminated abnormally: it reported a panic on the completion
    /// channel, or its inbound queue was closed when the balancer dispatched
    /// to it. Workers are never respawned, so this stops the balancer.
    #[error("Worker {worker} terminated")]
    WorkerTerminated { worker: WorkerId },

    /// The load index was empty when a worker had to be selected.
    #[error("Load index is empty")]
    EmptyPool,

    /// A completion was reported for a worker with no pending requests.
    #[error("Worker {worker} reported completion with no pending requests")]
    LoadUnderflow { worker: WorkerId },

    /// The worker is already present in the load index.
    #[error("Worker {worker} is already indexed")]
    AlreadyIndexed { worker: WorkerId },

    /// The handle does not belong to this pool.
    #[error("Unknown worker {worker}")]
    UnknownWorker { worker: WorkerId },

    /// No reply arrived before the requester's deadline.
    #[error("No reply after {after:?}")]
    Timeout { after: Duration },

    /// The pool configuration was rejected.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// Some workers did not stop within the shutdown timeout.
    #[error("{stragglers} worker(s) did not stop cleanly")]
    ShutdownIncomplete { stragglers: usize },
}

impl Error {
    /// Whether this error means the balancer's state can no longer be trusted.
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::EmptyPool
                | Self::LoadUnderflow { .. }
                | Self::WorkerTerminated { .. }
                | Self::AlreadyIndexed { .. }
                | Self::UnknownWorker { .. }
        )
    }
}
