//! Worker tasks and the handle that owns their lifecycle.
//!
//! Each worker pulls [`WorkItem`]s from its own bounded queue, applies the
//! pool's [`Transform`], answers on the item's reply channel, and reports its
//! own [`WorkerId`] on the shared completion channel. Workers never see their
//! pending count; only the balancer does.

use crate::{Error, Result, Transform, WorkItem, WorkerId};
use core::time::Duration;
use std::sync::Arc;
use tokio::{sync::mpsc, task::JoinHandle, time::timeout};
use tokio_util::sync::CancellationToken;

/// What a worker reports on the shared completion channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum WorkerEvent {
    /// One request was answered, successfully or not. The balancer lowers the
    /// worker's pending count and re-sorts it.
    Completed(WorkerId),
    /// The worker's task is unwinding from a panic. Its queue is about to
    /// close and its pending requests will never complete, so the balancer
    /// stops.
    Terminated(WorkerId),
}

/// Sends [`WorkerEvent::Terminated`] if the worker task unwinds.
struct TerminationGuard {
    worker: WorkerId,
    done: mpsc::UnboundedSender<WorkerEvent>,
}

impl Drop for TerminationGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            let _ = self.done.send(WorkerEvent::Terminated(self.worker));
        }
    }
}

/// Worker task body.
///
/// Pulls [`WorkItem`]s from the worker's own queue until the queue closes (the
/// balancer is gone and the queue is drained) or the pool's shutdown token is
/// cancelled. Meant to be spawned once per worker by [`Balancer::new`].
///
/// # Arguments
///
/// - `worker`: Handle of this worker in the balancer's load index, reported
///   back with every event.
/// - `inbound`: Bounded queue the balancer dispatches into. Its capacity is
///   the worker's backpressure limit.
/// - `done`: Completion channel shared by the whole pool.
/// - `transform`: The pool's shared transformation.
/// - `shutdown`: Cancelled by [`WorkerPool::shutdown`].
///
/// # Events
///
/// - [`WorkerEvent::Completed`]: sent after every reply, including a failed
///   transformation, so the balancer never loses track of the worker's load.
/// - [`WorkerEvent::Terminated`]: sent while unwinding if the transformation
///   panics. The item being processed is dropped and its requester observes
///   [`Error::ReplyDropped`].
///
/// [`Balancer::new`]: crate::Balancer::new
pub(crate) async fn worker_loop<P, T>(
    worker: WorkerId,
    mut inbound: mpsc::Receiver<WorkItem<P, T::Output>>,
    done: mpsc::UnboundedSender<WorkerEvent>,
    transform: Arc<T>,
    shutdown: CancellationToken,
) where
    P: Send + 'static,
    T: Transform<P>,
{
    #[cfg(feature = "tracing")]
    tracing::debug!("Worker {worker} started");

    let guard = TerminationGuard { worker, done };

    loop {
        let item = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            item = inbound.recv() => match item {
                Some(item) => item,
                None => break,
            },
        };

        let (payload, reply) = item.into_parts();
        let result = transform.apply(payload).map_err(Error::from);

        #[cfg(feature = "tracing")]
        {
            if let Err(e) = &result {
                tracing::debug!("Worker {worker} transformation failed: {e}");
            }
        }

        if reply.send(result).is_err() {
            #[cfg(feature = "tracing")]
            tracing::debug!("Worker {worker} reply discarded, requester stopped waiting");
        }

        if guard.done.send(WorkerEvent::Completed(worker)).is_err() {
            // Keep draining what was already queued.
            #[cfg(feature = "tracing")]
            tracing::trace!("Worker {worker} completion unobserved, balancer stopped");
        }
    }

    #[cfg(feature = "tracing")]
    tracing::debug!("Worker {worker} stopped");
}

/// Owns the worker tasks spawned for a [`Balancer`].
///
/// Dropping the pool leaves the tasks running until their queues close. Call
/// [`WorkerPool::shutdown`] to stop them promptly.
///
/// [`Balancer`]: crate::Balancer
#[derive(Debug)]
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    shutdown_token: CancellationToken,
}

impl WorkerPool {
    pub(crate) const fn new(handles: Vec<JoinHandle<()>>, shutdown_token: CancellationToken) -> Self {
        Self {
            handles,
            shutdown_token,
        }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Stops every worker and waits up to `per_worker` for each to finish.
    ///
    /// Work still queued when the token is cancelled is dropped, and its
    /// requesters observe [`Error::ReplyDropped`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShutdownIncomplete`] if any worker panicked earlier or
    /// failed to stop in time.
    pub async fn shutdown(self, per_worker: Duration) -> Result<()> {
        #[cfg(feature = "tracing")]
        tracing::info!("Shutting down {} workers", self.handles.len());
        self.shutdown_token.cancel();

        let waits = self
            .handles
            .into_iter()
            .enumerate()
            .map(|(_i, handle)| async move {
                match timeout(per_worker, handle).await {
                    Ok(Ok(())) => {
                        #[cfg(feature = "tracing")]
                        tracing::trace!("Worker #{_i} shutdown acknowledged");
                        true
                    }
                    Ok(Err(_e)) => {
                        #[cfg(feature = "tracing")]
                        tracing::error!("Worker #{_i} terminated abnormally: {_e}");
                        false
                    }
                    Err(_) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!("Worker #{_i} shutdown timed out");
                        false
                    }
                }
            });

        let stragglers = futures::future::join_all(waits)
            .await
            .into_iter()
            .filter(|stopped| !stopped)
            .count();

        #[cfg(feature = "tracing")]
        tracing::info!("Worker pool shutdown complete");

        if stragglers == 0 {
            Ok(())
        } else {
            Err(Error::ShutdownIncomplete { stragglers })
        }
    }
}
