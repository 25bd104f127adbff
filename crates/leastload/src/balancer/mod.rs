//! The coordinator that routes every request to the least-loaded worker.
//!
//! A [`Balancer`] owns the pool's [`LoadIndex`] and is the only task that ever
//! changes a worker's pending count. It waits on three event sources at once:
//!
//! - **requests** from [`Requester`]s, which it dispatches to the worker at the
//!   top of the index;
//! - **completions** from workers, which lower that worker's load and re-sort
//!   it, or report that the worker died, which stops the loop;
//! - **exits** from requesters, which end the loop once every known requester
//!   has signaled.
//!
//! Requests already dispatched when the loop ends keep running; the balancer
//! does not drain outstanding work before returning.

use crate::{
    Error, LoadIndex, PoolConfig, Requester, Result, Transform, WorkItem, WorkerId, WorkerPool,
    worker::{WorkerEvent, worker_loop},
};
use core::time::Duration;
use std::{sync::Arc, time::Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Single-writer coordinator over a fixed pool of workers.
///
/// Build it with [`Balancer::new`], hand out one [`Requester`] per producer
/// with [`Balancer::requester`], then drive it with [`Balancer::run`].
/// Registration ends when `run` takes ownership, so the set of known
/// requesters is fixed for the whole loop.
pub struct Balancer<P, R> {
    state: Dispatcher<P, R>,
    requests: mpsc::Receiver<WorkItem<P, R>>,
    request_tx: mpsc::Sender<WorkItem<P, R>>,
    done: mpsc::UnboundedReceiver<WorkerEvent>,
    exits: mpsc::UnboundedReceiver<usize>,
    exit_tx: mpsc::UnboundedSender<usize>,
    requesters: usize,
}

impl<P, R> Balancer<P, R>
where
    P: Send + 'static,
    R: Send + 'static,
{
    /// Spawns `config.num_workers` worker tasks sharing `transform` and
    /// returns the balancer together with the pool that owns those tasks.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the configuration is rejected.
    pub fn new<T>(config: PoolConfig, transform: T) -> Result<(Self, WorkerPool)>
    where
        T: Transform<P, Output = R>,
    {
        config.validate()?;

        let transform = Arc::new(transform);
        let shutdown_token = CancellationToken::new();
        // Completions are bounded by the total pending count, so an unbounded
        // channel never grows past what was dispatched. A bounded one could
        // deadlock against a dispatch blocked on a full worker queue.
        let (done_tx, done) = mpsc::unbounded_channel();

        let mut queues = Vec::with_capacity(config.num_workers);
        let mut handles = Vec::with_capacity(config.num_workers);
        for i in 0..config.num_workers {
            let (tx, rx) = mpsc::channel(config.queue_capacity);
            queues.push(tx);
            handles.push(tokio::spawn(worker_loop(
                WorkerId::new(i),
                rx,
                done_tx.clone(),
                Arc::clone(&transform),
                shutdown_token.clone(),
            )));
        }

        let (request_tx, requests) = mpsc::channel(config.request_buffer);
        let (exit_tx, exits) = mpsc::unbounded_channel();

        #[cfg(feature = "tracing")]
        tracing::debug!(
            "Spawned {} workers (queue capacity {})",
            config.num_workers,
            config.queue_capacity
        );

        let balancer = Self {
            state: Dispatcher::new(queues),
            requests,
            request_tx,
            done,
            exits,
            exit_tx,
            requesters: 0,
        };
        Ok((balancer, WorkerPool::new(handles, shutdown_token)))
    }

    /// Registers a new producer and returns its handle.
    pub fn requester(&mut self) -> Requester<P, R> {
        let id = self.requesters;
        self.requesters += 1;
        Requester::new(id, self.request_tx.clone(), self.exit_tx.clone())
    }

    /// Number of requesters registered so far.
    pub const fn requesters(&self) -> usize {
        self.requesters
    }

    /// Number of workers spawned by [`Balancer::new`].
    pub fn pool_size(&self) -> usize {
        self.state.index.pool_size()
    }

    /// Runs the control loop until every registered requester has exited.
    ///
    /// The three event sources share one wait point. When several are ready
    /// at once the branch is picked at random, so none of them can starve the
    /// others.
    ///
    /// # Errors
    ///
    /// Stops on the first fatal condition: [`Error::WorkerTerminated`] as soon
    /// as any worker panics or is found with a closed queue,
    /// [`Error::EmptyPool`], [`Error::LoadUnderflow`] or a load index contract
    /// violation. Requesters still holding a handle then see
    /// [`Error::ServiceShutdown`] on their next submission.
    pub async fn run(self) -> Result<BalanceReport> {
        let Self {
            mut state,
            mut requests,
            request_tx,
            mut done,
            mut exits,
            exit_tx,
            requesters,
        } = self;
        // Only requester handles may keep these channels open.
        drop(request_tx);
        drop(exit_tx);

        #[cfg(feature = "tracing")]
        tracing::info!(
            "Balancing {requesters} requesters across {} workers",
            state.index.pool_size()
        );

        let start = Instant::now();
        let mut exited = 0;

        while exited < requesters {
            let step = tokio::select! {
                Some(item) = requests.recv() => state.dispatch(item).await,
                Some(event) = done.recv() => state.worker_event(event),
                Some(_requester) = exits.recv() => {
                    exited += 1;
                    #[cfg(feature = "tracing")]
                    tracing::debug!("Requester {_requester} exited ({exited}/{requesters})");
                    Ok(())
                }
                else => Err(Error::ChannelError {
                    context: "every event source closed before all requesters exited".to_string(),
                }),
            };

            if let Err(e) = step {
                #[cfg(feature = "tracing")]
                tracing::error!("Balancer stopped: {e}");
                return Err(e);
            }
        }

        let report = state.into_report(exited, start.elapsed());

        #[cfg(feature = "tracing")]
        tracing::info!(
            "Balancer finished in {:?}: {} dispatched, {} completed, {} in flight",
            report.elapsed,
            report.total_dispatched(),
            report.total_completed(),
            report.in_flight()
        );

        Ok(report)
    }
}

/// State the control loop mutates: the index, the worker queues and the
/// per-worker counters.
struct Dispatcher<P, R> {
    index: LoadIndex,
    queues: Vec<mpsc::Sender<WorkItem<P, R>>>,
    dispatched: Vec<u64>,
    completed: Vec<u64>,
}

impl<P, R> Dispatcher<P, R> {
    fn new(queues: Vec<mpsc::Sender<WorkItem<P, R>>>) -> Self {
        let n = queues.len();
        Self {
            index: LoadIndex::with_workers(n),
            queues,
            dispatched: vec![0; n],
            completed: vec![0; n],
        }
    }

    /// Hands `item` to the least-loaded worker and charges it one request.
    ///
    /// Awaits while that worker's queue is full, which stalls the whole loop
    /// and pushes back on every requester.
    async fn dispatch(&mut self, item: WorkItem<P, R>) -> Result<()> {
        let worker = self.index.extract_min().ok_or(Error::EmptyPool)?;

        if self.queues[worker.index()].send(item).await.is_err() {
            self.index.insert(worker)?;
            return Err(Error::WorkerTerminated { worker });
        }

        let _pending = self.index.increment(worker)?;
        self.index.insert(worker)?;
        self.dispatched[worker.index()] += 1;

        #[cfg(feature = "tracing")]
        {
            tracing::trace!("Dispatched to worker {worker} (pending {_pending})");
            tracing::trace!("Loads: {}", self.index.stats());
        }
        Ok(())
    }

    fn worker_event(&mut self, event: WorkerEvent) -> Result<()> {
        match event {
            WorkerEvent::Completed(worker) => self.completed(worker),
            // Its pending requests can never complete and it is not respawned.
            WorkerEvent::Terminated(worker) => Err(Error::WorkerTerminated { worker }),
        }
    }

    /// Retires one request from `worker` and re-sorts it at its lower load.
    fn completed(&mut self, worker: WorkerId) -> Result<()> {
        if !self.index.remove(worker)? {
            return Err(Error::UnknownWorker { worker });
        }
        let pending = self.index.decrement(worker);
        self.index.insert(worker)?;
        let _pending = pending?;
        self.completed[worker.index()] += 1;

        #[cfg(feature = "tracing")]
        {
            tracing::trace!("Worker {worker} completed (pending {_pending})");
            tracing::trace!("Loads: {}", self.index.stats());
        }
        Ok(())
    }

    fn into_report(self, exits: usize, elapsed: Duration) -> BalanceReport {
        BalanceReport {
            index: self.index,
            dispatched: self.dispatched,
            completed: self.completed,
            exits,
            elapsed,
        }
    }
}

/// What the balancer observed by the time its loop ended.
///
/// Only produced by a clean run. The per-worker counters always satisfy
/// `dispatched[i] - completed[i]` equal to that worker's pending count in
/// `index`; any difference left at
/// the end is work still running on the pool.
#[derive(Clone, Debug)]
pub struct BalanceReport {
    /// The load index as the loop left it. Every worker is present, so its
    /// [`LoadIndex::stats`] describe the final distribution of load.
    pub index: LoadIndex,
    /// Requests dispatched to each worker, by [`WorkerId::index`].
    pub dispatched: Vec<u64>,
    /// Completions processed for each worker, by [`WorkerId::index`].
    pub completed: Vec<u64>,
    /// Exit signals observed. Equal to the number of registered requesters.
    pub exits: usize,
    /// Wall time from the first wait until the last exit.
    pub elapsed: Duration,
}

impl BalanceReport {
    /// Requests handed to any worker during the run.
    pub fn total_dispatched(&self) -> u64 {
        self.dispatched.iter().sum()
    }

    /// Completions the balancer processed before its loop ended.
    pub fn total_completed(&self) -> u64 {
        self.completed.iter().sum()
    }

    /// Requests dispatched but not yet reported complete.
    pub fn in_flight(&self) -> usize {
        self.index.total_pending()
    }
}
