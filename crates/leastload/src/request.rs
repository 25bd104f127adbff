//! Request envelopes and the requester-side handle.
//!
//! A [`WorkItem`] carries a payload and the single-use reply channel its
//! requester is waiting on. Items are created by a [`Requester`], travel through
//! the balancer to exactly one worker, and are consumed there.

use crate::{Error, Result};
use core::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Single-use channel on which a worker answers one request.
pub type Reply<R> = oneshot::Sender<Result<R>>;

/// An immutable request: a payload plus the channel to answer it on.
///
/// Ownership moves from requester to balancer to worker; the worker consumes
/// it and writes the reply exactly once.
#[derive(Debug)]
pub struct WorkItem<P, R> {
    payload: P,
    reply: Reply<R>,
}

impl<P, R> WorkItem<P, R> {
    /// Creates an item and the receiver its requester should wait on.
    pub fn new(payload: P) -> (Self, oneshot::Receiver<Result<R>>) {
        let (reply, rx) = oneshot::channel();
        (Self { payload, reply }, rx)
    }

    pub fn payload(&self) -> &P {
        &self.payload
    }

    pub(crate) fn into_parts(self) -> (P, Reply<R>) {
        (self.payload, self.reply)
    }
}

/// A producer's handle onto the balancer.
///
/// Each handle counts as one known requester. The balancer stops once every
/// handle has signaled exit, either through [`Requester::exit`] or by being
/// dropped, so the signal is sent exactly once per handle.
#[derive(Debug)]
pub struct Requester<P, R> {
    id: usize,
    requests: mpsc::Sender<WorkItem<P, R>>,
    exit: Option<mpsc::UnboundedSender<usize>>,
}

impl<P, R> Requester<P, R> {
    pub(crate) const fn new(
        id: usize,
        requests: mpsc::Sender<WorkItem<P, R>>,
        exit: mpsc::UnboundedSender<usize>,
    ) -> Self {
        Self {
            id,
            requests,
            exit: Some(exit),
        }
    }

    /// Index of this requester, in registration order.
    pub const fn id(&self) -> usize {
        self.id
    }

    /// Submits `payload` and waits for its single reply.
    ///
    /// Blocks while the request channel is full, which is how backpressure
    /// from saturated workers reaches producers.
    ///
    /// # Errors
    ///
    /// - [`Error::ServiceShutdown`] if the balancer has already stopped.
    /// - [`Error::Transform`] if the transformation rejected the payload.
    /// - [`Error::ReplyDropped`] if the request was lost before a reply.
    pub async fn submit(&self, payload: P) -> Result<R> {
        let reply = self.send(payload).await?;
        reply.await.map_err(|_| Error::ReplyDropped)?
    }

    /// Like [`Requester::submit`], but gives up on the reply after `after`.
    ///
    /// The request itself is not withdrawn; its worker still processes it and
    /// the late reply is discarded.
    ///
    /// # Errors
    ///
    /// Everything [`Requester::submit`] returns, plus [`Error::Timeout`].
    pub async fn submit_timeout(&self, payload: P, after: Duration) -> Result<R> {
        let reply = self.send(payload).await?;
        match tokio::time::timeout(after, reply).await {
            Ok(reply) => reply.map_err(|_| Error::ReplyDropped)?,
            Err(_) => Err(Error::Timeout { after }),
        }
    }

    /// Signals that this requester will submit nothing more.
    pub fn exit(self) {}

    async fn send(&self, payload: P) -> Result<oneshot::Receiver<Result<R>>> {
        let (item, reply) = WorkItem::new(payload);
        self.requests
            .send(item)
            .await
            .map_err(|_| Error::ServiceShutdown)?;
        Ok(reply)
    }
}

impl<P, R> Drop for Requester<P, R> {
    fn drop(&mut self) {
        if let Some(exit) = self.exit.take() {
            // A closed channel means the balancer is gone and no longer counts.
            let _ = exit.send(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn exit_is_signaled_once_per_handle() {
        let (tx, _rx) = mpsc::channel::<WorkItem<u8, u8>>(1);
        let (exit_tx, mut exit_rx) = mpsc::unbounded_channel();

        Requester::new(0, tx.clone(), exit_tx.clone()).exit();
        drop(Requester::new(1, tx, exit_tx.clone()));
        drop(exit_tx);

        assert_eq!(exit_rx.recv().await, Some(0));
        assert_eq!(exit_rx.recv().await, Some(1));
        assert_eq!(exit_rx.recv().await, None);
    }

    #[tokio::test]
    async fn submit_after_shutdown_fails_fast() {
        let (tx, rx) = mpsc::channel::<WorkItem<u8, u8>>(1);
        let (exit_tx, _exit_rx) = mpsc::unbounded_channel();
        drop(rx);

        let requester = Requester::new(0, tx, exit_tx);
        assert_eq!(requester.submit(1).await, Err(Error::ServiceShutdown));
    }

    #[tokio::test]
    async fn dropped_item_reports_lost_reply() {
        let (tx, mut rx) = mpsc::channel::<WorkItem<u8, u8>>(1);
        let (exit_tx, _exit_rx) = mpsc::unbounded_channel();
        let requester = Requester::new(0, tx, exit_tx);

        let consumer = tokio::spawn(async move {
            let item = rx.recv().await.unwrap();
            assert_eq!(*item.payload(), 7);
        });

        assert_eq!(requester.submit(7).await, Err(Error::ReplyDropped));
        consumer.await.unwrap();
    }

    #[tokio::test]
    async fn item_reply_reaches_its_requester() {
        let (item, rx) = WorkItem::<u8, u16>::new(21);
        let (payload, reply) = item.into_parts();
        reply.send(Ok(u16::from(payload) * 2)).unwrap();
        assert_eq!(rx.await.unwrap(), Ok(42));
    }
}
