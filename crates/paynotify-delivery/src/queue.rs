//! Bounded multi-producer, multi-consumer job queue.
//!
//! Producers never wait: [`JobQueue::submit`] either enqueues immediately or
//! ends the job on the spot through its callback. Consumers share a single
//! receiver, so each job reaches exactly one worker. No ordering is promised
//! across workers.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use crate::{error::DeliveryError, job::DeliveryJob, stats::StatsRecorder};

/// Producer side of the queue.
#[derive(Clone)]
pub(crate) struct JobQueue {
    sender: mpsc::Sender<DeliveryJob>,
    capacity: usize,
    stats: Arc<StatsRecorder>,
}

/// Consumer side of the queue, shared by all workers.
#[derive(Clone)]
pub(crate) struct JobReceiver {
    inner: Arc<Mutex<mpsc::Receiver<DeliveryJob>>>,
}

impl JobQueue {
    /// Creates a queue holding at most `capacity` jobs.
    pub(crate) fn bounded(capacity: usize, stats: Arc<StatsRecorder>) -> (Self, JobReceiver) {
        let (sender, receiver) = mpsc::channel(capacity);
        (
            Self { sender, capacity, stats },
            JobReceiver { inner: Arc::new(Mutex::new(receiver)) },
        )
    }

    /// Enqueues `job` without blocking.
    ///
    /// A full queue ends the job with `QueueFull`; a closed queue ends it with
    /// `ShutdownRequested`. Either way the callback runs before this returns.
    pub(crate) fn submit(&self, job: DeliveryJob) {
        match self.sender.try_send(job) {
            Ok(()) => self.stats.record_submitted(),
            Err(mpsc::error::TrySendError::Full(job)) => {
                self.stats.record_rejected();
                warn!(
                    job_id = %job.id(),
                    payment = %job.payment(),
                    capacity = self.capacity,
                    "webhook queue full, dropping job"
                );
                job.complete(Err(DeliveryError::QueueFull { capacity: self.capacity }));
            },
            Err(mpsc::error::TrySendError::Closed(job)) => {
                self.stats.record_rejected();
                debug!(job_id = %job.id(), "webhook queue closed, dropping job");
                job.complete(Err(DeliveryError::ShutdownRequested));
            },
        }
    }

    /// Number of jobs currently waiting.
    pub(crate) fn len(&self) -> usize {
        self.capacity.saturating_sub(self.sender.capacity())
    }
}

impl JobReceiver {
    /// Waits for the next job; `None` once the queue is closed and empty.
    ///
    /// Cancel safe: dropping the future never loses a job.
    pub(crate) async fn recv(&self) -> Option<DeliveryJob> {
        self.inner.lock().await.recv().await
    }

    /// Closes the queue to producers and takes whatever is still buffered.
    pub(crate) async fn close_and_drain(&self) -> Vec<DeliveryJob> {
        let mut receiver = self.inner.lock().await;
        receiver.close();

        let mut remaining = Vec::new();
        while let Ok(job) = receiver.try_recv() {
            remaining.push(job);
        }
        remaining
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use paynotify_core::{GatewayResponse, PaymentReference};

    use super::*;

    fn job(page: &str) -> DeliveryJob {
        DeliveryJob::new(
            PaymentReference::new("merchant-1", page, "rvc-1"),
            GatewayResponse::default(),
        )
    }

    #[tokio::test]
    async fn full_queue_rejects_synchronously() {
        let stats = Arc::new(StatsRecorder::default());
        let (queue, _receiver) = JobQueue::bounded(2, stats.clone());

        queue.submit(job("a"));
        queue.submit(job("b"));

        let rejected = Arc::new(AtomicBool::new(false));
        let flag = rejected.clone();
        queue.submit(job("c").on_complete(move |outcome| {
            assert_eq!(outcome, Err(DeliveryError::QueueFull { capacity: 2 }));
            flag.store(true, Ordering::SeqCst);
        }));

        assert!(rejected.load(Ordering::SeqCst), "callback must fire before submit returns");
        assert_eq!(queue.len(), 2);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.submitted, 2);
        assert_eq!(snapshot.rejected, 1);
    }

    #[tokio::test]
    async fn each_job_received_once() {
        let (queue, receiver) = JobQueue::bounded(4, Arc::new(StatsRecorder::default()));
        let first = job("a");
        let second = job("b");
        let ids = [first.id(), second.id()];

        queue.submit(first);
        queue.submit(second);

        let mut received = vec![
            receiver.recv().await.unwrap().id(),
            receiver.clone().recv().await.unwrap().id(),
        ];
        received.sort();
        let mut expected = ids.to_vec();
        expected.sort();

        assert_eq!(received, expected);
        assert_eq!(queue.len(), 0);
    }

    #[tokio::test]
    async fn closed_queue_ends_jobs_with_shutdown() {
        let (queue, receiver) = JobQueue::bounded(4, Arc::new(StatsRecorder::default()));
        queue.submit(job("queued"));

        let drained = receiver.close_and_drain().await;
        assert_eq!(drained.len(), 1);

        let (late, outcome) = job("late").with_completion_channel();
        queue.submit(late);

        assert_eq!(outcome.await.unwrap(), Err(DeliveryError::ShutdownRequested));
    }
}
