//! Retry timers that resubmit failed jobs after their backoff delay.
//!
//! Each scheduled retry is a tracked task that sleeps without holding a
//! worker, then hands the job back to the queue with its attempt counter
//! incremented. The number of armed timers is bounded by a semaphore; a job
//! that finds no free slot ends with `RetryCapacityExceeded` instead of
//! growing the timer set without limit.
//!
//! Shutdown cancels every armed timer and ends its job with
//! `ShutdownRequested`, so no resubmission can happen after the engine has
//! stopped.

use std::{sync::Arc, time::Duration};

use tokio::sync::Semaphore;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, info, warn};

use crate::{error::DeliveryError, job::DeliveryJob, queue::JobQueue, stats::StatsRecorder};

#[derive(Clone)]
pub(crate) struct RetryScheduler {
    queue: JobQueue,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    slots: Arc<Semaphore>,
    limit: usize,
    stats: Arc<StatsRecorder>,
}

impl RetryScheduler {
    pub(crate) fn new(queue: JobQueue, limit: usize, stats: Arc<StatsRecorder>) -> Self {
        Self {
            queue,
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
            slots: Arc::new(Semaphore::new(limit)),
            limit,
            stats,
        }
    }

    /// Arms a timer that resubmits `job` at its next attempt after `delay`.
    ///
    /// Returns without waiting. Jobs that cannot be scheduled are completed
    /// here: `ShutdownRequested` after shutdown, `RetryCapacityExceeded` when
    /// every slot is taken.
    pub(crate) fn schedule(&self, job: DeliveryJob, delay: Duration) {
        if self.shutdown.is_cancelled() {
            job.complete(Err(DeliveryError::ShutdownRequested));
            return;
        }

        let Ok(slot) = Arc::clone(&self.slots).try_acquire_owned() else {
            warn!(
                job_id = %job.id(),
                limit = self.limit,
                "retry capacity exhausted, dropping job"
            );
            job.complete(Err(DeliveryError::RetryCapacityExceeded { limit: self.limit }));
            return;
        };

        debug!(
            job_id = %job.id(),
            next_attempt = job.attempt().saturating_add(1),
            delay_ms = delay.as_millis(),
            "retry scheduled"
        );
        self.stats.retry_armed();

        let queue = self.queue.clone();
        let shutdown = self.shutdown.clone();
        let stats = Arc::clone(&self.stats);

        self.tracker.spawn(async move {
            let fired = tokio::select! {
                biased;
                () = shutdown.cancelled() => false,
                () = tokio::time::sleep(delay) => true,
            };
            stats.retry_disarmed();
            drop(slot);

            if !fired {
                job.complete(Err(DeliveryError::ShutdownRequested));
                return;
            }

            if let Some(reason) = job.abandonment() {
                debug!(job_id = %job.id(), reason = %reason, "retry abandoned before resubmission");
                job.complete(Err(reason));
                return;
            }

            queue.submit(job.next_attempt());
        });
    }

    /// Cancels all armed timers and waits until each has completed its job.
    pub(crate) async fn shutdown(&self) {
        let pending = self.tracker.len();
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;

        info!(cancelled_retries = pending, "retry scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use paynotify_core::{GatewayResponse, PaymentReference};
    use tokio_util::sync::CancellationToken;

    use super::*;

    fn job() -> DeliveryJob {
        DeliveryJob::new(
            PaymentReference::new("merchant-1", "page-1", "rvc-1"),
            GatewayResponse::default(),
        )
    }

    fn scheduler(limit: usize) -> (RetryScheduler, crate::queue::JobReceiver, Arc<StatsRecorder>) {
        let stats = Arc::new(StatsRecorder::default());
        let (queue, receiver) = JobQueue::bounded(8, stats.clone());
        (RetryScheduler::new(queue, limit, stats.clone()), receiver, stats)
    }

    #[tokio::test]
    async fn fired_timer_resubmits_with_next_attempt() {
        let (scheduler, receiver, stats) = scheduler(4);
        let job = job();
        let id = job.id();

        scheduler.schedule(job, Duration::from_millis(10));
        let resubmitted = receiver.recv().await.unwrap();

        assert_eq!(resubmitted.id(), id);
        assert_eq!(resubmitted.attempt(), 1);
        assert_eq!(stats.snapshot().retries_scheduled, 1);
    }

    #[tokio::test]
    async fn capacity_bound_rejects_extra_timers() {
        let (scheduler, _receiver, _stats) = scheduler(1);

        scheduler.schedule(job(), Duration::from_secs(60));
        let (second, outcome) = job().with_completion_channel();
        scheduler.schedule(second, Duration::from_secs(60));

        assert_eq!(outcome.await.unwrap(), Err(DeliveryError::RetryCapacityExceeded { limit: 1 }));
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_cancels_armed_timers() {
        let (scheduler, receiver, stats) = scheduler(4);
        let (job, outcome) = job().with_completion_channel();

        scheduler.schedule(job, Duration::from_secs(60));
        scheduler.shutdown().await;

        assert_eq!(outcome.await.unwrap(), Err(DeliveryError::ShutdownRequested));
        assert!(receiver.close_and_drain().await.is_empty(), "nothing resubmitted");
        assert_eq!(stats.snapshot().pending_retries, 0);
    }

    #[tokio::test]
    async fn schedule_after_shutdown_ends_job() {
        let (scheduler, _receiver, _stats) = scheduler(4);
        scheduler.shutdown().await;

        let (job, outcome) = job().with_completion_channel();
        scheduler.schedule(job, Duration::from_millis(1));

        assert_eq!(outcome.await.unwrap(), Err(DeliveryError::ShutdownRequested));
    }

    #[tokio::test]
    async fn cancelled_job_is_not_resubmitted() {
        let (scheduler, receiver, _stats) = scheduler(4);
        let token = CancellationToken::new();
        let (job, outcome) = job().with_cancellation(token.clone()).with_completion_channel();

        scheduler.schedule(job, Duration::from_millis(20));
        token.cancel();

        assert_eq!(outcome.await.unwrap(), Err(DeliveryError::Cancelled));
        assert!(receiver.close_and_drain().await.is_empty());
    }
}
