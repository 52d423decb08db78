//! Webhook delivery engine: queue, worker pool and retry scheduler.
//!
//! The engine is constructed once by the application's composition root and
//! handed out as a cloneable [`DeliveryHandle`] to whatever needs to submit
//! notifications. Nothing here is process-global.
//!
//! # Architecture
//!
//! ```text
//!   DeliveryHandle::submit
//!            │
//!            ▼
//!   ┌─────────────────┐        ┌──────────────┐        ┌──────────────┐
//!   │ Job Queue       │──────▶│ Worker Pool  │──────▶│ HTTP Client  │
//!   │ (bounded)       │        │ (N workers)  │        └──────────────┘
//!   └─────────────────┘        └──────────────┘
//!            ▲                         │ retryable failure
//!            │                         ▼
//!            │                ┌──────────────────┐
//!            └────────────────│ Retry Scheduler  │
//!              after backoff  │ (bounded timers) │
//!                             └──────────────────┘
//! ```
//!
//! # Shutdown
//!
//! [`DeliveryEngine::shutdown`] stops the workers (each finishes its current
//! job), cancels every armed retry timer, then closes the queue. Jobs still
//! waiting in the queue or on a timer, and jobs submitted afterwards, end with
//! `ShutdownRequested`.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    client::{ClientConfig, DeliveryClient},
    config::DeliveryPolicy,
    error::{DeliveryError, Result},
    job::DeliveryJob,
    queue::{JobQueue, JobReceiver},
    scheduler::RetryScheduler,
    stats::{EngineStats, StatsRecorder},
    worker::WorkerContext,
    worker_pool::WorkerPool,
};

/// Cloneable entry point for submitting jobs to a running engine.
#[derive(Clone)]
pub struct DeliveryHandle {
    queue: JobQueue,
    stats: Arc<StatsRecorder>,
}

impl DeliveryHandle {
    /// Enqueues `job` without blocking.
    ///
    /// If the queue is full the job's callback receives `QueueFull` before
    /// this returns and no delivery is attempted. After shutdown the callback
    /// receives `ShutdownRequested`.
    pub fn submit(&self, job: DeliveryJob) {
        self.queue.submit(job);
    }

    /// Returns current engine statistics.
    pub fn stats(&self) -> EngineStats {
        EngineStats { queued: self.queue.len(), ..self.stats.snapshot() }
    }
}

impl std::fmt::Debug for DeliveryHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryHandle").field("queued", &self.queue.len()).finish()
    }
}

/// Main delivery engine coordinating webhook delivery workers.
pub struct DeliveryEngine {
    policy: DeliveryPolicy,
    queue: JobQueue,
    receiver: JobReceiver,
    client: Arc<DeliveryClient>,
    scheduler: RetryScheduler,
    stats: Arc<StatsRecorder>,
    cancellation_token: CancellationToken,
    worker_pool: Option<WorkerPool>,
}

impl DeliveryEngine {
    /// Creates an engine for `policy`. Jobs may be submitted before
    /// [`start`](Self::start); they wait in the queue.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` if the policy is invalid
    /// or the HTTP client cannot be built.
    pub fn new(policy: DeliveryPolicy) -> Result<Self> {
        policy.validate()?;

        let stats = Arc::new(StatsRecorder::default());
        let client = Arc::new(DeliveryClient::new(ClientConfig::from(&policy))?);
        let (queue, receiver) = JobQueue::bounded(policy.queue_capacity, stats.clone());
        let scheduler = RetryScheduler::new(queue.clone(), policy.max_pending_retries, stats.clone());

        info!(
            url = %policy.url,
            max_attempts = policy.max_attempts,
            worker_count = policy.worker_count,
            queue_capacity = policy.queue_capacity,
            timeout_ms = policy.timeout.as_millis(),
            "webhook delivery engine configured"
        );

        Ok(Self {
            policy,
            queue,
            receiver,
            client,
            scheduler,
            stats,
            cancellation_token: CancellationToken::new(),
            worker_pool: None,
        })
    }

    /// Creates an engine from the `WEBHOOK_*` environment and defaults.
    pub fn from_env() -> Result<Self> {
        Self::new(DeliveryPolicy::from_env()?)
    }

    /// Policy the engine was built with.
    pub fn policy(&self) -> &DeliveryPolicy {
        &self.policy
    }

    /// Handle for submitting jobs.
    pub fn handle(&self) -> DeliveryHandle {
        DeliveryHandle { queue: self.queue.clone(), stats: self.stats.clone() }
    }

    /// Starts the delivery engine with configured worker pool.
    ///
    /// Returns immediately after spawning workers. Use `shutdown()` to stop
    /// gracefully, or drop the engine to cancel workers immediately.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` if the engine is already
    /// running.
    pub async fn start(&mut self) -> Result<()> {
        if self.worker_pool.is_some() {
            return Err(DeliveryError::configuration("delivery engine already started"));
        }

        info!(worker_count = self.policy.worker_count, "starting webhook delivery engine");

        let context = WorkerContext {
            receiver: self.receiver.clone(),
            client: self.client.clone(),
            scheduler: self.scheduler.clone(),
            retry_policy: self.policy.retry_policy(),
            stats: self.stats.clone(),
        };

        let mut worker_pool =
            WorkerPool::new(self.policy.worker_count, context, self.cancellation_token.clone());
        worker_pool.spawn_workers();
        self.worker_pool = Some(worker_pool);

        info!("delivery engine started successfully");
        Ok(())
    }

    /// Whether any worker is still running.
    pub fn is_running(&self) -> bool {
        self.worker_pool.as_ref().is_some_and(WorkerPool::has_active_workers)
    }

    /// Returns current engine statistics.
    pub fn stats(&self) -> EngineStats {
        EngineStats { queued: self.queue.len(), ..self.stats.snapshot() }
    }

    /// Gracefully shuts down the delivery engine.
    ///
    /// Returns once every worker has finished its current job (or the
    /// shutdown timeout passed), every retry timer has been cancelled, and
    /// every job left in the queue has been ended with `ShutdownRequested`.
    ///
    /// # Errors
    ///
    /// Returns `ShutdownTimeout` if workers outlived the shutdown timeout, or
    /// `WorkerPanic` if a worker task panicked. Timers and queued jobs are
    /// cleaned up in either case.
    pub async fn shutdown(mut self) -> Result<()> {
        info!("shutting down delivery engine");

        let workers = match self.worker_pool.take() {
            Some(worker_pool) => worker_pool.shutdown_graceful(self.policy.shutdown_timeout).await,
            None => {
                info!("delivery engine was not started, no workers to stop");
                Ok(())
            },
        };

        self.scheduler.shutdown().await;

        let remaining = self.receiver.close_and_drain().await;
        if !remaining.is_empty() {
            warn!(dropped_jobs = remaining.len(), "ending queued jobs at shutdown");
        }
        for job in remaining {
            job.complete(Err(DeliveryError::ShutdownRequested));
        }

        info!("delivery engine shutdown completed");
        workers
    }
}
