//! Worker pool management with structured concurrency.
//!
//! Provides lifecycle management and graceful shutdown for the fixed set of
//! delivery worker tasks.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    error::{DeliveryError, Result},
    worker::{DeliveryWorker, WorkerContext},
};

/// Fixed-size pool of delivery workers sharing one queue.
pub(crate) struct WorkerPool {
    worker_count: usize,
    context: WorkerContext,
    cancellation_token: CancellationToken,
    worker_handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub(crate) fn new(
        worker_count: usize,
        context: WorkerContext,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self { worker_count, context, cancellation_token, worker_handles: Vec::new() }
    }

    /// Spawn all configured workers and begin processing.
    ///
    /// Returns immediately after spawning. Workers run until the cancellation
    /// token fires.
    pub(crate) fn spawn_workers(&mut self) {
        info!(worker_count = self.worker_count, "spawning delivery workers");

        self.context.stats.set_active_workers(self.worker_count);

        for worker_id in 0..self.worker_count {
            let worker = DeliveryWorker::new(
                worker_id,
                self.context.clone(),
                self.cancellation_token.clone(),
            );

            let handle = tokio::spawn(async move {
                info!(worker_id, "delivery worker starting");
                worker.run().await;
                info!(worker_id, "delivery worker stopped gracefully");
            });

            self.worker_handles.push(handle);
        }

        info!(
            spawned_workers = self.worker_handles.len(),
            "all delivery workers spawned successfully"
        );
    }

    /// Signals all workers to stop and waits for each to finish its current
    /// job.
    ///
    /// # Errors
    ///
    /// Returns `ShutdownTimeout` if the workers do not exit within `timeout`,
    /// or `WorkerPanic` for the first worker whose task panicked.
    pub(crate) async fn shutdown_graceful(mut self, timeout: Duration) -> Result<()> {
        info!(
            worker_count = self.worker_handles.len(),
            timeout_seconds = timeout.as_secs(),
            "initiating graceful worker shutdown"
        );

        self.cancellation_token.cancel();

        let handles = std::mem::take(&mut self.worker_handles);
        let shutdown_future = async {
            let mut results = Vec::with_capacity(handles.len());

            for (worker_id, handle) in handles.into_iter().enumerate() {
                match handle.await {
                    Ok(()) => results.push(Ok(())),
                    Err(join_error) => {
                        error!(
                            worker_id,
                            error = %join_error,
                            "worker task panicked during shutdown"
                        );
                        results.push(Err(DeliveryError::WorkerPanic {
                            worker_id,
                            error: format!("{join_error}"),
                        }));
                    },
                }
            }

            results
        };

        let outcome = tokio::time::timeout(timeout, shutdown_future).await;
        self.context.stats.set_active_workers(0);

        match outcome {
            Ok(results) => {
                let error_count = results.iter().filter(|r| r.is_err()).count();
                if error_count > 0 {
                    warn!(
                        error_count,
                        total_workers = results.len(),
                        "some workers panicked before shutdown"
                    );
                }
                info!("worker pool shutdown completed");
                results.into_iter().collect()
            },
            Err(_timeout) => {
                error!(
                    timeout_seconds = timeout.as_secs(),
                    "worker shutdown timed out, some workers may still be running"
                );
                Err(DeliveryError::ShutdownTimeout { timeout })
            },
        }
    }

    /// Check if any workers are still running.
    pub(crate) fn has_active_workers(&self) -> bool {
        self.worker_handles.iter().any(|h| !h.is_finished())
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if self.worker_handles.is_empty() || self.cancellation_token.is_cancelled() {
            return;
        }

        let active_count = self.worker_handles.iter().filter(|h| !h.is_finished()).count();
        if active_count > 0 {
            error!(
                active_workers = active_count,
                "worker pool dropped with active workers, forcing cancellation"
            );
            self.cancellation_token.cancel();
        }
    }
}
