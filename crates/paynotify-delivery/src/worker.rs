//! Delivery worker: one long-running consumer of the job queue.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    client::DeliveryClient,
    error::{DeliveryError, ErrorCategory, FailureClass},
    job::{DeliveryJob, DeliveryReceipt},
    queue::JobReceiver,
    retry::{RetryDecision, RetryPolicy},
    scheduler::RetryScheduler,
    stats::StatsRecorder,
};

/// Everything a worker needs, shared by all workers of a pool.
#[derive(Clone)]
pub(crate) struct WorkerContext {
    pub(crate) receiver: JobReceiver,
    pub(crate) client: Arc<DeliveryClient>,
    pub(crate) scheduler: RetryScheduler,
    pub(crate) retry_policy: RetryPolicy,
    pub(crate) stats: Arc<StatsRecorder>,
}

pub(crate) struct DeliveryWorker {
    id: usize,
    context: WorkerContext,
    cancellation_token: CancellationToken,
}

impl DeliveryWorker {
    pub(crate) fn new(
        id: usize,
        context: WorkerContext,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self { id, context, cancellation_token }
    }

    /// Processes jobs until cancelled or the queue closes.
    ///
    /// Cancellation is only observed between jobs; a job that has been
    /// dequeued is always carried through classification first.
    pub(crate) async fn run(&self) {
        loop {
            let job = tokio::select! {
                biased;
                () = self.cancellation_token.cancelled() => {
                    info!(worker_id = self.id, "delivery worker received shutdown signal");
                    break;
                }
                job = self.context.receiver.recv() => job,
            };

            match job {
                Some(job) => self.process_job(job).await,
                None => {
                    debug!(worker_id = self.id, "job queue closed");
                    break;
                },
            }
        }
    }

    /// Runs one attempt for `job` and routes the outcome.
    pub(crate) async fn process_job(&self, job: DeliveryJob) {
        let policy = &self.context.retry_policy;
        let attempt = job.attempt();

        if attempt >= policy.max_attempts {
            self.context.stats.record_exhausted();
            warn!(
                worker_id = self.id,
                job_id = %job.id(),
                attempt,
                "job arrived with its attempt budget already spent"
            );
            job.complete(Err(DeliveryError::RetriesExhausted { attempts: attempt }));
            return;
        }

        self.context.stats.record_attempt();

        let error = match self.context.client.deliver(&job).await {
            Ok(response) => {
                self.context.stats.record_delivered();
                info!(
                    worker_id = self.id,
                    job_id = %job.id(),
                    payment = %job.payment(),
                    attempt = attempt + 1,
                    duration_ms = response.duration.as_millis(),
                    "webhook delivered"
                );
                let receipt =
                    DeliveryReceipt { status_code: response.status_code, attempts: attempt + 1 };
                job.complete(Ok(receipt));
                return;
            },
            Err(error) => error,
        };

        let class = error.classify();
        let category = ErrorCategory::from(&error);

        match policy.decide(attempt, error.clone()) {
            RetryDecision::Retry { next_attempt, delay } => {
                warn!(
                    worker_id = self.id,
                    job_id = %job.id(),
                    attempt = attempt + 1,
                    next_attempt = next_attempt + 1,
                    delay_ms = delay.as_millis(),
                    category = %category,
                    error = %error,
                    "webhook delivery failed, retrying"
                );
                self.context.scheduler.schedule(job, delay);
            },
            RetryDecision::GiveUp { error: terminal } => {
                if class == FailureClass::Fatal {
                    self.context.stats.record_failed();
                } else {
                    self.context.stats.record_exhausted();
                }
                error!(
                    worker_id = self.id,
                    job_id = %job.id(),
                    payment = %job.payment(),
                    attempt = attempt + 1,
                    category = %category,
                    error = %terminal,
                    "webhook delivery failed permanently"
                );
                job.complete(Err(terminal));
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use paynotify_core::{GatewayResponse, PaymentReference};
    use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::{client::ClientConfig, queue::JobQueue};

    fn worker_for(url: String, max_attempts: u32) -> (DeliveryWorker, Arc<StatsRecorder>) {
        let stats = Arc::new(StatsRecorder::default());
        let (queue, receiver) = JobQueue::bounded(8, stats.clone());
        let client = DeliveryClient::new(ClientConfig {
            url,
            timeout: Duration::from_secs(5),
            user_agent: "Paynotify-Test/1.0".to_string(),
        })
        .unwrap();

        let context = WorkerContext {
            receiver,
            client: Arc::new(client),
            scheduler: RetryScheduler::new(queue, 8, stats.clone()),
            retry_policy: RetryPolicy {
                max_attempts,
                initial_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(50),
                backoff_factor: 2.0,
            },
            stats: stats.clone(),
        };

        (DeliveryWorker::new(0, context, CancellationToken::new()), stats)
    }

    fn job() -> DeliveryJob {
        DeliveryJob::new(
            PaymentReference::new("merchant-1", "page-1", "rvc-1"),
            GatewayResponse::default(),
        )
    }

    fn assert_send<T: Send>(_: T) {}

    #[tokio::test]
    async fn worker_futures_can_be_spawned() {
        let (worker, _stats) = worker_for("http://127.0.0.1:1/webhook".to_string(), 1);
        let job = job();

        assert_send(worker.context.client.deliver(&job));
        assert_send(worker.process_job(DeliveryJob::new(
            PaymentReference::new("merchant-1", "page-2", "rvc-1"),
            GatewayResponse::default(),
        )));
        assert_send(worker.run());
    }

    #[tokio::test]
    async fn spent_budget_completes_without_request() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let (worker, stats) = worker_for(server.uri(), 2);
        let (job, outcome) = job().next_attempt().next_attempt().with_completion_channel();

        worker.process_job(job).await;

        assert_eq!(outcome.await.unwrap(), Err(DeliveryError::RetriesExhausted { attempts: 2 }));
        assert_eq!(stats.snapshot().attempts, 0);
    }

    #[tokio::test]
    async fn success_reports_attempt_count() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let (worker, stats) = worker_for(server.uri(), 5);
        let (job, outcome) = job().next_attempt().with_completion_channel();

        worker.process_job(job).await;

        assert_eq!(outcome.await.unwrap(), Ok(DeliveryReceipt { status_code: 200, attempts: 2 }));
        assert_eq!(stats.snapshot().delivered, 1);
    }

    #[tokio::test]
    async fn retryable_failure_hands_job_to_scheduler() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let (worker, stats) = worker_for(server.uri(), 5);
        let job = job();
        let id = job.id();

        worker.process_job(job).await;
        let resubmitted = worker.context.receiver.recv().await.unwrap();

        assert_eq!(resubmitted.id(), id);
        assert_eq!(resubmitted.attempt(), 1);
        assert_eq!(stats.snapshot().retries_scheduled, 1);
    }
}
