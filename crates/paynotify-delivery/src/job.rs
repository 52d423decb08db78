//! Delivery jobs and their completion callbacks.

use std::{
    fmt,
    panic::{self, AssertUnwindSafe},
};

use paynotify_core::{GatewayResponse, PaymentReference};
use tokio::{sync::oneshot, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};
use uuid::Uuid;

use crate::error::{DeliveryError, Result};

/// Terminal outcome handed to a job's completion callback.
pub type DeliveryOutcome = Result<DeliveryReceipt>;

/// Callback invoked exactly once when a job becomes terminal.
pub type CompletionCallback = Box<dyn FnOnce(DeliveryOutcome) + Send + Sync + 'static>;

/// Proof of a successful delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    /// Status code returned by the endpoint.
    pub status_code: u16,
    /// Number of attempts made, the successful one included.
    pub attempts: u32,
}

/// One payment-fulfilled notification travelling through the engine.
///
/// The job owns its completion callback. Ending a job consumes it, so a job
/// that has reached a terminal state can never be resubmitted. A job dropped
/// before it was ended (an engine dropped without `shutdown`, or a worker
/// abandoned after a shutdown timeout) reports `ShutdownRequested`.
pub struct DeliveryJob {
    id: Uuid,
    payment: PaymentReference,
    gateway: GatewayResponse,
    attempt: u32,
    callback: Option<CompletionCallback>,
    cancellation: CancellationToken,
    deadline: Option<Instant>,
}

impl DeliveryJob {
    /// Creates a job at attempt 0 with no callback, deadline or cancellation.
    pub fn new(payment: PaymentReference, gateway: GatewayResponse) -> Self {
        Self {
            id: Uuid::new_v4(),
            payment,
            gateway,
            attempt: 0,
            callback: None,
            cancellation: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Sets the completion callback, replacing any previous one.
    #[must_use]
    pub fn on_complete(
        mut self,
        callback: impl FnOnce(DeliveryOutcome) + Send + Sync + 'static,
    ) -> Self {
        self.callback = Some(Box::new(callback));
        self
    }

    /// Attaches a channel that receives the terminal outcome.
    ///
    /// A previously set callback still runs first.
    #[must_use]
    pub fn with_completion_channel(mut self) -> (Self, oneshot::Receiver<DeliveryOutcome>) {
        let (sender, receiver) = oneshot::channel();
        let previous = self.callback.take();

        self.callback = Some(Box::new(move |outcome: DeliveryOutcome| {
            if let Some(previous) = previous {
                previous(outcome.clone());
            }
            let _ = sender.send(outcome);
        }));

        (self, receiver)
    }

    /// Ties the job to the cancellation handle of the request that created it.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Abandons the job once `deadline` passes.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Unique job identifier, stable across retries.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Payment the notification is about.
    pub fn payment(&self) -> &PaymentReference {
        &self.payment
    }

    /// Gateway snapshot the payload is built from.
    pub fn gateway(&self) -> &GatewayResponse {
        &self.gateway
    }

    /// 0-based index of the next attempt.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Cancellation handle inherited from the originating request.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Deadline after which the job is abandoned.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Reason the job should not be attempted again, if any.
    pub(crate) fn abandonment(&self) -> Option<DeliveryError> {
        if self.cancellation.is_cancelled() {
            return Some(DeliveryError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(DeliveryError::DeadlineExceeded),
            _ => None,
        }
    }

    /// The same job, one attempt further along.
    pub(crate) fn next_attempt(mut self) -> Self {
        self.attempt = self.attempt.saturating_add(1);
        self
    }

    /// Ends the job and reports `outcome` to its callback.
    pub(crate) fn complete(mut self, outcome: DeliveryOutcome) {
        self.report(outcome);
    }

    fn report(&mut self, outcome: DeliveryOutcome) {
        let Some(callback) = self.callback.take() else {
            return;
        };

        // A panicking callback must not take the calling worker down with it.
        if panic::catch_unwind(AssertUnwindSafe(|| callback(outcome))).is_err() {
            error!(job_id = %self.id, "delivery completion callback panicked");
        }
    }
}

impl Drop for DeliveryJob {
    fn drop(&mut self) {
        if self.callback.is_some() {
            warn!(job_id = %self.id, attempt = self.attempt, "delivery job dropped before completion");
            self.report(Err(DeliveryError::ShutdownRequested));
        }
    }
}

impl fmt::Debug for DeliveryJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryJob")
            .field("id", &self.id)
            .field("payment", &self.payment)
            .field("attempt", &self.attempt)
            .field("has_callback", &self.callback.is_some())
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}
