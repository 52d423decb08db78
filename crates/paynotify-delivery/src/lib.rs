//! Asynchronous delivery of payment-fulfilled webhooks.
//!
//! Once a payment has been committed as paid, the caller builds a
//! [`DeliveryJob`] and submits it through a [`DeliveryHandle`]. Submission
//! never blocks the payment request: the job is queued, delivered by one of
//! a fixed number of workers, retried with exponential backoff on temporary
//! failures, and finally reported to the job's own completion callback.
//!
//! # Architecture
//!
//! 1. **Submit** - Non-blocking enqueue into a bounded queue; a full queue
//!    fails the job immediately
//! 2. **Deliver** - A worker POSTs the JSON payload with a per-attempt timeout
//! 3. **Classify** - Timeouts, connection problems, 5xx and 429 are
//!    retryable; everything else is fatal
//! 4. **Retry** - A bounded timer set resubmits the job after a jittered
//!    backoff, without occupying a worker
//!
//! Delivery is best effort: nothing is persisted, and order across jobs is
//! not preserved.
//!
//! # Example
//!
//! ```no_run
//! use paynotify_core::{GatewayResponse, PaymentReference};
//! use paynotify_delivery::{DeliveryEngine, DeliveryError, DeliveryJob, DeliveryPolicy};
//!
//! # async fn example() -> std::result::Result<(), DeliveryError> {
//! let mut engine = DeliveryEngine::new(DeliveryPolicy::from_env()?)?;
//! engine.start().await?;
//!
//! let job = DeliveryJob::new(
//!     PaymentReference::new("merchant-1", "page-42", "rvc-7"),
//!     GatewayResponse::default(),
//! )
//! .on_complete(|outcome| {
//!     if let Err(error) = outcome {
//!         tracing::error!(%error, "payment notification failed");
//!     }
//! });
//! engine.handle().submit(job);
//!
//! engine.shutdown().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::time::Duration;

pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod job;
pub mod retry;
mod queue;
mod scheduler;
mod stats;
mod worker;
mod worker_pool;

pub use config::{DeliveryPolicy, PolicyOverrides};
pub use engine::{DeliveryEngine, DeliveryHandle};
pub use error::{DeliveryError, ErrorCategory, FailureClass, Result};
pub use job::{DeliveryJob, DeliveryOutcome, DeliveryReceipt};
pub use retry::RetryPolicy;
pub use stats::EngineStats;

/// Default receiving endpoint.
pub const DEFAULT_WEBHOOK_URL: &str = "http://localhost:9000/webhook/payment-fulfilled";

/// Default maximum delivery attempts per job.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default delay before the first retry.
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(1);

/// Default cap on the pre-jitter retry delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Default backoff multiplier.
pub const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;

/// Default number of concurrent delivery workers.
pub const DEFAULT_WORKER_COUNT: usize = 10;

/// Default job queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Default per-attempt HTTP timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default time shutdown waits for workers.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Default `User-Agent` sent with every notification.
pub const DEFAULT_USER_AGENT: &str = "Paynotify-Webhook/1.0";
