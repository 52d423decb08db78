//! Error types for webhook delivery operations.
//!
//! Every failure a delivery job can end with is a [`DeliveryError`]. The
//! classifier on this type decides whether a failed attempt is worth another
//! try; it looks only at the failure itself, never at how many attempts the
//! job has already made.

use std::{fmt, time::Duration};

use thiserror::Error;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Failure conditions for webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The job queue was at capacity; no attempt was made.
    #[error("webhook queue full (capacity {capacity})")]
    QueueFull {
        /// Configured queue capacity
        capacity: usize,
    },

    /// The payload could not be serialized before sending.
    #[error("failed to serialize payload: {message}")]
    Serialization {
        /// Serializer error message
        message: String,
    },

    /// The per-attempt timeout elapsed before a response arrived.
    #[error("request timeout after {}ms", timeout.as_millis())]
    Timeout {
        /// Timeout that was exceeded
        timeout: Duration,
    },

    /// The job's deadline passed while the attempt was in flight.
    #[error("request deadline exceeded")]
    DeadlineExceeded,

    /// The job's cancellation handle fired while the attempt was in flight.
    #[error("request cancelled")]
    Cancelled,

    /// The connection to the endpoint could not be established or was lost.
    #[error("connection failed: {message}")]
    Connection {
        /// Transport error message
        message: String,
    },

    /// Any other transport-level failure.
    #[error("request failed: {message}")]
    Transport {
        /// Transport error message
        message: String,
    },

    /// The endpoint answered with a 5xx status.
    #[error("webhook returned status {status_code}: {body}")]
    ServerError {
        /// HTTP status code (5xx)
        status_code: u16,
        /// Response body content
        body: String,
    },

    /// The endpoint answered 429 Too Many Requests.
    #[error("webhook returned status 429: {body}")]
    RateLimited {
        /// Response body content
        body: String,
    },

    /// The endpoint answered with any other non-200 status.
    #[error("webhook returned status {status_code}: {body}")]
    Rejected {
        /// HTTP status code
        status_code: u16,
        /// Response body content
        body: String,
    },

    /// The attempt budget was used up by retryable failures.
    #[error("max retries exceeded after {attempts} attempts")]
    RetriesExhausted {
        /// Number of delivery attempts made
        attempts: u32,
    },

    /// Too many jobs were already waiting on a retry timer.
    #[error("retry capacity exceeded ({limit} pending retries)")]
    RetryCapacityExceeded {
        /// Configured bound on pending retries
        limit: usize,
    },

    /// The engine stopped before the job reached a result.
    #[error("webhook delivery shut down")]
    ShutdownRequested,

    /// Workers did not stop within the shutdown timeout.
    #[error("worker shutdown timed out after {}s", timeout.as_secs())]
    ShutdownTimeout {
        /// Timeout that was exceeded
        timeout: Duration,
    },

    /// A worker task panicked.
    #[error("worker {worker_id} panicked: {error}")]
    WorkerPanic {
        /// Index of the worker that panicked
        worker_id: usize,
        /// Panic description from the join error
        error: String,
    },

    /// Invalid delivery configuration.
    #[error("invalid delivery configuration: {message}")]
    ConfigurationError {
        /// Configuration error message
        message: String,
    },
}

/// Whether a failed attempt may be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Temporary condition; another attempt may succeed.
    Retryable,
    /// Permanent condition; the job ends now.
    Fatal,
}

impl DeliveryError {
    /// Creates a serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization { message: message.into() }
    }

    /// Creates a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection { message: message.into() }
    }

    /// Creates a generic transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport { message: message.into() }
    }

    /// Creates the failure for a non-200 response.
    pub fn from_status(status_code: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        match status_code {
            429 => Self::RateLimited { body },
            500..=u16::MAX => Self::ServerError { status_code, body },
            _ => Self::Rejected { status_code, body },
        }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::ConfigurationError { message: message.into() }
    }

    /// Classifies a failed attempt.
    ///
    /// Timeouts, 5xx, 429 and connection problems are retryable. Generic
    /// transport failures are retryable only when their message points at a
    /// reset, a timeout or the connection. Everything else, including
    /// serialization failures and other status codes, is fatal.
    pub fn classify(&self) -> FailureClass {
        match self {
            Self::Timeout { .. }
            | Self::DeadlineExceeded
            | Self::Connection { .. }
            | Self::ServerError { .. }
            | Self::RateLimited { .. } => FailureClass::Retryable,

            Self::Transport { message } if mentions_connection_problem(message) => {
                FailureClass::Retryable
            },

            Self::Transport { .. }
            | Self::QueueFull { .. }
            | Self::Serialization { .. }
            | Self::Cancelled
            | Self::Rejected { .. }
            | Self::RetriesExhausted { .. }
            | Self::RetryCapacityExceeded { .. }
            | Self::ShutdownRequested
            | Self::ShutdownTimeout { .. }
            | Self::WorkerPanic { .. }
            | Self::ConfigurationError { .. } => FailureClass::Fatal,
        }
    }

    /// Returns `true` when [`classify`](Self::classify) says retryable.
    pub fn is_retryable(&self) -> bool {
        self.classify() == FailureClass::Retryable
    }

    /// HTTP status carried by the failure, if the endpoint responded.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::ServerError { status_code, .. } | Self::Rejected { status_code, .. } => {
                Some(*status_code)
            },
            Self::RateLimited { .. } => Some(429),
            _ => None,
        }
    }
}

fn mentions_connection_problem(message: &str) -> bool {
    let lowercase = message.to_lowercase();
    ["connection", "reset", "timeout", "timed out"].iter().any(|needle| lowercase.contains(needle))
}

/// Category of delivery error for logs and statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Network connectivity, timeouts and cancellation.
    Network,
    /// Endpoint rejected the request (non-5xx status).
    Client,
    /// Endpoint failed (5xx).
    Server,
    /// Rate limiting.
    RateLimit,
    /// Payload could not be encoded.
    Serialization,
    /// Queue or retry capacity, retry budget and shutdown.
    Capacity,
    /// Worker lifecycle failures.
    Lifecycle,
    /// Configuration problems.
    Configuration,
}

impl From<&DeliveryError> for ErrorCategory {
    fn from(error: &DeliveryError) -> Self {
        match error {
            DeliveryError::Timeout { .. }
            | DeliveryError::DeadlineExceeded
            | DeliveryError::Cancelled
            | DeliveryError::Connection { .. }
            | DeliveryError::Transport { .. } => Self::Network,
            DeliveryError::Rejected { .. } => Self::Client,
            DeliveryError::ServerError { .. } => Self::Server,
            DeliveryError::RateLimited { .. } => Self::RateLimit,
            DeliveryError::Serialization { .. } => Self::Serialization,
            DeliveryError::QueueFull { .. }
            | DeliveryError::RetriesExhausted { .. }
            | DeliveryError::RetryCapacityExceeded { .. }
            | DeliveryError::ShutdownRequested => Self::Capacity,
            DeliveryError::ShutdownTimeout { .. } | DeliveryError::WorkerPanic { .. } => {
                Self::Lifecycle
            },
            DeliveryError::ConfigurationError { .. } => Self::Configuration,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::Client => write!(f, "client"),
            Self::Server => write!(f, "server"),
            Self::RateLimit => write!(f, "rate_limit"),
            Self::Serialization => write!(f, "serialization"),
            Self::Capacity => write!(f, "capacity"),
            Self::Lifecycle => write!(f, "lifecycle"),
            Self::Configuration => write!(f, "configuration"),
        }
    }
}
