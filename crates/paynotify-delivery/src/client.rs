//! HTTP client for payment-fulfilled notifications.
//!
//! One call to [`DeliveryClient::deliver`] is one bounded attempt: the payload
//! is built with a fresh timestamp, POSTed once, and the outcome is mapped to
//! a [`DeliveryError`] variant the classifier understands. Only status 200
//! counts as success.

use std::{error::Error as _, time::Duration};

use chrono::Utc;
use paynotify_core::WebhookPayload;
use reqwest::header::CONTENT_TYPE;
use tokio::time::Instant;
use tracing::{debug, info_span, warn, Instrument};

use crate::{
    config::DeliveryPolicy,
    error::{DeliveryError, Result},
    job::DeliveryJob,
};

/// Response bodies longer than this are truncated before they are kept.
const MAX_BODY_SIZE: usize = 1024;

/// Configuration for the delivery client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Receiving endpoint.
    pub url: String,
    /// Per-attempt timeout covering connect, send and body read.
    pub timeout: Duration,
    /// `User-Agent` header value identifying this client.
    pub user_agent: String,
}

impl From<&DeliveryPolicy> for ClientConfig {
    fn from(policy: &DeliveryPolicy) -> Self {
        Self {
            url: policy.url.clone(),
            timeout: policy.timeout,
            user_agent: policy.user_agent.clone(),
        }
    }
}

/// Response from a successful attempt.
#[derive(Debug, Clone)]
pub struct DeliveryResponse {
    /// HTTP status code (always 200).
    pub status_code: u16,
    /// Response body (limited size).
    pub body: String,
    /// Total duration of the request.
    pub duration: Duration,
}

/// HTTP client delivering notifications to the configured endpoint.
#[derive(Debug, Clone)]
pub struct DeliveryClient {
    client: reqwest::Client,
    config: ClientConfig,
}

impl DeliveryClient {
    /// Creates a new delivery client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` if the HTTP client cannot
    /// be configured with the provided settings.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| {
                DeliveryError::configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { client, config })
    }

    /// Makes one delivery attempt for `job`.
    ///
    /// The attempt is abandoned as soon as the job's cancellation handle fires
    /// or its deadline passes.
    ///
    /// # Errors
    ///
    /// - `Serialization` if the payload cannot be encoded (nothing is sent)
    /// - `Timeout`, `Connection` or `Transport` when no response arrived
    /// - `Cancelled` or `DeadlineExceeded` when the job was abandoned
    /// - `RateLimited`, `ServerError` or `Rejected` for any status but 200
    pub async fn deliver(&self, job: &DeliveryJob) -> Result<DeliveryResponse> {
        let payload = WebhookPayload::paid(job.payment(), job.gateway(), Utc::now());
        let body = serde_json::to_vec(&payload)
            .map_err(|e| DeliveryError::serialization(e.to_string()))?;

        let span = info_span!(
            "webhook_delivery",
            job_id = %job.id(),
            merchant_id = %job.payment().merchant_id,
            page_id = %job.payment().page_id,
            attempt = job.attempt().saturating_add(1),
        );

        async move {
            let start_time = std::time::Instant::now();
            debug!(url = %self.config.url, "sending webhook");

            let outcome = tokio::select! {
                biased;
                () = job.cancellation().cancelled() => Err(DeliveryError::Cancelled),
                () = wait_for_deadline(job.deadline()) => Err(DeliveryError::DeadlineExceeded),
                outcome = self.send(body) => outcome,
            };
            let duration = start_time.elapsed();

            match outcome {
                Ok((200, body)) => {
                    debug!(duration_ms = duration.as_millis(), "webhook accepted");
                    Ok(DeliveryResponse { status_code: 200, body, duration })
                },
                Ok((status_code, body)) => {
                    warn!(
                        status = status_code,
                        duration_ms = duration.as_millis(),
                        "webhook endpoint returned non-200 status"
                    );
                    Err(DeliveryError::from_status(status_code, body))
                },
                Err(error) => {
                    warn!(duration_ms = duration.as_millis(), error = %error, "webhook request failed");
                    Err(error)
                },
            }
        }
        .instrument(span)
        .await
    }

    /// Sends the request and reads the (truncated) body.
    async fn send(&self, body: Vec<u8>) -> Result<(u16, String)> {
        let response = self
            .client
            .post(&self.config.url)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| self.transport_error(&e))?;

        let status_code = response.status().as_u16();
        let body = match response.bytes().await {
            Ok(bytes) => truncate_body(&bytes),
            Err(e) if e.is_timeout() => return Err(self.transport_error(&e)),
            Err(e) => {
                warn!("failed to read response body: {}", e);
                format!("[failed to read response body: {}]", error_chain(&e))
            },
        };

        Ok((status_code, body))
    }

    fn transport_error(&self, error: &reqwest::Error) -> DeliveryError {
        if error.is_timeout() {
            return DeliveryError::Timeout { timeout: self.config.timeout };
        }
        if error.is_connect() {
            return DeliveryError::connection(error_chain(error));
        }
        DeliveryError::transport(error_chain(error))
    }
}

async fn wait_for_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Joins an error with its sources so the underlying cause (reset, refused)
/// is visible in the message.
fn error_chain(error: &reqwest::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

fn truncate_body(bytes: &[u8]) -> String {
    if bytes.len() > MAX_BODY_SIZE {
        let suffix = "... (truncated)";
        let max_content = MAX_BODY_SIZE - suffix.len();
        let truncated = String::from_utf8_lossy(&bytes[..max_content]);
        format!("{truncated}{suffix}")
    } else {
        String::from_utf8_lossy(bytes).into_owned()
    }
}
