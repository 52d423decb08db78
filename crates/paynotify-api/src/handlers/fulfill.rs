//! Payment-fulfilled event intake.
//!
//! Called by the payment path after a charge has been committed as paid.
//! The handler queues a webhook notification and answers immediately: the
//! outcome of the notification is only logged, it never reaches the caller.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use paynotify_core::{GatewayResponse, PaymentReference};
use paynotify_delivery::{DeliveryJob, DeliveryOutcome, ErrorCategory};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::ErrorResponse;
use crate::AppState;

/// A payment that has just been committed as paid.
#[derive(Debug, Deserialize)]
pub struct FulfillmentRequest {
    /// Merchant owning the payment page.
    pub merchant_id: String,
    /// Payment page that was paid.
    pub page_id: String,
    /// Revenue center identifier.
    pub rvc_id: String,
    /// Raw charge response from the payment gateway.
    #[serde(default)]
    pub gateway_response: Value,
}

/// Acknowledgement returned once the notification is queued.
#[derive(Debug, Serialize)]
pub struct FulfillmentAccepted {
    /// Identifier of the queued delivery job.
    pub job_id: Uuid,
    /// Always `accepted`.
    pub status: &'static str,
}

/// Queues a payment-fulfilled webhook.
///
/// Answers `202 Accepted` whenever the request is well formed, including
/// when the delivery queue is full: a dropped notification is logged by the
/// job's callback and must not fail the payment.
#[instrument(name = "payment_fulfilled", skip_all)]
pub async fn payment_fulfilled(
    State(state): State<AppState>,
    Json(request): Json<FulfillmentRequest>,
) -> Response {
    if let Some(field) = missing_identifier(&request) {
        warn!(field, "rejecting fulfillment event with empty identifier");
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ErrorResponse::new("invalid_request", format!("{field} must not be empty"))),
        )
            .into_response();
    }

    let payment = PaymentReference::new(request.merchant_id, request.page_id, request.rvc_id);
    let gateway = GatewayResponse::from_raw(request.gateway_response);
    let deadline = Instant::now() + state.config.delivery_deadline();

    let job = DeliveryJob::new(payment.clone(), gateway).with_deadline(deadline);
    let job_id = job.id();
    let job = job.on_complete(move |outcome| log_outcome(job_id, &payment, &outcome));

    info!(%job_id, "queueing payment-fulfilled notification");
    state.delivery.submit(job);

    (StatusCode::ACCEPTED, Json(FulfillmentAccepted { job_id, status: "accepted" }))
        .into_response()
}

fn missing_identifier(request: &FulfillmentRequest) -> Option<&'static str> {
    [
        ("merchant_id", &request.merchant_id),
        ("page_id", &request.page_id),
        ("rvc_id", &request.rvc_id),
    ]
    .into_iter()
    .find(|(_, value)| value.trim().is_empty())
    .map(|(field, _)| field)
}

fn log_outcome(job_id: Uuid, payment: &PaymentReference, outcome: &DeliveryOutcome) {
    match outcome {
        Ok(receipt) => info!(
            %job_id,
            merchant_id = %payment.merchant_id,
            page_id = %payment.page_id,
            status = receipt.status_code,
            attempts = receipt.attempts,
            "payment notification delivered"
        ),
        Err(e) => error!(
            %job_id,
            merchant_id = %payment.merchant_id,
            page_id = %payment.page_id,
            category = %ErrorCategory::from(e),
            error = %e,
            "payment notification failed"
        ),
    }
}
