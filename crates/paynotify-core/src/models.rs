//! Payment references, gateway snapshots and the notification payload.
//!
//! The gateway returns a loosely structured JSON document. It is decoded once
//! at the HTTP boundary into [`GatewayResponse`], which keeps the card fields
//! the notification needs as explicit optional values and carries the
//! original object along for passthrough.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Identifies the fulfilled payment a notification is about.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PaymentReference {
    /// Merchant that owns the payment page.
    pub merchant_id: String,
    /// Payment page that was paid.
    pub page_id: String,
    /// Revenue center (register/location) the payment was taken on.
    pub rvc_id: String,
}

impl PaymentReference {
    /// Creates a payment reference from its three identifiers.
    pub fn new(
        merchant_id: impl Into<String>,
        page_id: impl Into<String>,
        rvc_id: impl Into<String>,
    ) -> Self {
        Self { merchant_id: merchant_id.into(), page_id: page_id.into(), rvc_id: rvc_id.into() }
    }
}

impl fmt::Display for PaymentReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.merchant_id, self.page_id)
    }
}

/// Card details captured from the payment gateway's charge response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GatewayResponse {
    /// Card brand, e.g. `VISA`.
    pub brand: Option<String>,
    /// Last four digits of the card number.
    pub last4: Option<String>,
    /// Unmodified gateway response object, forwarded to the receiver.
    pub raw: Option<Map<String, Value>>,
}

impl GatewayResponse {
    /// Decodes a raw gateway response.
    ///
    /// Accepts both the gateway's `Brand`/`Last4` spelling and lowercase
    /// keys, preferring the gateway spelling when both are present. Fields
    /// that are missing or not strings decode to `None`; a non-object
    /// response keeps no passthrough payload.
    pub fn from_raw(raw: Value) -> Self {
        let Value::Object(map) = raw else {
            return Self::default();
        };

        Self {
            brand: card_field(&map, &["Brand", "brand"]),
            last4: card_field(&map, &["Last4", "last4"]),
            raw: Some(map),
        }
    }
}

/// First string value among `keys`.
fn card_field(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| map.get(*key).and_then(Value::as_str)).map(str::to_string)
}

/// Fulfillment state reported to the receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FulfillmentStatus {
    /// The payment has been charged and committed.
    Paid,
}

impl fmt::Display for FulfillmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Paid => write!(f, "paid"),
        }
    }
}

/// JSON body of a payment-fulfilled notification.
///
/// Built fresh for every delivery attempt so `timestamp` reflects the send
/// time, not the time the job was created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookPayload {
    /// Payment page identifier.
    pub payment_page_id: String,
    /// Merchant identifier.
    pub merchant_id: String,
    /// Revenue center identifier.
    pub rvc_id: String,
    /// Always [`FulfillmentStatus::Paid`].
    pub status: FulfillmentStatus,
    /// Last four card digits, empty when the gateway did not report them.
    pub last4: String,
    /// Card brand, empty when the gateway did not report it.
    pub brand: String,
    /// RFC 3339 UTC send time.
    pub timestamp: DateTime<Utc>,
    /// Gateway response passthrough.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<Map<String, Value>>,
}

impl WebhookPayload {
    /// Builds the payload for one send attempt.
    pub fn paid(
        payment: &PaymentReference,
        gateway: &GatewayResponse,
        sent_at: DateTime<Utc>,
    ) -> Self {
        Self {
            payment_page_id: payment.page_id.clone(),
            merchant_id: payment.merchant_id.clone(),
            rvc_id: payment.rvc_id.clone(),
            status: FulfillmentStatus::Paid,
            last4: gateway.last4.clone().unwrap_or_default(),
            brand: gateway.brand.clone().unwrap_or_default(),
            timestamp: sent_at,
            raw_response: gateway.raw.clone(),
        }
    }
}
