//! Core domain types for payment-fulfilled notifications.
//!
//! Holds the payment reference a notification is about, the card details
//! captured from the gateway response, and the JSON body sent to the
//! receiving endpoint. Both the delivery engine and the HTTP surface depend
//! on these types so the wire shape is defined in exactly one place.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod models;

pub use models::{FulfillmentStatus, GatewayResponse, PaymentReference, WebhookPayload};
