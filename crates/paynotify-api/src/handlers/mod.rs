//! HTTP request handlers for the paynotify API.
//!
//! Handlers are grouped by functionality:
//! - `fulfill` - Payment-fulfilled event intake
//! - `health` - Health and liveness probes
//!
//! Error responses share one shape, `{"error": {"code": .., "message": ..}}`.

use serde::Serialize;

pub mod fulfill;
pub mod health;

pub use fulfill::payment_fulfilled;
pub use health::{health_check, liveness_check};

/// Standardized error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error details
    pub error: ErrorDetail,
}

/// Error code and human-readable message.
#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    /// Machine-readable error code
    pub code: String,
    /// Human-readable error message
    pub message: String,
}

impl ErrorResponse {
    /// Builds an error body from a code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self { error: ErrorDetail { code: code.into(), message: message.into() } }
    }
}
