//! Paynotify HTTP API.
//!
//! Accepts payment-fulfilled events from the payment path and hands them to
//! the webhook delivery engine. The HTTP response never waits on delivery.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::sync::Arc;

use paynotify_delivery::DeliveryHandle;

pub mod config;
pub mod handlers;
pub mod server;

pub use config::ServiceConfig;
pub use server::{create_router, serve, start_server};

/// Shared state handed to every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Submit side of the delivery engine.
    pub delivery: DeliveryHandle,
    /// Service configuration the router was built from.
    pub config: Arc<ServiceConfig>,
}

impl AppState {
    /// Creates application state around a running engine's handle.
    pub fn new(delivery: DeliveryHandle, config: ServiceConfig) -> Self {
        Self { delivery, config: Arc::new(config) }
    }
}
