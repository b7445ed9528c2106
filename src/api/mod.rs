//! API layer
//!
//! HTTP handlers for:
//! - HTML pages (landing, signed-in user)
//! - Health and metrics (Prometheus)

pub mod metrics;
mod pages;

pub use metrics::ops_router;
pub use pages::pages_router;
