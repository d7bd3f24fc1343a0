//! HTTP API handlers

pub mod health;
pub mod predictions;
pub mod sse;
pub mod trigger;

pub use health::health_routes;
pub use predictions::prediction_routes;
pub use sse::event_stream;
pub use trigger::trigger_routes;
