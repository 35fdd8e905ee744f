//! # Utility Modules
//!
//! Supporting utilities shared by the session and transport layers.
//!
//! ## Components
//! - **Metrics**: per-session atomic counters and an operation timer
//! - **Logging**: `tracing-subscriber` setup for binaries and tests

pub mod logging;
pub mod metrics;

pub use metrics::{MetricsSnapshot, SessionMetrics};
