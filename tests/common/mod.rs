//! Common test utilities for integration tests.
//!
//! # Modules
//!
//! - `log_capture`: per-test tracing capture with structured-field assertions

pub mod log_capture;
