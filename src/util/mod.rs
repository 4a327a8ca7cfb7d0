//! Utility functions.

pub mod time;

pub use time::{localize, now_ms, parse_timestamp};
