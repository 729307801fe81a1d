//! Utility functions for display formatting.

pub mod format;

pub use format::{format_size, format_timestamp, truncate_string};
