//! Common module
//!
//! This module contains shared types, errors, and utility functions used
//! throughout the library.

pub mod error;
pub mod log;

// Re-export commonly used types and functions
pub use error::{MuxError, Result};
pub use self::log::init_logger;
