//! Common Utilities and Types Library
//!
//! This crate provides shared identifiers, slot arithmetic and helpers used across the
//! scheduler and the gNodeB driver.

pub mod types;
pub mod utils;

// Re-export commonly used items
pub use types::*;
pub use utils::*;
