//! Common Utilities and Types Library
//!
//! This crate provides shared types and utilities used across the UE implementation.

pub mod timers;
pub mod types;

// Re-export commonly used items
pub use timers::*;
pub use types::*;
