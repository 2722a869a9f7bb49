//! Shared error taxonomy for the Agora crates.
//!
//! This crate provides the foundational types used across all Agora crates.
//! It has no internal Agora dependencies (dependency level 0).
//!
//! # Modules
//!
//! - [`error`]: Error types and Result alias

pub mod error;

// Re-export key types at crate root for convenience
pub use error::{Error, Result};
