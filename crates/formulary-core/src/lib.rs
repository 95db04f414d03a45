//! Formulary Core: shared error type for the Formulary crates.
//!
//! This crate has no internal Formulary dependencies (dependency level 0).
//!
//! # Modules
//!
//! - [`error`]: Error types and Result alias

pub mod error;

// Re-export key types at crate root for convenience
pub use error::{Error, Result};
