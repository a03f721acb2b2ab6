//! # derivo-core
//!
//! Core types, traits, and abstractions for the derivo derivative pipeline.
//!
//! This crate provides the foundational data structures and trait definitions
//! that the other derivo crates depend on.

pub mod defaults;
pub mod error;
pub mod logging;
pub mod models;
pub mod paths;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{Error, RejectReason, Result};
pub use models::*;
pub use paths::{derivative_path, derivative_relative_path, safe_join, source_path};
pub use traits::*;
