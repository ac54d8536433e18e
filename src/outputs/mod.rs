//! Report sinks.
//!
//! # Submodules
//!
//! - [`json`]: Writes the run's [`Report`](crate::models::Report) as a single JSON document

pub mod json;
