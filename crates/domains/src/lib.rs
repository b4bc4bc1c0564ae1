//! AppShare domains crate.
//!
//! Entities, the error taxonomy and the port traits every adapter implements.
//! This crate performs no I/O.

pub mod errors;
pub mod models;
pub mod traits;

// Re-exporting for easier access in other crates
pub use errors::*;
pub use models::*;
pub use traits::*;
