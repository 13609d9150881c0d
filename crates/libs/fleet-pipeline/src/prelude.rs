//! Common types and utilities.

/// Pipeline error type.
pub use crate::error::Error;

/// Pipeline result type.
pub type Result<T> = core::result::Result<T, Error>;
