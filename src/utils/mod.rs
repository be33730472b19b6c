//! Utility functions and helpers.
//!
//! # Submodules
//!
//! - [`paths`]: Tilde expansion and lexical path normalization

/// Path manipulation and resolution utilities
pub mod paths;
