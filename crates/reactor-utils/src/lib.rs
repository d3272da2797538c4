//! Shared utilities for reactor.

/// Environment variable utilities.
pub mod env;
/// Filesystem utilities.
pub mod fs;
