//! R Environment Manager common types and errors.
//!
//! This crate provides foundational types shared across rem crates:
//! - Unified error type with stable codes and categories
//! - System path resolution with sysroot redirection for tests
//! - Environment variable names understood by the `rem` binary
//! - Effective-uid privilege checks

pub mod env;
pub mod error;
pub mod paths;
pub mod privilege;

pub use error::{format_error_human, Error, ErrorCategory, Result};
pub use paths::SystemPaths;
pub use privilege::euid_is_root;
