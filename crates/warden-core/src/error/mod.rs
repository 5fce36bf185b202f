//! Error types for Warden
//!
//! Every failure the sandbox can report is a variant of [`SandboxError`]. The
//! narrower error structs ([`ResourceLimitError`], [`PolicyViolation`]) are what the
//! individual components return and convert into `SandboxError` with `?`.
//!
//! All errors implement [`UnifiedError`], which provides a stable error code for
//! programmatic handling.

mod types;
mod unified_error;

pub use types::{ResourceLimitError, SandboxError, WardenResult};
pub use unified_error::UnifiedError;
